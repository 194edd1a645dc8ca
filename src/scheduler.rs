//! Weekly refresh scheduler (C8, §4.8).
//!
//! Fires every Friday at 20:00 in the configured timezone (default
//! `Europe/Ljubljana`) and runs the full pipeline sequentially: ingestion for
//! this year and last year across both datasets, energy certificates,
//! deduplication, then statistics. Each step is logged and non-fatal -
//! a failed step does not prevent the rest of the run.

use std::str::FromStr;
use std::time::Duration;

use chrono::{Datelike, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use sqlx::PgPool;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::dataset::Dataset;
use crate::{dedup, ingestion, stats};

const TARGET_WEEKDAY: Weekday = Weekday::Fri;
const TARGET_HOUR: u32 = 20;

/// Sleeps until the next Friday 20:00 in `tz`, then runs `run_full_refresh`,
/// forever. Intended to be spawned as a background task at startup.
pub async fn run_forever(pool: PgPool, config: Config) {
    let tz: Tz = match Tz::from_str(&config.scheduler_timezone) {
        Ok(tz) => tz,
        Err(e) => {
            error!(timezone = %config.scheduler_timezone, error = %e, "invalid scheduler timezone, scheduler disabled");
            return;
        }
    };

    loop {
        let wait = time_until_next_run(tz);
        info!(seconds = wait.as_secs(), "scheduler sleeping until next run");
        sleep(wait).await;
        run_full_refresh(&pool, &config).await;
    }
}

/// Seconds until the next Friday 20:00 local time, at least 1 second (never
/// zero, so a run never tight-loops if called exactly on the boundary).
fn time_until_next_run(tz: Tz) -> Duration {
    let now = Utc::now().with_timezone(&tz);
    let mut candidate = now
        .date_naive()
        .and_hms_opt(TARGET_HOUR, 0, 0)
        .expect("valid hms");

    let days_until_friday = (TARGET_WEEKDAY.num_days_from_monday() as i64
        - now.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    candidate += chrono::Duration::days(days_until_friday);

    let candidate_local = tz
        .from_local_datetime(&candidate)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&candidate));

    let mut delta = candidate_local.signed_duration_since(now);
    if delta <= chrono::Duration::zero() {
        delta += chrono::Duration::days(7);
    }

    delta.to_std().unwrap_or(Duration::from_secs(1)).max(Duration::from_secs(1))
}

/// §4.8: for `year` in `{this_year - 1, this_year}`, for `dataset` in
/// `{np, kpp}`, run ingestion serially; then energy certificates, then
/// deduplication across both datasets, then statistics.
pub async fn run_full_refresh(pool: &PgPool, config: &Config) {
    let span = info_span!("weekly_refresh");
    async move {
        info!("starting weekly refresh");
        let this_year = Utc::now().year();

        for year in [this_year - 1, this_year] {
            for dataset in Dataset::all() {
                let result = ingestion::pipeline::run_ingestion(
                    pool,
                    dataset,
                    year,
                    &config.temp_dir,
                    config.http_timeout,
                )
                .await;
                if let Err(e) = result {
                    warn!(%dataset, year, error = %e, "ingestion failed, continuing refresh");
                }
            }
        }

        if let Err(e) = ingestion::energy::run_ei_ingestion(pool, None, config.http_timeout).await {
            warn!(error = %e, "energy certificate ingestion failed, continuing refresh");
        }

        let dedup_results = dedup::build_all_deduplicated(pool, &Dataset::all()).await;
        for result in dedup_results {
            if let Err(e) = result {
                warn!(error = %e, "deduplication step failed, continuing refresh");
            }
        }

        if let Err(e) = stats::refresh_all(pool).await {
            warn!(error = %e, "statistics refresh failed");
        }

        info!("weekly refresh completed");
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_run_is_never_more_than_a_week_away() {
        let tz: Tz = "Europe/Ljubljana".parse().unwrap();
        let wait = time_until_next_run(tz);
        assert!(wait.as_secs() <= 7 * 24 * 3600);
        assert!(wait.as_secs() >= 1);
    }
}
