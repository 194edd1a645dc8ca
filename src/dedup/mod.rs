//! Deduplication engine (C4, §4.3).
//!
//! Builds canonical `DeduplicatedBuildingPart` rows from all years of core
//! data for one dataset, then (once both datasets are done) attaches energy
//! certificates by cadastral triple.

use sqlx::PgPool;
use tracing::{info, info_span, warn, Instrument};

use crate::dataset::Dataset;
use crate::error::AppError;
use crate::sql;

#[derive(Debug, Clone, Copy)]
pub struct DedupStats {
    pub input_rows: i64,
    pub output_rows: i64,
}

impl DedupStats {
    /// `(input - output) / input`, `None` when input is zero (ratio
    /// undefined, not a warning condition on its own).
    pub fn ratio(&self) -> Option<f64> {
        if self.input_rows == 0 {
            None
        } else {
            Some((self.input_rows - self.output_rows) as f64 / self.input_rows as f64)
        }
    }

    /// More dedup rows than input rows indicates the natural key is not
    /// actually collapsing anything, or worse, fanning out. Always a bug
    /// signal, never fatal.
    pub fn is_suspicious(&self) -> bool {
        self.output_rows > self.input_rows || self.output_rows == 0
    }
}

/// Rebuild `core.{dataset}_del_stavbe_deduplicated` wholesale, then verify
/// the resulting ratio. Verification never aborts the run.
pub async fn build_deduplicated(pool: &PgPool, dataset: Dataset) -> Result<DedupStats, AppError> {
    let span = info_span!("build_deduplicated", %dataset);
    async move {
        info!("starting deduplication");

        let input_rows: (i64,) =
            sqlx::query_as(&format!("SELECT count(*) FROM core.{}", dataset.del_stavbe_table()))
                .fetch_one(pool)
                .await?;

        sqlx::query(&format!(
            "TRUNCATE core.{}",
            dataset.deduplicated_table()
        ))
        .execute(pool)
        .await?;

        let dedup_sql = sql::load(&format!(
            "{}_del_stavbe_deduplication.sql",
            dataset.table_prefix()
        ))?;
        sqlx::query(&dedup_sql).execute(pool).await?;

        let output_rows: (i64,) = sqlx::query_as(&format!(
            "SELECT count(*) FROM core.{}",
            dataset.deduplicated_table()
        ))
        .fetch_one(pool)
        .await?;

        let stats = DedupStats {
            input_rows: input_rows.0,
            output_rows: output_rows.0,
        };
        verify(dataset, &stats);

        info!(input = stats.input_rows, output = stats.output_rows, "deduplication completed");
        Ok(stats)
    }
    .instrument(span)
    .await
}

fn verify(dataset: Dataset, stats: &DedupStats) {
    match stats.ratio() {
        Some(ratio) if stats.is_suspicious() => {
            warn!(%dataset, ratio, input = stats.input_rows, output = stats.output_rows,
                "deduplication ratio looks wrong (output >= input or zero output)");
        }
        Some(ratio) => {
            info!(%dataset, ratio, "deduplication ratio");
        }
        None => {
            warn!(%dataset, "deduplication verification skipped: zero input rows");
        }
    }
}

/// Run `build_deduplicated` for every dataset, then attach energy
/// certificates once both have completed. Per-dataset failures are logged
/// and do not prevent the remaining datasets (or the EI attach step) from
/// running.
pub async fn build_all_deduplicated(pool: &PgPool, datasets: &[Dataset]) -> Vec<Result<DedupStats, AppError>> {
    let mut results = Vec::with_capacity(datasets.len());
    for &dataset in datasets {
        let result = build_deduplicated(pool, dataset).await;
        if let Err(e) = &result {
            warn!(%dataset, error = %e, "deduplication failed for dataset, continuing");
        }
        results.push(result);
    }

    if let Err(e) = attach_energy_certificates(pool).await {
        warn!(error = %e, "energy certificate attach step failed");
    }

    results
}

async fn attach_energy_certificates(pool: &PgPool) -> Result<(), AppError> {
    let span = info_span!("attach_energy_certificates");
    async move {
        let sql_text = sql::load("dodaj_ei_deduplication.sql")?;
        let mut tx = pool.begin().await?;
        for statement in sql_text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("attached energy certificates to deduplicated rows");
        Ok(())
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_none_for_zero_input() {
        let stats = DedupStats { input_rows: 0, output_rows: 0 };
        assert_eq!(stats.ratio(), None);
    }

    #[test]
    fn ratio_reflects_collapse_fraction() {
        let stats = DedupStats { input_rows: 100, output_rows: 40 };
        assert_eq!(stats.ratio(), Some(0.6));
        assert!(!stats.is_suspicious());
    }

    #[test]
    fn output_exceeding_input_is_suspicious() {
        let stats = DedupStats { input_rows: 10, output_rows: 11 };
        assert!(stats.is_suspicious());
    }

    #[test]
    fn zero_output_is_suspicious() {
        let stats = DedupStats { input_rows: 10, output_rows: 0 };
        assert!(stats.is_suspicious());
    }
}
