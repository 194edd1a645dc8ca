//! Top-level ingestion pipeline orchestration (C2, §4.1).
//!
//! `run_ingestion` drives download -> extract -> stage -> referential audit
//! -> transform -> cleanup strictly sequentially for one `(year, dataset)`
//! pair. Callers are responsible for serializing concurrent calls that
//! target the same pair (§5).

use std::path::PathBuf;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, info_span, warn, Instrument};

use crate::dataset::Dataset;
use crate::error::AppError;
use crate::ingestion::{fetch, stage, transform, utils};

pub async fn run_ingestion(
    pool: &PgPool,
    dataset: Dataset,
    year: i32,
    temp_root: &std::path::Path,
    http_timeout: Duration,
) -> Result<(), AppError> {
    let span = info_span!("run_ingestion", %dataset, year);
    async move {
        info!("starting ingestion run");
        let run_dir = temp_root.join(format!("{dataset}_{year}_{}", uuid_like_suffix()));

        let result = run_ingestion_inner(pool, dataset, year, &run_dir, http_timeout).await;

        if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, dir = %run_dir.display(), "cleanup failed, continuing");
            }
        }

        match &result {
            Ok(()) => info!("ingestion run completed"),
            Err(e) => warn!(error = %e, "ingestion run failed"),
        }
        result
    }
    .instrument(span)
    .await
}

async fn run_ingestion_inner(
    pool: &PgPool,
    dataset: Dataset,
    year: i32,
    run_dir: &std::path::Path,
    http_timeout: Duration,
) -> Result<(), AppError> {
    tokio::fs::create_dir_all(run_dir)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let zip_path = fetch::download_archive(dataset, year, run_dir, http_timeout).await?;
    let csvs = utils::extract_register_csvs(&zip_path, run_dir)?;

    let sifranti_table = format!("{}_sifranti", dataset.table_prefix());
    let posel_table = dataset.posel_table();
    let del_stavbe_table = dataset.del_stavbe_table();

    let sifranti_rows = stage::stage_csv(pool, &sifranti_table, &csvs["sifranti"]).await?;
    let posel_rows = stage::stage_csv(pool, &posel_table, &csvs["posli"]).await?;
    let del_stavbe_rows = stage::stage_csv(pool, &del_stavbe_table, &csvs["delistavb"]).await?;
    info!(sifranti_rows, posel_rows, del_stavbe_rows, "staged all register csvs");

    transform::referential_audit(pool, dataset).await;

    transform::transform_partition(pool, dataset, year).await?;

    Ok(())
}

/// Per-run temp-directory disambiguator. Not a real UUID (no extra
/// dependency needed for a directory name) — just needs to avoid collisions
/// between concurrent runs for different `(year, dataset)` pairs sharing a
/// temp root.
fn uuid_like_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

#[allow(dead_code)]
pub(crate) fn temp_root_default() -> PathBuf {
    std::env::temp_dir().join("domogled_ingestion")
}
