//! Manual/admin CLI entry point for the ingestion pipeline - triggers the
//! same stages the scheduler runs weekly, for ad-hoc backfills and ops use.

use std::env;

use anyhow::Result;
use chrono::{Datelike, Utc};
use domogled_backend::config::Config;
use domogled_backend::dataset::Dataset;
use domogled_backend::{db, dedup, ingestion, stats};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    dotenvy::dotenv().ok();

    info!("starting data ingestion CLI");

    let config = Config::from_env()?;
    info!("configuration loaded");

    let pool = db::connect(&config).await?;
    info!("database connected");

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("all");

    match command {
        "ingest" => {
            let dataset: Dataset = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("usage: data-ingestion ingest <np|kpp> <year>"))?
                .parse()?;
            let year: i32 = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: data-ingestion ingest <np|kpp> <year>"))?
                .parse()?;
            ingestion::pipeline::run_ingestion(&pool, dataset, year, &config.temp_dir, config.http_timeout)
                .await?;
            info!(%dataset, year, "ingestion complete");
        }
        "ei" => {
            ingestion::energy::run_ei_ingestion(&pool, None, config.http_timeout).await?;
            info!("energy certificate ingestion complete");
        }
        "dedup" => {
            let results = dedup::build_all_deduplicated(&pool, &Dataset::all()).await;
            for result in results {
                match result {
                    Ok(s) => info!(input = s.input_rows, output = s.output_rows, "deduplication complete"),
                    Err(e) => error!(error = %e, "deduplication failed"),
                }
            }
        }
        "stats" => {
            stats::refresh_all(&pool).await?;
            info!("statistics refresh complete");
        }
        "all" => {
            let this_year = Utc::now().year();
            for year in [this_year - 1, this_year] {
                for dataset in Dataset::all() {
                    if let Err(e) = ingestion::pipeline::run_ingestion(
                        &pool,
                        dataset,
                        year,
                        &config.temp_dir,
                        config.http_timeout,
                    )
                    .await
                    {
                        warn!(%dataset, year, error = %e, "ingestion failed, continuing");
                    }
                }
            }
            if let Err(e) = ingestion::energy::run_ei_ingestion(&pool, None, config.http_timeout).await {
                warn!(error = %e, "energy certificate ingestion failed, continuing");
            }
            dedup::build_all_deduplicated(&pool, &Dataset::all()).await;
            stats::refresh_all(&pool).await?;
            info!("full ad-hoc refresh complete");
        }
        other => {
            warn!(command = other, "unknown command, expected one of: ingest, ei, dedup, stats, all");
        }
    }

    Ok(())
}
