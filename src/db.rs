//! Connection pool construction.
//!
//! Mirrors the pool shape described in spec §5: size ~30, pre-ping,
//! 300s recycle, 300s per-statement timeout. `sqlx`'s pool doesn't expose an
//! "overflow" knob the way SQLAlchemy's `QueuePool` does — `max_connections`
//! is the hard cap here, set to `pool_max` (the original's size+overflow
//! combined upper bound).

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    let connect_options: PgConnectOptions = config.database_url.parse()?;

    PgPoolOptions::new()
        .max_connections(config.db_pool_max)
        .min_connections(config.db_pool_min)
        .test_before_acquire(true)
        .max_lifetime(Duration::from_secs(300))
        .acquire_timeout(Duration::from_secs(60))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET statement_timeout = 300000")
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await
}
