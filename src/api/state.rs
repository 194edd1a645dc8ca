use sqlx::PgPool;

use crate::api::jobs::JobQueue;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub jobs: JobQueue,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Self {
        AppState {
            db,
            config,
            jobs: JobQueue::new(),
        }
    }
}
