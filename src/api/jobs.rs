//! Bounded-concurrency background job runner backing the 202-on-accept
//! endpoints (§9 Design Notes, "Background tasks").
//!
//! The source dispatches long-running work onto the web framework's
//! fire-and-forget pool. Here that becomes an explicit queue: a semaphore
//! caps how many jobs run at once, and a small in-memory registry tracks
//! which resource tags currently have a job in flight so overlapping runs on
//! the same dataset can be rejected with `Conflict` instead of racing.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info};

use crate::error::AppError;

const MAX_CONCURRENT_JOBS: usize = 4;

#[derive(Clone)]
pub struct JobQueue {
    semaphore: Arc<Semaphore>,
    active_tags: Arc<Mutex<HashSet<String>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        JobQueue {
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_JOBS)),
            active_tags: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reserve `tags` exclusively for the duration of the job, spawn it, and
    /// return immediately. Returns `Conflict` without spawning if any tag is
    /// already held by another in-flight job.
    pub async fn spawn<F>(&self, name: &'static str, tags: Vec<String>, fut: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut active = self.active_tags.lock().await;
            if tags.iter().any(|t| active.contains(t)) {
                return Err(AppError::Conflict(format!(
                    "a job already holds one of {tags:?}"
                )));
            }
            for tag in &tags {
                active.insert(tag.clone());
            }
        }

        let semaphore = self.semaphore.clone();
        let active_tags = self.active_tags.clone();
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(job = name, error = %e, "job queue semaphore closed");
                    return;
                }
            };
            info!(job = name, tags = ?tags, "job started");
            fut.await;
            info!(job = name, "job finished");

            let mut active = active_tags.lock().await;
            for tag in &tags {
                active.remove(tag);
            }
        });

        Ok(())
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn rejects_overlapping_tag() {
        let queue = JobQueue::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();

        queue
            .spawn("first", vec!["np".to_string()], async move {
                let _ = rx.await;
                ran2.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        let result = queue.spawn("second", vec!["np".to_string()], async {}).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let _ = tx.send(());
    }

    #[tokio::test]
    async fn disjoint_tags_both_accepted() {
        let queue = JobQueue::new();
        let r1 = queue.spawn("a", vec!["np".to_string()], async {}).await;
        let r2 = queue.spawn("b", vec!["kpp".to_string()], async {}).await;
        assert!(r1.is_ok());
        assert!(r2.is_ok());
    }
}
