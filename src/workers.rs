//! Background worker lifecycle tracking.
//!
//! Fire-and-forget work is modeled as an owned task handle registered here
//! so it can be cancelled and awaited at shutdown — never a detached task
//! that outlives the process.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Metadata for a tracked worker task.
struct WorkerInfo {
    description: String,
    handle: JoinHandle<()>,
    started_at: Instant,
}

/// Tracks active worker tasks with timeout and cancellation support.
#[derive(Default)]
pub struct WorkerManager {
    workers: Mutex<HashMap<String, WorkerInfo>>,
}

impl WorkerManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker task for tracking. Replaces any finished or live
    /// entry with the same id.
    pub fn register(&self, task_id: &str, handle: JoinHandle<()>, description: &str) {
        let mut workers = self.workers.lock();
        if workers.contains_key(task_id) {
            warn!(task_id, "worker already registered, replacing");
        }
        workers.insert(
            task_id.to_owned(),
            WorkerInfo {
                description: description.to_owned(),
                handle,
                started_at: Instant::now(),
            },
        );
    }

    /// Drop a finished worker from tracking.
    pub fn unregister(&self, task_id: &str) {
        self.workers.lock().remove(task_id);
    }

    /// Ids and descriptions of workers that have not finished yet.
    #[must_use]
    pub fn active(&self) -> Vec<(String, String)> {
        self.workers
            .lock()
            .iter()
            .filter(|(_, info)| !info.handle.is_finished())
            .map(|(id, info)| (id.clone(), info.description.clone()))
            .collect()
    }

    /// Cancel a worker by id. Returns `true` if it was still running.
    pub fn cancel(&self, task_id: &str) -> bool {
        let workers = self.workers.lock();
        match workers.get(task_id) {
            Some(info) if !info.handle.is_finished() => {
                info.handle.abort();
                info!(task_id, "worker cancelled");
                true
            }
            _ => false,
        }
    }

    /// Cancel all active workers and wait for them to stop.
    ///
    /// Used during graceful shutdown to ensure no orphaned tasks.
    pub async fn cancel_all(&self) {
        let drained: Vec<(String, WorkerInfo)> = self.workers.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "cancelling active workers");
        for (_, info) in &drained {
            info.handle.abort();
        }
        for (task_id, info) in drained {
            if let Err(err) = info.handle.await {
                if !err.is_cancelled() {
                    warn!(task_id, %err, "worker ended abnormally");
                }
            }
        }
        info!("all workers stopped");
    }

    /// Periodically cancel workers that exceed `timeout`. Runs until the
    /// owning task is aborted.
    pub async fn run_timeout_watchdog(&self, timeout: Duration, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let stale: Vec<String> = {
                let workers = self.workers.lock();
                workers
                    .iter()
                    .filter(|(_, info)| {
                        !info.handle.is_finished() && info.started_at.elapsed() > timeout
                    })
                    .map(|(id, _)| id.clone())
                    .collect()
            };
            for task_id in stale {
                warn!(task_id, timeout_secs = timeout.as_secs(), "worker timed out, cancelling");
                self.cancel(&task_id);
            }
        }
    }
}
