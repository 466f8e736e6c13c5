//! Job worker: claims batches of jobs, renews their lease with a heartbeat
//! task, dispatches to the registry, and marks the outcome. Same
//! claim -> execute_with_heartbeat -> mark_succeeded/failed loop shape as the
//! source project's worker, with the seesaw `Dispatcher`/`Service` plumbing
//! replaced by a plain registry and a `tokio_util` cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use super::job::ErrorKind;
use super::queue::{ClaimedJob, JobQueue};
use super::registry::JobRegistry;
use crate::kernel::ServerKernel;

#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    pub batch_size: i64,
    pub max_poll_interval: Duration,
    pub min_poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub lock_duration_ms: i64,
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_poll_interval: Duration::from_secs(30),
            min_poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(30),
            lock_duration_ms: 60_000,
            worker_id: Uuid::now_v7().to_string(),
        }
    }
}

impl JobWorkerConfig {
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

/// Claims, executes, and settles jobs from one or more queues.
pub struct JobWorker<Q: JobQueue> {
    queue: Arc<Q>,
    registry: Arc<JobRegistry>,
    kernel: Arc<ServerKernel>,
    config: JobWorkerConfig,
    running_jobs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl<Q: JobQueue + 'static> JobWorker<Q> {
    pub fn new(queue: Arc<Q>, registry: Arc<JobRegistry>, kernel: Arc<ServerKernel>, config: JobWorkerConfig) -> Self {
        Self {
            queue,
            registry,
            kernel,
            config,
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run the claim loop until `shutdown` is cancelled, draining any
    /// in-flight jobs before returning.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut poll_delay = self.config.min_poll_interval;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = match self
                .queue
                .claim(&self.config.worker_id, self.config.batch_size, self.config.lock_duration_ms)
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    tokio::select! {
                        _ = tokio::time::sleep(poll_delay) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    continue;
                }
            };

            if claimed.is_empty() {
                poll_delay = (poll_delay * 2).min(self.config.max_poll_interval);
                tokio::select! {
                    _ = tokio::time::sleep(poll_delay) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            poll_delay = self.config.min_poll_interval;

            let handles: Vec<_> = claimed
                .into_iter()
                .map(|job| {
                    let this = self.clone();
                    tokio::spawn(async move { this.process_job(job).await })
                })
                .collect();

            futures::future::join_all(handles).await;
        }

        self.drain(Duration::from_secs(30)).await;
    }

    async fn drain(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.running_jobs.read().await.is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("job worker shutdown timed out with jobs still running");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn process_job(&self, claimed: ClaimedJob) {
        let job_id = claimed.id;
        let queue = claimed.queue().to_string();

        match self.execute_with_heartbeat(&claimed).await {
            Ok(()) => {
                if let Err(e) = self.queue.mark_succeeded(job_id).await {
                    error!(%job_id, %queue, error = %e, "failed to mark job succeeded");
                }
            }
            Err(e) => {
                let kind = ErrorKind::Retryable;
                warn!(%job_id, %queue, error = %e, "job handler failed");
                if let Err(mark_err) = self.queue.mark_failed(job_id, &e.to_string(), kind).await {
                    error!(%job_id, %queue, error = %mark_err, "failed to mark job failed");
                }
            }
        }
    }

    async fn execute_with_heartbeat(&self, claimed: &ClaimedJob) -> Result<()> {
        let job_id = claimed.id;
        let heartbeat_cancel = CancellationToken::new();
        self.running_jobs.write().await.insert(job_id, heartbeat_cancel.clone());

        let heartbeat_queue = self.queue.clone();
        let heartbeat_interval_dur = self.config.heartbeat_interval;
        let lock_duration_ms = self.config.lock_duration_ms;
        let heartbeat_token = heartbeat_cancel.clone();
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = interval(heartbeat_interval_dur);
            loop {
                tokio::select! {
                    _ = heartbeat_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat_queue.heartbeat(job_id, lock_duration_ms).await {
                            warn!(%job_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        });

        let result = self.registry.execute(claimed, self.kernel.clone()).await;

        if let Some(token) = self.running_jobs.write().await.remove(&job_id) {
            token.cancel();
        }
        let _ = heartbeat_task.await;

        result
    }
}

/// Spawn `worker_count` independent claim loops sharing the same queue,
/// registry, and kernel — each with a distinct worker id.
pub fn spawn_worker_pool<Q: JobQueue + 'static>(
    queue: Arc<Q>,
    registry: Arc<JobRegistry>,
    kernel: Arc<ServerKernel>,
    config: JobWorkerConfig,
    worker_count: usize,
    shutdown: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count)
        .map(|i| {
            let worker = Arc::new(JobWorker::new(
                queue.clone(),
                registry.clone(),
                kernel.clone(),
                config.clone().with_worker_id(format!("{}-{}", config.worker_id, i)),
            ));
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        let config = JobWorkerConfig::default();
        assert!(config.min_poll_interval < config.max_poll_interval);
        assert!(config.batch_size > 0);
    }

    #[test]
    fn with_worker_id_overrides_default() {
        let config = JobWorkerConfig::default().with_worker_id("fixed-id");
        assert_eq!(config.worker_id, "fixed-id");
    }
}
