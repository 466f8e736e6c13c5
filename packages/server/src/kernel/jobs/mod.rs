//! Durable multi-queue job system: priority ordering, exponential backoff
//! with jitter, idempotent and singleton-deduplicated enqueue, and a
//! heartbeat-renewed claim lease.
//!
//! ```text
//! domain worker calls queue.enqueue(queue_name, payload, options)
//!     └─► PostgresJobQueue inserts a job_queue_messages row
//!
//! JobWorker
//!     ├─► claim() via FOR UPDATE SKIP LOCKED (stale leases reclaimed too)
//!     ├─► JobRegistry.execute() dispatches to the registered handler
//!     ├─► heartbeat task renews the lock while the handler runs
//!     └─► mark_succeeded / mark_failed (failed retries with backoff+jitter)
//! ```

mod job;
mod queue;
mod registry;
mod worker;

pub use job::{ErrorKind, Job, JobPriority, JobStatus};
pub use queue::{ClaimedJob, EnqueueOptions, EnqueueResult, JobQueue, PostgresJobQueue};
pub use registry::{JobRegistry, SharedJobRegistry};
pub use worker::{JobWorker, JobWorkerConfig, spawn_worker_pool};
