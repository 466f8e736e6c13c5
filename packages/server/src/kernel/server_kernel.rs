// ServerKernel - core infrastructure with all dependencies
//
// The ServerKernel holds every server dependency (database, AI façade, event
// bus, job queue) and is threaded through fetch/compute/commit phases and job
// handlers via an `Arc`.

use std::sync::Arc;

use pipeline_core::EventBus;
use sqlx::PgPool;

use super::ai::InterceptedAi;
use super::jobs::JobQueue;

/// Holds every server dependency. Infrastructure only — business logic
/// belongs in `domains`.
pub struct ServerKernel {
    pub db_pool: PgPool,
    pub ai: Arc<InterceptedAi>,
    /// In-process event bus; the change-notification listener fans events
    /// out to registered listeners through this.
    pub bus: EventBus,
    pub job_queue: Arc<dyn JobQueue>,
}

impl ServerKernel {
    pub fn new(db_pool: PgPool, ai: Arc<InterceptedAi>, bus: EventBus, job_queue: Arc<dyn JobQueue>) -> Self {
        Self {
            db_pool,
            ai,
            bus,
            job_queue,
        }
    }
}
