//! Job registry for deserializing and executing jobs.
//!
//! Maps queue names (`boundary-extract`, `naming-generate`,
//! `memo-batch-check`, `memo-batch-process`, `embedding`, `companion-response`)
//! to handlers that deserialize their own payload type and run the worker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;

use super::queue::ClaimedJob;
use crate::kernel::ServerKernel;

type BoxedHandler = Box<
    dyn Fn(serde_json::Value, Arc<ServerKernel>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

struct JobRegistration {
    handler: BoxedHandler,
}

/// Maps queue names to handlers. Each structured-output worker registers
/// itself at startup; the job worker claims rows and dispatches through here
/// without knowing the concrete payload type.
#[derive(Default)]
pub struct JobRegistry {
    registrations: HashMap<&'static str, JobRegistration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    pub fn register<P, F, Fut>(&mut self, queue: &'static str, handler: F)
    where
        P: DeserializeOwned + Send + Sync + 'static,
        F: Fn(P, Arc<ServerKernel>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed_handler: BoxedHandler = Box::new(move |value, kernel| {
            let handler = handler.clone();
            Box::pin(async move {
                let payload: P = serde_json::from_value(value)
                    .map_err(|e| anyhow!("failed to deserialize payload for {queue}: {e}"))?;
                handler(payload, kernel).await
            })
        });

        self.registrations.insert(queue, JobRegistration { handler: boxed_handler });
    }

    pub async fn execute(&self, job: &ClaimedJob, kernel: Arc<ServerKernel>) -> Result<()> {
        let queue = job.queue();
        let registration = self
            .registrations
            .get(queue)
            .ok_or_else(|| anyhow!("no handler registered for queue {queue}"))?;

        (registration.handler)(job.job.payload.clone(), kernel).await
    }

    pub fn is_registered(&self, queue: &str) -> bool {
        self.registrations.contains_key(queue)
    }

    pub fn registered_queues(&self) -> Vec<&'static str> {
        self.registrations.keys().copied().collect()
    }
}

pub type SharedJobRegistry = Arc<JobRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestPayload {
        value: i32,
    }

    #[test]
    fn register_and_check() {
        let mut registry = JobRegistry::new();
        registry.register::<TestPayload, _, _>("test-queue", |_payload, _kernel| async move { Ok(()) });

        assert!(registry.is_registered("test-queue"));
        assert!(!registry.is_registered("unknown-queue"));
    }

    #[test]
    fn registered_queues_lists_all() {
        let mut registry = JobRegistry::new();
        registry.register::<TestPayload, _, _>("a", |_p, _k| async move { Ok(()) });
        registry.register::<TestPayload, _, _>("b", |_p, _k| async move { Ok(()) });

        let queues = registry.registered_queues();
        assert_eq!(queues.len(), 2);
        assert!(queues.contains(&"a"));
        assert!(queues.contains(&"b"));
    }
}
