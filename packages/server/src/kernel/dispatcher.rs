//! Dispatcher: fans out Event Log change notifications to a set of data-driven
//! listeners, each debounced with a quiet-window-or-max-wait cooperative
//! task, backed by a 1s poll fallback feeding the same `trigger()` entry
//! point as `LISTEN`/`NOTIFY`.
//!
//! A single `Listener` interface (`process_events` + a filter) replaces the
//! source project's class hierarchy of listener services — concrete
//! listeners (Boundary Extraction, Naming, Memo Accumulator, Embedding) are
//! data-driven: a filter closure plus an action, not distinct types.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{error, warn};

use super::cursor_lock::{CursorLock, ProcessOutcome};
use super::event_log::{Event, EventLog, CHANGE_CHANNEL};
use super::ServerKernel;

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub batch_size: i64,
    pub debounce_ms: u64,
    pub max_wait_ms: u64,
    pub lock_duration_ms: i64,
    pub refresh_interval_ms: i64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            debounce_ms: 200,
            max_wait_ms: 2000,
            lock_duration_ms: 30_000,
            refresh_interval_ms: 10_000,
            max_retries: 5,
            base_backoff_ms: 200,
        }
    }
}

/// One data-driven consumer of the Event Log.
#[async_trait]
pub trait Listener: Send + Sync {
    fn id(&self) -> &str;

    /// Whether this event is of interest; events that don't match are
    /// skipped but still advance the cursor (they count toward ordering).
    fn interested_in(&self, event: &Event) -> bool;

    /// Process a batch of already-filtered events. Returning `Err` for a
    /// single event's worth of work should be folded into `ProcessOutcome`
    /// by the listener itself; this method owns the whole batch.
    async fn process_events(&self, kernel: Arc<ServerKernel>, events: &[Event]) -> ProcessOutcome;
}

/// Owns the debounce task and lease for one listener, and the shared poll
/// fallback and `LISTEN` subscription that feed every listener's trigger.
pub struct Dispatcher {
    pool: PgPool,
    kernel: Arc<ServerKernel>,
    listeners: Vec<(Arc<dyn Listener>, ListenerConfig)>,
}

impl Dispatcher {
    pub fn new(pool: PgPool, kernel: Arc<ServerKernel>) -> Self {
        Self {
            pool,
            kernel,
            listeners: Vec::new(),
        }
    }

    pub fn register(&mut self, listener: Arc<dyn Listener>, config: ListenerConfig) {
        self.listeners.push((listener, config));
    }

    /// Spawn one debounce task per listener plus the shared notification
    /// subscriber and poll fallback. Runs until `shutdown` resolves.
    pub async fn run(self, shutdown: tokio_util::sync::CancellationToken) -> Result<()> {
        let mut triggers = Vec::with_capacity(self.listeners.len());

        for (listener, config) in &self.listeners {
            let (tx, rx) = mpsc::channel::<()>(1);
            triggers.push(tx);
            tokio::spawn(debounce_loop(
                self.pool.clone(),
                self.kernel.clone(),
                listener.clone(),
                config.clone(),
                rx,
                shutdown.clone(),
            ));
        }

        // Shared poll fallback: triggers every listener every second
        // regardless of notification delivery, matching the spec's
        // belt-and-suspenders stance on `LISTEN`/`NOTIFY` reliability.
        let poll_triggers = triggers.clone();
        let poll_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for tx in &poll_triggers {
                            let _ = tx.try_send(());
                        }
                    }
                    _ = poll_shutdown.cancelled() => break,
                }
            }
        });

        // Postgres LISTEN subscription, fed into the same trigger channels.
        let mut listener_conn = PgListener::connect_with(&self.pool).await?;
        listener_conn.listen(CHANGE_CHANNEL).await?;
        let notify_triggers = triggers;
        tokio::spawn(async move {
            let mut stream = listener_conn.into_stream();
            loop {
                tokio::select! {
                    next = stream.next() => {
                        match next {
                            Some(Ok(_)) => {
                                for tx in &notify_triggers {
                                    let _ = tx.try_send(());
                                }
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "postgres LISTEN stream error");
                            }
                            None => break,
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });

        Ok(())
    }
}

/// One listener's cooperative debounce task: two timers (quiet window and
/// max wait), reset/started on each `trigger()`, whichever fires first runs
/// the listener and resets both.
async fn debounce_loop(
    pool: PgPool,
    kernel: Arc<ServerKernel>,
    listener: Arc<dyn Listener>,
    config: ListenerConfig,
    mut trigger_rx: mpsc::Receiver<()>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let lock = CursorLock::new(
        pool.clone(),
        listener.id().to_string(),
        config.lock_duration_ms,
        config.refresh_interval_ms,
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = trigger_rx.recv() => {
                if received.is_none() {
                    break;
                }
            }
        }

        // Quiet window: wait for a further debounce_ms of silence, bounded
        // by max_wait_ms total, whichever comes first.
        let deadline = tokio::time::sleep(Duration::from_millis(config.max_wait_ms));
        tokio::pin!(deadline);
        loop {
            let quiet = tokio::time::sleep(Duration::from_millis(config.debounce_ms));
            tokio::pin!(quiet);
            tokio::select! {
                _ = &mut quiet => break,
                _ = &mut deadline => break,
                more = trigger_rx.recv() => {
                    if more.is_none() {
                        break;
                    }
                    // loop again: reset the quiet window
                }
            }
            if deadline.is_elapsed() {
                break;
            }
        }

        if let Err(e) = run_once(&pool, &kernel, &listener, &config, &lock).await {
            warn!(listener_id = listener.id(), error = %e, "listener run failed");
        }
    }
}

async fn run_once(
    pool: &PgPool,
    kernel: &Arc<ServerKernel>,
    listener: &Arc<dyn Listener>,
    config: &ListenerConfig,
    lock: &CursorLock,
) -> Result<()> {
    let listener = listener.clone();
    let kernel = kernel.clone();
    let pool = pool.clone();
    let batch_size = config.batch_size;

    lock.run(config.max_retries, config.base_backoff_ms, move |state| {
        let listener = listener.clone();
        let kernel = kernel.clone();
        let pool = pool.clone();
        async move {
            let events = match EventLog::fetch_after(&pool, state.last_processed_id, batch_size, &state.processed_ids).await {
                Ok(events) => events,
                Err(e) => {
                    return ProcessOutcome::Error {
                        processed_ids: state.processed_ids,
                        message: e.to_string(),
                    };
                }
            };

            if events.is_empty() {
                return ProcessOutcome::NoEvents;
            }

            let filtered: Vec<Event> = events.iter().filter(|e| listener.interested_in(e)).cloned().collect();
            let max_id = events.iter().map(|e| e.id).max().unwrap_or(state.last_processed_id);

            if filtered.is_empty() {
                return ProcessOutcome::Processed { new_cursor: max_id };
            }

            match listener.process_events(kernel, &filtered).await {
                ProcessOutcome::NoEvents => ProcessOutcome::Processed { new_cursor: max_id },
                other => other,
            }
        }
    })
    .await
}
