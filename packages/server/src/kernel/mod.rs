// Kernel - core infrastructure: event log, cursor leases, dispatcher,
// durable job queue, the three-phase runner, and the AI façade.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Business logic belongs in the domain layers.

pub mod ai;
pub mod cursor_lock;
pub mod dispatcher;
pub mod event_log;
pub mod jobs;
pub mod server_kernel;
pub mod three_phase;
pub mod traits;

pub use ai::InterceptedAi;
pub use cursor_lock::{CursorLock, ProcessOutcome};
pub use dispatcher::{Dispatcher, Listener, ListenerConfig};
pub use event_log::{Event, EventId, EventLog};
pub use server_kernel::ServerKernel;
pub use three_phase::run_three_phase;
pub use traits::*;
