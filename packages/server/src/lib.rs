// Event dispatch and asynchronous pipeline substrate for a team-chat /
// AI-knowledge backend.
//
// An append-only Event Log drives a set of debounced listeners and a durable
// job queue; structured-output workers run through a Three-Phase Runner with
// cost-intercepted, budget-enforced AI calls.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;
