// Business domains: the closed event taxonomy, the retrieval loop, and the
// structured-output workers that each run as a Three-Phase Runner instance.

pub mod boundary_extraction;
pub mod companion;
pub mod embedding;
pub mod event_router;
pub mod events;
pub mod memo;
pub mod naming;
pub mod retrieval;
