//! # pipeline-core
//!
//! Domain-agnostic primitives for building a durable, event-driven pipeline
//! on top of Postgres: facts in motion ([`Event`]), intent with authority
//! ([`Command`]), an in-process fan-out bus ([`EventBus`]), and the two
//! policy-light storage contracts a concrete backend implements:
//!
//! - [`outbox`] - append-only event log (`OutboxWriter`/`OutboxReader`)
//! - [`job`] - durable job queue (`JobStore`, `CommandRegistry`)
//!
//! This crate defines the shape of those contracts only. A concrete
//! Postgres-backed implementation lives in the server crate that depends on
//! this one.
//!
//! ## Key Invariants
//!
//! 1. **Events are facts** - immutable, describe what happened, no IO
//! 2. **Commands are intent** - request for IO, may carry a [`JobSpec`] for
//!    durable/background execution
//! 3. **At-most-once delivery** on [`EventBus`] - it is in-memory only;
//!    durability comes from the outbox and job queue, not the bus
//!
//! ## What This Is Not
//!
//! - Not full event sourcing
//! - Not a saga engine
//! - Not an actor framework

// Core modules
mod bus;
mod core;

// Job interfaces (policy-light)
pub mod job;

// Outbox module for durable event persistence
pub mod outbox;

// Re-export core traits
pub use crate::core::{
    AnyCommand, Command, CorrelationId, EnvelopeMatch, Event, EventEnvelope, EventRole,
    ExecutionMode, JobSpec, MatchChain, SerializableCommand,
};

// Re-export bus types
pub use bus::EventBus;

// Re-export job types (policy-light interfaces)
pub use job::{ClaimedJob, CommandRegistry, DeserializationError, FailureKind, JobStore};

// Re-export outbox types (durable event log interfaces)
pub use outbox::{
    OutboxEntry, OutboxEvent, OutboxEventRegistry, OutboxPublisherConfig, OutboxReader,
    OutboxWriter,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
