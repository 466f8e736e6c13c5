//! Typed ID definitions for all domain entities.
//!
//! This module defines type aliases for each domain entity, providing
//! compile-time type safety for ID usage throughout the application.
//!
//! # Example
//!
//! ```rust
//! use crate::common::{WorkspaceId, StreamId};
//!
//! // These are incompatible types - compiler prevents mixing them up
//! let workspace_id: WorkspaceId = WorkspaceId::new();
//! let stream_id: StreamId = StreamId::new();
//!
//! // This would be a compile error:
//! // let wrong: StreamId = workspace_id;
//! ```

// Re-export the core Id type and version markers
pub use super::id::{Id, V4, V7};

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for Workspace entities (a team's isolated data/budget scope).
pub struct Workspace;

/// Marker type for Stream entities (a chat channel/thread a dispatcher watches).
pub struct Stream;

/// Marker type for StreamMember entities (membership of an actor in a stream).
pub struct StreamMember;

/// Marker type for Actor entities (a human member or a system/companion actor).
pub struct Actor;

/// Marker type for Message entities (an individual chat message).
pub struct Message;

/// Marker type for Conversation entities (a derived/named grouping of messages).
pub struct Conversation;

/// Marker type for Memo entities (accumulated long-term knowledge for a stream).
pub struct Memo;

/// Marker type for MemoPendingItem entities (a memo update queued for batching).
pub struct MemoPendingItem;

/// Marker type for Attachment entities (a file/image attached to a message).
pub struct Attachment;

/// Marker type for Job entities (a durable background queue entry).
pub struct Job;

/// Marker type for Session entities (a unit of cost/budget accounting).
pub struct Session;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for Workspace entities.
pub type WorkspaceId = Id<Workspace>;

/// Typed ID for Stream entities.
pub type StreamId = Id<Stream>;

/// Typed ID for StreamMember entities.
pub type StreamMemberId = Id<StreamMember>;

/// Typed ID for Actor entities (human members and system actors alike).
pub type ActorId = Id<Actor>;

/// Typed ID for Message entities.
pub type MessageId = Id<Message>;

/// Typed ID for Conversation entities.
pub type ConversationId = Id<Conversation>;

/// Typed ID for Memo entities.
pub type MemoId = Id<Memo>;

/// Typed ID for MemoPendingItem entities.
pub type MemoPendingItemId = Id<MemoPendingItem>;

/// Typed ID for Attachment entities.
pub type AttachmentId = Id<Attachment>;

/// Typed ID for Job entities.
pub type JobId = Id<Job>;

/// Typed ID for Session entities (cost/budget accounting unit).
pub type SessionId = Id<Session>;
