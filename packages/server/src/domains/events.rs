//! The closed Event Log taxonomy. Downstream consumers must tolerate
//! unknown fields on any payload; new event types are not added outside
//! this list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! event_type {
    ($name:ident, $type_str:literal) => {
        impl $name {
            pub const EVENT_TYPE: &'static str = $type_str;
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreated {
    pub message_id: Uuid,
    pub stream_id: Uuid,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}
event_type!(MessageCreated, "message:created");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEdited {
    pub message_id: Uuid,
    pub stream_id: Uuid,
    pub edited_at: DateTime<Utc>,
}
event_type!(MessageEdited, "message:edited");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub message_id: Uuid,
    pub stream_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}
event_type!(MessageDeleted, "message:deleted");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReactionAdded {
    pub message_id: Uuid,
    pub actor_id: Uuid,
    pub reaction: String,
}
event_type!(MessageReactionAdded, "message:reaction_added");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReactionRemoved {
    pub message_id: Uuid,
    pub actor_id: Uuid,
    pub reaction: String,
}
event_type!(MessageReactionRemoved, "message:reaction_removed");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCreated {
    pub stream_id: Uuid,
    pub workspace_id: Uuid,
}
event_type!(StreamCreated, "stream:created");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMemberJoined {
    pub stream_id: Uuid,
    pub actor_id: Uuid,
}
event_type!(StreamMemberJoined, "stream:member_joined");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMemberLeft {
    pub stream_id: Uuid,
    pub actor_id: Uuid,
}
event_type!(StreamMemberLeft, "stream:member_left");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationCreated {
    pub conversation_id: Uuid,
    pub stream_id: Uuid,
    pub trigger_message_id: Uuid,
}
event_type!(ConversationCreated, "conversation:created");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationUpdated {
    pub conversation_id: Uuid,
    pub trigger_message_id: Uuid,
}
event_type!(ConversationUpdated, "conversation:updated");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDispatched {
    pub queue: String,
    pub job_id: Uuid,
}
event_type!(CommandDispatched, "command:dispatched");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_constants_match_taxonomy() {
        assert_eq!(MessageCreated::EVENT_TYPE, "message:created");
        assert_eq!(ConversationUpdated::EVENT_TYPE, "conversation:updated");
        assert_eq!(CommandDispatched::EVENT_TYPE, "command:dispatched");
    }
}
