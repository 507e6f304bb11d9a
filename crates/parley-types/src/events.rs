use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DeleteType, Message};

/// Change notifications pushed by the remote store for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// A message row was created
    Insert(Message),

    /// A message row changed (edit, pin, restore)
    Update(Message),

    /// A message was flagged deleted
    Delete {
        id: Uuid,
        channel_id: Uuid,
        delete_type: DeleteType,
        deleted_at: DateTime<Utc>,
    },

    /// A reaction row was created
    ReactionAdd {
        channel_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A reaction row was removed
    ReactionRemove {
        channel_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },
}

impl ChangeEvent {
    /// Every change is scoped to exactly one channel.
    pub fn channel_id(&self) -> Uuid {
        match self {
            Self::Insert(m) | Self::Update(m) => m.channel_id,
            Self::Delete { channel_id, .. }
            | Self::ReactionAdd { channel_id, .. }
            | Self::ReactionRemove { channel_id, .. } => *channel_id,
        }
    }

    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete { .. } => "delete",
            Self::ReactionAdd { .. } => "reaction_add",
            Self::ReactionRemove { .. } => "reaction_remove",
        }
    }
}
