use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel metadata. Read-only from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub storage_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteType {
    Soft,
    Hard,
}

impl DeleteType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "soft" => Some(Self::Soft),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

/// Reactions for one emoji on one message, grouped by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

/// A chat message as held by the remote store and mirrored in the client cache.
///
/// `thread_id` is the id of the root message when this is a reply. Threads are
/// not stored separately: they are the set of messages sharing a `thread_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    #[serde(default)]
    pub thread_id: Option<Uuid>,
    pub author_id: Uuid,
    pub author_display_name: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delete_type: Option<DeleteType>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub is_task: bool,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    /// Server-computed number of replies when this is a thread root.
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub reactions: Vec<ReactionGroup>,
}

impl Message {
    pub fn is_reply(&self) -> bool {
        self.thread_id.is_some()
    }

    pub fn is_hard_deleted(&self) -> bool {
        self.deleted && self.delete_type == Some(DeleteType::Hard)
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.deleted && self.delete_type != Some(DeleteType::Hard)
    }

    /// Drops content and attachments. Used for hard deletes, which must not
    /// leave any erased data behind in a cache.
    pub fn erase(&mut self) {
        self.content.clear();
        self.attachments.clear();
        self.reactions.clear();
    }

    /// Marks the message deleted with the given type, erasing it when hard.
    pub fn mark_deleted(&mut self, delete_type: DeleteType, deleted_at: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_at = Some(deleted_at);
        self.delete_type = Some(delete_type);
        self.pinned = false;
        if delete_type == DeleteType::Hard {
            self.erase();
        }
    }
}
