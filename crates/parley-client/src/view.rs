use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::models::Message;

use crate::coordinator::DeleteState;

pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionChip {
    pub emoji: String,
    pub count: usize,
    pub reacted_by_me: bool,
}

/// Render-ready projection of a cached message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub id: Uuid,
    pub author: String,
    pub created_at: DateTime<Utc>,
    /// Message text, or the deleted placeholder.
    pub body: String,
    pub is_placeholder: bool,
    pub attachments: Vec<String>,
    /// Set when the message carries an "(edited)" marker.
    pub edited_at: Option<DateTime<Utc>>,
    pub own: bool,
    pub pinned: bool,
    pub highlighted: bool,
    pub task_id: Option<Uuid>,
    pub reply_count: u32,
    pub reactions: Vec<ReactionChip>,
    pub delete_state: DeleteState,
}

impl MessageView {
    pub fn build(message: &Message, viewer_id: Uuid, delete_state: DeleteState, highlighted: bool) -> Self {
        // Soft-deleted content may still sit in the cache for undo; it is
        // never rendered.
        let (body, attachments, reactions) = if message.deleted {
            (DELETED_PLACEHOLDER.to_string(), Vec::new(), Vec::new())
        } else {
            (
                message.content.clone(),
                message.attachments.iter().map(|a| a.name.clone()).collect(),
                message
                    .reactions
                    .iter()
                    .map(|g| ReactionChip {
                        emoji: g.emoji.clone(),
                        count: g.count,
                        reacted_by_me: g.user_ids.contains(&viewer_id),
                    })
                    .collect(),
            )
        };

        Self {
            id: message.id,
            author: message.author_display_name.clone(),
            created_at: message.created_at,
            body,
            is_placeholder: message.deleted,
            attachments,
            edited_at: message.edited_at.filter(|_| !message.deleted),
            own: message.author_id == viewer_id,
            pinned: message.pinned && !message.deleted,
            highlighted,
            task_id: if message.is_task { message.task_id } else { None },
            reply_count: message.reply_count,
            reactions,
            delete_state,
        }
    }

    /// Marker shown next to the timestamp of an edited message.
    pub fn edited_label(&self) -> Option<String> {
        self.edited_at
            .map(|at| format!("(edited {})", at.format("%Y-%m-%d %H:%M")))
    }
}
