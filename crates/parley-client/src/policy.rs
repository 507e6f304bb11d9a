//! Permission and validation rules shared by the edit and delete flows.

use chrono::{DateTime, TimeDelta, Utc};

use parley_types::api::Viewer;
use parley_types::models::Message;
use parley_types::{ChatError, ChatResult};

/// True while `now` is less than `window` after the message was created.
/// Timestamps from the future (clock skew) count as inside the window.
pub fn is_within_edit_window(message: &Message, now: DateTime<Utc>, window: TimeDelta) -> bool {
    now.signed_duration_since(message.created_at) < window
}

pub fn can_edit_message(message: &Message, viewer: &Viewer, now: DateTime<Utc>, window: TimeDelta) -> bool {
    !message.deleted && message.author_id == viewer.user_id && is_within_edit_window(message, now, window)
}

/// Elevated users may delete anything; everyone else only their own
/// messages, and only inside the edit window.
pub fn can_delete_message(message: &Message, viewer: &Viewer, now: DateTime<Utc>, window: TimeDelta) -> bool {
    if message.deleted {
        return false;
    }
    viewer.elevated || (message.author_id == viewer.user_id && is_within_edit_window(message, now, window))
}

pub fn validate_content(content: &str, has_attachments: bool, max_len: usize) -> ChatResult<()> {
    if content.trim().is_empty() && !has_attachments {
        return Err(ChatError::Validation("Message cannot be empty".into()));
    }
    if content.chars().count() > max_len {
        return Err(ChatError::Validation(format!(
            "Message is too long (max {max_len} characters)"
        )));
    }
    Ok(())
}

pub fn validate_reason(reason: Option<&str>, max_len: usize) -> ChatResult<()> {
    match reason {
        Some(r) if r.chars().count() > max_len => Err(ChatError::Validation(format!(
            "Reason is too long (max {max_len} characters)"
        ))),
        _ => Ok(()),
    }
}
