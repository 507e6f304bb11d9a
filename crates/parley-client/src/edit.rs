use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::api::Viewer;
use parley_types::models::Message;
use parley_types::ports::RemoteStore;
use parley_types::{ChatError, ChatResult};

use crate::policy;

/// Inline editor state for one message. Dropping it cancels the edit.
#[derive(Debug, Clone)]
pub struct EditSession {
    message_id: Uuid,
    original: String,
    text: String,
    error: Option<ChatError>,
}

impl EditSession {
    pub fn begin(message: &Message, viewer: &Viewer, now: DateTime<Utc>, window: TimeDelta) -> ChatResult<Self> {
        if message.deleted {
            return Err(ChatError::Conflict("Deleted messages cannot be edited".into()));
        }
        if message.author_id != viewer.user_id {
            return Err(ChatError::Permission("Only the author can edit a message".into()));
        }
        if !policy::is_within_edit_window(message, now, window) {
            return Err(ChatError::Permission("The edit window for this message has passed".into()));
        }
        debug!(message_id = %message.id, "Edit started");
        Ok(Self {
            message_id: message.id,
            original: message.content.clone(),
            text: message.content.clone(),
            error: None,
        })
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn is_dirty(&self) -> bool {
        self.text != self.original
    }

    pub fn error(&self) -> Option<&ChatError> {
        self.error.as_ref()
    }

    /// Sends the edit. `Ok(None)` means nothing changed and no request was
    /// made. On failure the typed text is kept and the error recorded.
    pub async fn save<R>(&mut self, remote: &R, max_len: usize) -> ChatResult<Option<Message>>
    where
        R: RemoteStore + ?Sized,
    {
        self.error = None;
        if !self.is_dirty() {
            return Ok(None);
        }
        let result = match policy::validate_content(&self.text, false, max_len) {
            Ok(()) => remote.edit_message(self.message_id, self.text.clone()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                warn!(message_id = %self.message_id, "Edit failed: {}", e);
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(author: Uuid, created_at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            thread_id: None,
            author_id: author,
            author_display_name: "alice".into(),
            content: "hello".into(),
            attachments: Vec::new(),
            created_at,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            delete_type: None,
            pinned: false,
            is_task: false,
            task_id: None,
            reply_count: 0,
            reactions: Vec::new(),
        }
    }

    fn viewer(user_id: Uuid) -> Viewer {
        Viewer {
            user_id,
            display_name: "alice".into(),
            elevated: false,
        }
    }

    #[test]
    fn begin_checks_window_and_author() {
        let author = Uuid::new_v4();
        let window = TimeDelta::minutes(15);
        let fresh = message(author, Utc::now());
        let stale = message(author, Utc::now() - TimeDelta::minutes(16));

        assert!(EditSession::begin(&fresh, &viewer(author), Utc::now(), window).is_ok());
        assert!(matches!(
            EditSession::begin(&stale, &viewer(author), Utc::now(), window),
            Err(ChatError::Permission(_))
        ));
        assert!(matches!(
            EditSession::begin(&fresh, &viewer(Uuid::new_v4()), Utc::now(), window),
            Err(ChatError::Permission(_))
        ));
    }

    #[test]
    fn dirty_tracks_changes() {
        let author = Uuid::new_v4();
        let msg = message(author, Utc::now());
        let mut session = EditSession::begin(&msg, &viewer(author), Utc::now(), TimeDelta::minutes(15)).unwrap();
        assert!(!session.is_dirty());
        session.set_text("hello!");
        assert!(session.is_dirty());
        assert_eq!(session.text(), "hello!");
    }
}
