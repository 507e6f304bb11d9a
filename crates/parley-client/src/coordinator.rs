//! Soft/hard delete flow and the single undo toast.
//!
//! ```text
//! Active ──soft──▶ PendingSoftDelete ──expire / replaced──▶ SoftDeleted
//!    │                    │
//!    │                    └──undo──▶ Active
//!    └──hard──▶ HardDeleted
//! ```
//!
//! Only one delete can be pending at a time. A newer soft delete takes over
//! the toast and the previous one becomes permanent from this client's view.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::api::{DeleteOptions, Viewer};
use parley_types::models::{DeleteType, Message};
use parley_types::ports::RemoteStore;
use parley_types::{ChatError, ChatResult};

use crate::config::ClientConfig;
use crate::policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteState {
    Active,
    PendingSoftDelete,
    SoftDeleted,
    HardDeleted,
}

/// An open delete confirmation. Holds the eligibility facts the dialog
/// renders and the choices the user has made so far.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub message_id: Uuid,
    pub channel_id: Uuid,
    pub has_replies: bool,
    pub can_hard_delete: bool,
    /// Deleting will unpin the message first.
    pub pinned: bool,
    /// Last failure, shown as a banner while the dialog stays open.
    pub error: Option<ChatError>,
    delete_type: DeleteType,
    reason: Option<String>,
    reason_max_len: usize,
}

impl DeleteRequest {
    pub fn delete_type(&self) -> DeleteType {
        self.delete_type
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Hard delete is refused outright for messages with replies.
    pub fn select_type(&mut self, delete_type: DeleteType) -> ChatResult<()> {
        if delete_type == DeleteType::Hard && !self.can_hard_delete {
            return Err(ChatError::Conflict(
                "Messages with replies can only be soft-deleted".into(),
            ));
        }
        self.delete_type = delete_type;
        Ok(())
    }

    pub fn set_reason(&mut self, reason: Option<String>) -> ChatResult<()> {
        let reason = reason.filter(|r| !r.trim().is_empty());
        policy::validate_reason(reason.as_deref(), self.reason_max_len)?;
        self.reason = reason;
        Ok(())
    }

    pub fn apply_options(&mut self, options: DeleteOptions) -> ChatResult<()> {
        self.select_type(options.delete_type)?;
        self.set_reason(options.reason)
    }
}

/// Result of a confirmed delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub message_id: Uuid,
    pub delete_type: DeleteType,
    pub deleted_at: DateTime<Utc>,
    /// A pending delete whose undo was just taken away.
    pub superseded: Option<Uuid>,
}

/// Something the toast did on its own during [`DeleteCoordinator::tick`] or
/// a manual dismiss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastEvent {
    /// The undo window closed (or was dismissed) for this message.
    Expired(Uuid),
    /// A restored/failed notice went away.
    Dismissed,
}

#[derive(Debug, Clone, PartialEq)]
enum ToastState {
    Counting,
    Restored { dismiss_at: Instant },
    Failed { error: ChatError, dismiss_at: Instant },
}

#[derive(Debug, Clone)]
struct UndoToast {
    message_id: Uuid,
    started_at: Instant,
    state: ToastState,
}

/// What the toast should show right now.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastView {
    pub message_id: Uuid,
    pub text: String,
    /// Whole seconds left to undo, rounded up.
    pub remaining_secs: u64,
    /// Elapsed fraction of the undo window, in `[0, 1]`.
    pub progress: f64,
    pub can_undo: bool,
    pub failed: bool,
    pub dismissible: bool,
}

#[derive(Debug)]
pub struct DeleteCoordinator {
    undo_window: Duration,
    restored_toast: Duration,
    failed_toast: Duration,
    edit_window: chrono::TimeDelta,
    reason_max_len: usize,
    toast: Option<UndoToast>,
}

impl DeleteCoordinator {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            undo_window: config.undo_window,
            restored_toast: config.restored_toast,
            failed_toast: config.failed_toast,
            edit_window: config.edit_window,
            reason_max_len: config.reason_max_len,
            toast: None,
        }
    }

    /// Opens a delete confirmation after checking the viewer may delete.
    pub fn request_delete(
        &self,
        message: &Message,
        has_replies: bool,
        viewer: &Viewer,
        now: DateTime<Utc>,
    ) -> ChatResult<DeleteRequest> {
        if message.deleted {
            return Err(ChatError::Conflict("Message is already deleted".into()));
        }
        if !policy::can_delete_message(message, viewer, now, self.edit_window) {
            return Err(ChatError::Permission(
                "Only the author can delete a message, and only within the edit window".into(),
            ));
        }
        Ok(DeleteRequest {
            message_id: message.id,
            channel_id: message.channel_id,
            has_replies,
            can_hard_delete: !has_replies,
            pinned: message.pinned,
            error: None,
            delete_type: DeleteType::Soft,
            reason: None,
            reason_max_len: self.reason_max_len,
        })
    }

    /// Sends the confirmed delete. On failure the error is also stored on
    /// the request so the dialog can show it.
    pub async fn confirm_delete<R>(&mut self, remote: &R, request: &mut DeleteRequest) -> ChatResult<DeleteOutcome>
    where
        R: RemoteStore + ?Sized,
    {
        request.error = None;
        match self.send_delete(remote, request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(message_id = %request.message_id, "Delete failed: {}", e);
                request.error = Some(e.clone());
                Err(e)
            }
        }
    }

    async fn send_delete<R>(&mut self, remote: &R, request: &DeleteRequest) -> ChatResult<DeleteOutcome>
    where
        R: RemoteStore + ?Sized,
    {
        let message_id = request.message_id;
        if request.delete_type == DeleteType::Hard && !request.can_hard_delete {
            return Err(ChatError::Conflict(
                "Messages with replies can only be soft-deleted".into(),
            ));
        }
        if request.pinned {
            remote.unpin_message(message_id).await?;
            debug!(%message_id, "Unpinned before delete");
        }

        match request.delete_type {
            DeleteType::Soft => {
                let receipt = remote
                    .soft_delete_message(message_id, request.reason.clone())
                    .await?;
                let superseded = self.start_countdown(message_id, Instant::now());
                info!(%message_id, "Soft-deleted, undo available");
                Ok(DeleteOutcome {
                    message_id,
                    delete_type: DeleteType::Soft,
                    deleted_at: receipt.deleted_at,
                    superseded,
                })
            }
            DeleteType::Hard => {
                remote.hard_delete_message(message_id).await?;
                info!(%message_id, "Hard-deleted");
                Ok(DeleteOutcome {
                    message_id,
                    delete_type: DeleteType::Hard,
                    deleted_at: Utc::now(),
                    superseded: None,
                })
            }
        }
    }

    fn start_countdown(&mut self, message_id: Uuid, now: Instant) -> Option<Uuid> {
        let superseded = self
            .pending_message()
            .filter(|previous| *previous != message_id);
        if let Some(previous) = superseded {
            debug!(message_id = %previous, "Undo replaced by a newer delete");
        }
        self.toast = Some(UndoToast {
            message_id,
            started_at: now,
            state: ToastState::Counting,
        });
        superseded
    }

    /// Restores the pending soft delete. One shot: the toast switches to a
    /// restored or failed notice either way.
    pub async fn undo<R>(&mut self, remote: &R, message_id: Uuid) -> ChatResult<Message>
    where
        R: RemoteStore + ?Sized,
    {
        let now = Instant::now();
        let pending = self
            .toast
            .as_ref()
            .is_some_and(|t| {
                t.message_id == message_id
                    && t.state == ToastState::Counting
                    && now < t.started_at + self.undo_window
            });
        if !pending {
            return Err(ChatError::Conflict("Undo is no longer available".into()));
        }

        let result = remote.undo_delete(message_id).await;
        let done = Instant::now();
        if let Some(toast) = self.toast.as_mut().filter(|t| t.message_id == message_id) {
            toast.state = match &result {
                Ok(_) => ToastState::Restored {
                    dismiss_at: done + self.restored_toast,
                },
                Err(e) => ToastState::Failed {
                    error: e.clone(),
                    dismiss_at: done + self.failed_toast,
                },
            };
        }
        match &result {
            Ok(_) => info!(%message_id, "Delete undone"),
            Err(e) => warn!(%message_id, "Undo failed: {}", e),
        }
        result
    }

    /// Advances the toast's timers.
    pub fn tick(&mut self, now: Instant) -> Option<ToastEvent> {
        let toast = self.toast.as_ref()?;
        let event = match &toast.state {
            ToastState::Counting if now >= toast.started_at + self.undo_window => {
                ToastEvent::Expired(toast.message_id)
            }
            ToastState::Restored { dismiss_at } | ToastState::Failed { dismiss_at, .. } if now >= *dismiss_at => {
                ToastEvent::Dismissed
            }
            _ => return None,
        };
        if let ToastEvent::Expired(id) = event {
            debug!(message_id = %id, "Undo window closed");
        }
        self.toast = None;
        Some(event)
    }

    /// Closes the toast by hand. Dismissing a countdown gives up the undo.
    pub fn dismiss(&mut self) -> Option<ToastEvent> {
        let toast = self.toast.take()?;
        Some(match toast.state {
            ToastState::Counting => ToastEvent::Expired(toast.message_id),
            _ => ToastEvent::Dismissed,
        })
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.toast.as_ref().map(|t| match &t.state {
            ToastState::Counting => t.started_at + self.undo_window,
            ToastState::Restored { dismiss_at } | ToastState::Failed { dismiss_at, .. } => *dismiss_at,
        })
    }

    /// The message whose delete can still be undone, if any.
    pub fn pending_message(&self) -> Option<Uuid> {
        self.toast
            .as_ref()
            .filter(|t| t.state == ToastState::Counting)
            .map(|t| t.message_id)
    }

    pub fn delete_state(&self, message: &Message) -> DeleteState {
        if !message.deleted {
            DeleteState::Active
        } else if message.is_hard_deleted() {
            DeleteState::HardDeleted
        } else if self.pending_message() == Some(message.id) {
            DeleteState::PendingSoftDelete
        } else {
            DeleteState::SoftDeleted
        }
    }

    pub fn view(&self, now: Instant) -> Option<ToastView> {
        let toast = self.toast.as_ref()?;
        let view = match &toast.state {
            ToastState::Counting => {
                let total = self.undo_window.as_secs_f64();
                let elapsed = now.saturating_duration_since(toast.started_at);
                let remaining = self.undo_window.saturating_sub(elapsed);
                let progress = if total > 0.0 {
                    (elapsed.as_secs_f64() / total).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                ToastView {
                    message_id: toast.message_id,
                    text: "Message deleted".into(),
                    remaining_secs: remaining.as_secs_f64().ceil() as u64,
                    progress,
                    can_undo: !remaining.is_zero(),
                    failed: false,
                    dismissible: true,
                }
            }
            ToastState::Restored { .. } => ToastView {
                message_id: toast.message_id,
                text: "Message restored".into(),
                remaining_secs: 0,
                progress: 1.0,
                can_undo: false,
                failed: false,
                dismissible: false,
            },
            ToastState::Failed { error, .. } => ToastView {
                message_id: toast.message_id,
                text: format!("Couldn't restore message. {}", error.user_message()),
                remaining_secs: 0,
                progress: 1.0,
                can_undo: false,
                failed: true,
                dismissible: true,
            },
        };
        Some(view)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use parley_types::api::{MessageQuery, SendMessageRequest, SoftDeleteReceipt};
    use parley_types::models::Channel;
    use parley_types::ports::ChangeSubscription;

    use super::*;

    /// Records calls; optionally fails undo.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_undo: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl RemoteStore for Recorder {
        async fn fetch_channel(&self, _: Uuid) -> ChatResult<Channel> {
            unimplemented!()
        }
        async fn fetch_messages(&self, _: Uuid, _: MessageQuery) -> ChatResult<Vec<Message>> {
            unimplemented!()
        }
        async fn fetch_thread(&self, _: Uuid) -> ChatResult<Vec<Message>> {
            unimplemented!()
        }
        async fn send_message(&self, _: Uuid, _: SendMessageRequest) -> ChatResult<Message> {
            unimplemented!()
        }
        async fn edit_message(&self, _: Uuid, _: String) -> ChatResult<Message> {
            unimplemented!()
        }
        async fn soft_delete_message(&self, _: Uuid, _: Option<String>) -> ChatResult<SoftDeleteReceipt> {
            self.log("soft");
            Ok(SoftDeleteReceipt { deleted_at: Utc::now() })
        }
        async fn hard_delete_message(&self, _: Uuid) -> ChatResult<()> {
            self.log("hard");
            Ok(())
        }
        async fn undo_delete(&self, id: Uuid) -> ChatResult<Message> {
            self.log("undo");
            if self.fail_undo {
                return Err(ChatError::Network("offline".into()));
            }
            Ok(message(id, Uuid::new_v4()))
        }
        async fn add_reaction(&self, _: Uuid, _: Uuid, _: &str) -> ChatResult<()> {
            unimplemented!()
        }
        async fn remove_reaction(&self, _: Uuid, _: Uuid, _: &str) -> ChatResult<()> {
            unimplemented!()
        }
        async fn pin_message(&self, _: Uuid) -> ChatResult<()> {
            unimplemented!()
        }
        async fn unpin_message(&self, _: Uuid) -> ChatResult<()> {
            self.log("unpin");
            Ok(())
        }
        fn subscribe_to_channel(&self, _: Uuid) -> ChangeSubscription {
            unimplemented!()
        }
    }

    fn message(id: Uuid, author: Uuid) -> Message {
        Message {
            id,
            channel_id: Uuid::nil(),
            thread_id: None,
            author_id: author,
            author_display_name: "alice".into(),
            content: "hello".into(),
            attachments: Vec::new(),
            created_at: Utc::now(),
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

    fn author_of(msg: &Message) -> Viewer {
        Viewer {
            user_id: msg.author_id,
            display_name: "alice".into(),
            elevated: false,
        }
    }

    fn fixture() -> (DeleteCoordinator, Message) {
        let coord = DeleteCoordinator::new(&ClientConfig::default());
        (coord, message(Uuid::new_v4(), Uuid::new_v4()))
    }

    #[test]
    fn replies_block_hard_delete() {
        let (coord, msg) = fixture();
        let mut req = coord
            .request_delete(&msg, true, &author_of(&msg), Utc::now())
            .unwrap();
        assert!(!req.can_hard_delete);
        assert!(req.select_type(DeleteType::Hard).is_err());
        assert_eq!(req.delete_type(), DeleteType::Soft);
    }

    #[test]
    fn stranger_cannot_request_delete() {
        let (coord, msg) = fixture();
        let stranger = Viewer {
            user_id: Uuid::new_v4(),
            display_name: "eve".into(),
            elevated: false,
        };
        let err = coord.request_delete(&msg, false, &stranger, Utc::now()).unwrap_err();
        assert!(matches!(err, ChatError::Permission(_)));
    }

    #[test]
    fn long_reason_is_rejected() {
        let (coord, msg) = fixture();
        let mut req = coord
            .request_delete(&msg, false, &author_of(&msg), Utc::now())
            .unwrap();
        assert!(req.set_reason(Some("x".repeat(501))).is_err());
        assert!(req.set_reason(Some("typo".into())).is_ok());
        assert_eq!(req.reason(), Some("typo"));
    }

    #[tokio::test(start_paused = true)]
    async fn undo_within_window_then_restored_notice() {
        let remote = Recorder::default();
        let (mut coord, msg) = fixture();
        let mut req = coord
            .request_delete(&msg, false, &author_of(&msg), Utc::now())
            .unwrap();
        coord.confirm_delete(&remote, &mut req).await.unwrap();

        let mut deleted = msg.clone();
        deleted.mark_deleted(DeleteType::Soft, Utc::now());
        assert_eq!(coord.delete_state(&deleted), DeleteState::PendingSoftDelete);

        tokio::time::advance(Duration::from_secs(5)).await;
        let view = coord.view(Instant::now()).unwrap();
        assert_eq!(view.remaining_secs, 5);
        assert!((view.progress - 0.5).abs() < 1e-9);
        assert!(view.can_undo);

        coord.undo(&remote, msg.id).await.unwrap();
        assert_eq!(coord.view(Instant::now()).unwrap().text, "Message restored");
        assert!(coord.undo(&remote, msg.id).await.is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(coord.tick(Instant::now()), Some(ToastEvent::Dismissed));
        assert!(coord.view(Instant::now()).is_none());
        assert_eq!(remote.calls(), vec!["soft", "undo"]);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expiry_closes_undo() {
        let remote = Recorder::default();
        let (mut coord, msg) = fixture();
        let mut req = coord
            .request_delete(&msg, false, &author_of(&msg), Utc::now())
            .unwrap();
        coord.confirm_delete(&remote, &mut req).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(coord.tick(Instant::now()), Some(ToastEvent::Expired(msg.id)));
        assert!(coord.undo(&remote, msg.id).await.is_err());

        let mut deleted = msg.clone();
        deleted.mark_deleted(DeleteType::Soft, Utc::now());
        assert_eq!(coord.delete_state(&deleted), DeleteState::SoftDeleted);
        assert_eq!(remote.calls(), vec!["soft"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_undo_shows_error_then_dismisses() {
        let remote = Recorder {
            fail_undo: true,
            ..Default::default()
        };
        let (mut coord, msg) = fixture();
        let mut req = coord
            .request_delete(&msg, false, &author_of(&msg), Utc::now())
            .unwrap();
        coord.confirm_delete(&remote, &mut req).await.unwrap();

        assert!(coord.undo(&remote, msg.id).await.is_err());
        let view = coord.view(Instant::now()).unwrap();
        assert!(view.failed);
        assert!(view.dismissible);
        assert!(!view.can_undo);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(coord.tick(Instant::now()), None);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(coord.tick(Instant::now()), Some(ToastEvent::Dismissed));
    }

    #[tokio::test(start_paused = true)]
    async fn second_delete_supersedes_first() {
        let remote = Recorder::default();
        let (mut coord, first) = fixture();
        let second = message(Uuid::new_v4(), first.author_id);
        let viewer = author_of(&first);

        let mut req = coord.request_delete(&first, false, &viewer, Utc::now()).unwrap();
        coord.confirm_delete(&remote, &mut req).await.unwrap();
        let mut req = coord.request_delete(&second, false, &viewer, Utc::now()).unwrap();
        let outcome = coord.confirm_delete(&remote, &mut req).await.unwrap();

        assert_eq!(outcome.superseded, Some(first.id));
        assert_eq!(coord.pending_message(), Some(second.id));
        assert!(coord.undo(&remote, first.id).await.is_err());
    }

    #[tokio::test]
    async fn pinned_message_is_unpinned_first() {
        let remote = Recorder::default();
        let (mut coord, mut msg) = fixture();
        msg.pinned = true;
        let mut req = coord
            .request_delete(&msg, false, &author_of(&msg), Utc::now())
            .unwrap();
        req.select_type(DeleteType::Hard).unwrap();

        let outcome = coord.confirm_delete(&remote, &mut req).await.unwrap();
        assert_eq!(outcome.delete_type, DeleteType::Hard);
        assert_eq!(remote.calls(), vec!["unpin", "hard"]);
        assert!(coord.next_deadline().is_none());
    }
}
