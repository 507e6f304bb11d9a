//! The remote store contract the client core is written against.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;
use uuid::Uuid;

use crate::api::{MessageQuery, SendMessageRequest, SoftDeleteReceipt};
use crate::error::ChatResult;
use crate::events::ChangeEvent;
use crate::models::{Channel, Message};

/// Request/response operations offered by the backend, plus its change feed.
///
/// Calls are made on behalf of whichever user the implementation was
/// connected as. Results never arrive in a guaranteed order relative to the
/// change feed.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_channel(&self, channel_id: Uuid) -> ChatResult<Channel>;

    /// Root messages of a channel, newest first, at most `query.limit`.
    async fn fetch_messages(&self, channel_id: Uuid, query: MessageQuery) -> ChatResult<Vec<Message>>;

    /// All replies addressed to `root_id`, oldest first.
    async fn fetch_thread(&self, root_id: Uuid) -> ChatResult<Vec<Message>>;

    async fn send_message(&self, channel_id: Uuid, req: SendMessageRequest) -> ChatResult<Message>;

    async fn edit_message(&self, message_id: Uuid, new_content: String) -> ChatResult<Message>;

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        reason: Option<String>,
    ) -> ChatResult<SoftDeleteReceipt>;

    async fn hard_delete_message(&self, message_id: Uuid) -> ChatResult<()>;

    async fn undo_delete(&self, message_id: Uuid) -> ChatResult<Message>;

    /// Idempotent: adding an existing reaction is not an error.
    async fn add_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> ChatResult<()>;

    /// Idempotent: removing a missing reaction is not an error.
    async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> ChatResult<()>;

    async fn pin_message(&self, message_id: Uuid) -> ChatResult<()>;

    async fn unpin_message(&self, message_id: Uuid) -> ChatResult<()>;

    fn subscribe_to_channel(&self, channel_id: Uuid) -> ChangeSubscription;
}

type UnsubscribeHook = Box<dyn FnOnce() + Send + Sync>;

/// A live change feed for one channel. Dropping it unsubscribes.
pub struct ChangeSubscription {
    channel_id: Uuid,
    rx: broadcast::Receiver<ChangeEvent>,
    lagged: bool,
    on_unsubscribe: Option<UnsubscribeHook>,
}

impl ChangeSubscription {
    pub fn new(
        channel_id: Uuid,
        rx: broadcast::Receiver<ChangeEvent>,
        on_unsubscribe: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            channel_id,
            rx,
            lagged: false,
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// Waits for the next change. Returns `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => {
                    warn!(channel_id = %self.channel_id, "Change feed lagged by {} events", n);
                    self.lagged = true;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns a change that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => {
                    warn!(channel_id = %self.channel_id, "Change feed lagged by {} events", n);
                    self.lagged = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn is_lagged(&self) -> bool {
        self.lagged
    }

    /// Reports (and clears) whether events were dropped since the last call.
    pub fn take_lagged(&mut self) -> bool {
        std::mem::take(&mut self.lagged)
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_unsubscribe.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("channel_id", &self.channel_id)
            .field("lagged", &self.lagged)
            .finish()
    }
}
