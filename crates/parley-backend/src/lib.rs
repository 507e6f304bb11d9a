//! Embedded backend implementing the `RemoteStore` contract over SQLite.
//!
//! Each write is committed first and then published on the channel's change
//! feed, the way a hosted backend would emit row-change notifications.

pub mod channels;
pub mod messages;
pub mod reactions;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::Dispatcher;
use parley_types::api::{MessageQuery, SendMessageRequest, SoftDeleteReceipt, Viewer};
use parley_types::models::{Channel, Message};
use parley_types::ports::{ChangeSubscription, RemoteStore};
use parley_types::{ChatError, ChatResult};

pub struct BackendInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
}

/// Shared backend state. Hand out per-user handles with [`LocalBackend::connect`].
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<BackendInner>,
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                db,
                dispatcher: Dispatcher::new(),
            }),
        }
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// A handle that issues calls on behalf of `viewer`.
    pub fn connect(&self, viewer: Viewer) -> LocalConnection {
        LocalConnection {
            inner: self.inner.clone(),
            viewer,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }
}

/// A connection bound to one signed-in user.
#[derive(Clone)]
pub struct LocalConnection {
    inner: Arc<BackendInner>,
    viewer: Viewer,
}

impl LocalConnection {
    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Run blocking DB work off the async runtime.
    pub(crate) async fn blocking<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&BackendInner) -> ChatResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::Network("backend task failed".into())
            })?
    }

    pub(crate) fn publish(&self, event: parley_types::events::ChangeEvent) {
        self.inner.dispatcher.publish(event);
    }
}

/// Storage failures look like failed requests from the caller's side.
pub(crate) fn storage_err(e: anyhow::Error) -> ChatError {
    error!("Storage error: {:#}", e);
    ChatError::Network("storage unavailable".into())
}

#[async_trait]
impl RemoteStore for LocalConnection {
    async fn fetch_channel(&self, channel_id: Uuid) -> ChatResult<Channel> {
        channels::fetch_channel(self, channel_id).await
    }

    async fn fetch_messages(&self, channel_id: Uuid, query: MessageQuery) -> ChatResult<Vec<Message>> {
        messages::fetch_messages(self, channel_id, query).await
    }

    async fn fetch_thread(&self, root_id: Uuid) -> ChatResult<Vec<Message>> {
        messages::fetch_thread(self, root_id).await
    }

    async fn send_message(&self, channel_id: Uuid, req: SendMessageRequest) -> ChatResult<Message> {
        messages::send_message(self, channel_id, req).await
    }

    async fn edit_message(&self, message_id: Uuid, new_content: String) -> ChatResult<Message> {
        messages::edit_message(self, message_id, new_content).await
    }

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        reason: Option<String>,
    ) -> ChatResult<SoftDeleteReceipt> {
        messages::soft_delete_message(self, message_id, reason).await
    }

    async fn hard_delete_message(&self, message_id: Uuid) -> ChatResult<()> {
        messages::hard_delete_message(self, message_id).await
    }

    async fn undo_delete(&self, message_id: Uuid) -> ChatResult<Message> {
        messages::undo_delete(self, message_id).await
    }

    async fn add_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> ChatResult<()> {
        reactions::add_reaction(self, message_id, user_id, emoji.to_string()).await
    }

    async fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> ChatResult<()> {
        reactions::remove_reaction(self, message_id, user_id, emoji.to_string()).await
    }

    async fn pin_message(&self, message_id: Uuid) -> ChatResult<()> {
        messages::set_pinned(self, message_id, true).await
    }

    async fn unpin_message(&self, message_id: Uuid) -> ChatResult<()> {
        messages::set_pinned(self, message_id, false).await
    }

    fn subscribe_to_channel(&self, channel_id: Uuid) -> ChangeSubscription {
        self.inner.dispatcher.subscribe(channel_id)
    }
}
