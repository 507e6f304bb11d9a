use async_trait::async_trait;
use uuid::Uuid;

use parley_types::ChatResult;
use parley_types::api::DeleteOptions;
use parley_types::models::Message;

use crate::coordinator::DeleteOutcome;

/// Per-message actions offered to the rendering layer.
///
/// Message rows call into this instead of carrying one callback per action.
#[async_trait]
pub trait MessageActions: Send {
    fn can_edit(&self, message: &Message) -> bool;

    fn can_delete(&self, message: &Message) -> bool;

    async fn on_edit(&mut self, message_id: Uuid, content: String) -> ChatResult<Message>;

    async fn on_delete(&mut self, message_id: Uuid, options: DeleteOptions) -> ChatResult<DeleteOutcome>;

    async fn on_undo(&mut self, message_id: Uuid) -> ChatResult<Message>;

    /// Toggles the viewer's reaction. Returns whether it is now present.
    async fn on_react(&mut self, message_id: Uuid, emoji: &str) -> ChatResult<bool>;

    async fn on_pin(&mut self, message_id: Uuid, pinned: bool) -> ChatResult<()>;

    async fn on_reply(&mut self, root_id: Uuid, content: String) -> ChatResult<Message>;
}
