//! The UI-facing client: one open channel at a time, plus the process-wide
//! undo toast and draft cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::api::{DeleteOptions, MessageQuery, SendMessageRequest, Viewer};
use parley_types::events::ChangeEvent;
use parley_types::models::{Attachment, Channel, DeleteType, Message};
use parley_types::ports::{ChangeSubscription, RemoteStore};
use parley_types::{ChatError, ChatResult};

use crate::actions::MessageActions;
use crate::config::ClientConfig;
use crate::coordinator::{DeleteCoordinator, DeleteOutcome, DeleteRequest, DeleteState, ToastEvent, ToastView};
use crate::drafts::{DraftCache, DraftKey};
use crate::edit::EditSession;
use crate::policy;
use crate::scroll::{Highlight, ScrollAnchor, ScrollCommand, Viewport, should_auto_scroll};
use crate::store::{Applied, MessageStore};
use crate::view::MessageView;

/// A message the viewer just sent, and where the viewport should go.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub message: Message,
    pub scroll: ScrollCommand,
}

/// One change from the feed after it was merged.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub applied: Applied,
    pub scroll: ScrollCommand,
}

/// State that lives exactly as long as a channel is open. Dropping it
/// unsubscribes from the channel's change feed.
struct ChannelSession {
    channel: Channel,
    store: MessageStore,
    subscription: ChangeSubscription,
    edit: Option<EditSession>,
    viewport: Viewport,
    /// Set until the rendering layer reports its first viewport.
    first_load: bool,
    highlight: Highlight,
    /// New messages that arrived while the reader was scrolled up
    unseen: usize,
    /// A change taken off the feed but not merged yet
    inbox: Option<ChangeEvent>,
}

pub struct ChatClient<R: RemoteStore + ?Sized> {
    remote: Arc<R>,
    viewer: Viewer,
    config: ClientConfig,
    coordinator: DeleteCoordinator,
    drafts: Option<DraftCache>,
    session: Option<ChannelSession>,
}

fn no_channel() -> ChatError {
    ChatError::Conflict("No channel is open".into())
}

fn not_loaded(id: Uuid) -> ChatError {
    ChatError::NotFound(format!("message {id}"))
}

impl<R: RemoteStore + ?Sized> ChatClient<R> {
    pub fn new(remote: Arc<R>, viewer: Viewer, config: ClientConfig) -> Self {
        Self {
            coordinator: DeleteCoordinator::new(&config),
            remote,
            viewer,
            config,
            drafts: None,
            session: None,
        }
    }

    pub fn with_drafts(mut self, drafts: DraftCache) -> Self {
        self.drafts = Some(drafts);
        self
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -- Channel lifecycle --

    /// Subscribes to `channel_id` and loads its newest page, replacing
    /// whatever channel was open before.
    pub async fn open_channel(&mut self, channel_id: Uuid) -> ChatResult<ScrollCommand> {
        self.close_channel();

        // Subscribe before fetching so nothing committed in between is missed.
        let subscription = self.remote.subscribe_to_channel(channel_id);
        let channel = self.remote.fetch_channel(channel_id).await?;
        let page = self
            .remote
            .fetch_messages(channel_id, MessageQuery::latest(self.config.page_size))
            .await?;

        let mut store = MessageStore::new(channel_id);
        store.replace_page(page, self.config.page_size);
        info!(%channel_id, name = %channel.name, messages = store.len(), "Channel opened");

        self.session = Some(ChannelSession {
            channel,
            store,
            subscription,
            edit: None,
            viewport: Viewport::default(),
            first_load: true,
            highlight: Highlight::default(),
            unseen: 0,
            inbox: None,
        });
        self.drain_remote_changes().await;
        Ok(ScrollCommand::ToBottom)
    }

    pub fn close_channel(&mut self) {
        if let Some(drafts) = self.drafts.as_mut() {
            if let Err(e) = drafts.flush_all() {
                warn!("Failed to flush drafts: {:#}", e);
            }
        }
        if let Some(session) = self.session.take() {
            info!(channel_id = %session.channel.id, "Channel closed");
        }
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.session.as_ref().map(|s| &s.channel)
    }

    pub fn store(&self) -> Option<&MessageStore> {
        self.session.as_ref().map(|s| &s.store)
    }

    /// Root messages of the open channel, oldest first.
    pub fn messages(&self) -> &[Message] {
        self.session.as_ref().map(|s| s.store.messages()).unwrap_or(&[])
    }

    pub fn has_more_messages(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.store.has_more())
    }

    pub fn pinned_messages(&self) -> Vec<&Message> {
        self.session.as_ref().map(|s| s.store.pinned()).unwrap_or_default()
    }

    pub fn thread(&self, root_id: Uuid) -> &[Message] {
        self.session.as_ref().map(|s| s.store.thread(root_id)).unwrap_or(&[])
    }

    fn session(&self) -> ChatResult<&ChannelSession> {
        self.session.as_ref().ok_or_else(no_channel)
    }

    // -- Scrolling --

    pub fn set_viewport(&mut self, viewport: Viewport) {
        let threshold = self.config.bottom_threshold_px;
        if let Some(s) = self.session.as_mut() {
            s.viewport = viewport;
            s.first_load = false;
            if viewport.is_near_bottom(threshold) {
                s.unseen = 0;
            }
        }
    }

    pub fn unseen_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.unseen)
    }

    /// Fetches the next older page. The returned anchor keeps the reader's
    /// place once the prepended messages are rendered.
    pub async fn load_more_messages(&mut self) -> ChatResult<ScrollCommand> {
        let page_size = self.config.page_size;
        let (channel_id, query, anchor) = {
            let s = self.session()?;
            if !s.store.has_more() {
                return Ok(ScrollCommand::Stay);
            }
            let query = match s.store.oldest_cursor() {
                Some((before, id)) => MessageQuery::before(before, id, page_size),
                None => MessageQuery::latest(page_size),
            };
            (s.store.channel_id(), query, ScrollAnchor::capture(&s.viewport))
        };

        let page = self.remote.fetch_messages(channel_id, query).await?;
        let s = self.session.as_mut().ok_or_else(no_channel)?;
        let added = s.store.prepend_older(page, page_size);
        Ok(if added > 0 {
            ScrollCommand::PreserveAnchor(anchor)
        } else {
            ScrollCommand::Stay
        })
    }

    /// Scrolls to and highlights a loaded message. Messages outside the
    /// loaded history are not fetched.
    pub fn jump_to_message(&mut self, message_id: Uuid, now: Instant) -> ScrollCommand {
        let duration = self.config.highlight;
        match self.session.as_mut() {
            Some(s) if s.store.contains(message_id) => {
                s.highlight.start(message_id, now, duration);
                ScrollCommand::ToMessage(message_id)
            }
            _ => {
                debug!(%message_id, "Jump target not loaded");
                ScrollCommand::Stay
            }
        }
    }

    pub fn highlighted(&self, now: Instant) -> Option<Uuid> {
        self.session.as_ref().and_then(|s| s.highlight.active(now))
    }

    // -- Sending --

    pub async fn send_message(&mut self, content: String, attachments: Vec<Attachment>) -> ChatResult<Sent> {
        self.send(content, attachments, None).await
    }

    pub async fn reply(&mut self, root_id: Uuid, content: String) -> ChatResult<Sent> {
        self.send(content, Vec::new(), Some(root_id)).await
    }

    async fn send(&mut self, content: String, attachments: Vec<Attachment>, thread_id: Option<Uuid>) -> ChatResult<Sent> {
        policy::validate_content(&content, !attachments.is_empty(), self.config.content_max_len)?;
        let channel_id = self.session()?.store.channel_id();

        let message = self
            .remote
            .send_message(
                channel_id,
                SendMessageRequest {
                    content,
                    attachments,
                    thread_id,
                },
            )
            .await?;
        debug!(message_id = %message.id, "Message sent");

        self.clear_draft(thread_id);
        let s = self.session.as_mut().ok_or_else(no_channel)?;
        s.store.upsert(message.clone());

        // Own messages always scroll; replies render in the thread pane.
        let scroll = if thread_id.is_none() {
            s.unseen = 0;
            ScrollCommand::ToBottom
        } else {
            ScrollCommand::Stay
        };
        Ok(Sent { message, scroll })
    }

    // -- Threads --

    pub async fn open_thread(&mut self, root_id: Uuid) -> ChatResult<&[Message]> {
        self.session()?;
        let replies = self.remote.fetch_thread(root_id).await?;
        let s = self.session.as_mut().ok_or_else(no_channel)?;
        s.store.set_thread(root_id, replies);
        Ok(s.store.thread(root_id))
    }

    // -- Editing --

    pub fn begin_edit(&mut self, message_id: Uuid) -> ChatResult<&mut EditSession> {
        let window = self.config.edit_window;
        let s = self.session.as_mut().ok_or_else(no_channel)?;
        let message = s.store.get(message_id).ok_or_else(|| not_loaded(message_id))?;
        let edit = EditSession::begin(message, &self.viewer, Utc::now(), window)?;
        Ok(s.edit.insert(edit))
    }

    pub fn editing(&self) -> Option<&EditSession> {
        self.session.as_ref().and_then(|s| s.edit.as_ref())
    }

    pub fn editing_mut(&mut self) -> Option<&mut EditSession> {
        self.session.as_mut().and_then(|s| s.edit.as_mut())
    }

    /// Saves the open edit. Edit mode closes on success and stays open,
    /// text intact, on failure.
    pub async fn save_edit(&mut self) -> ChatResult<Option<Message>> {
        let max_len = self.config.content_max_len;
        let s = self.session.as_mut().ok_or_else(no_channel)?;
        let edit = s
            .edit
            .as_mut()
            .ok_or_else(|| ChatError::Conflict("No edit in progress".into()))?;

        let updated = edit.save(&*self.remote, max_len).await?;
        s.edit = None;
        if let Some(message) = &updated {
            s.store.upsert(message.clone());
        }
        Ok(updated)
    }

    pub fn cancel_edit(&mut self) {
        if let Some(edit) = self.session.as_mut().and_then(|s| s.edit.take()) {
            debug!(message_id = %edit.message_id(), "Edit cancelled");
        }
    }

    /// One-shot edit: begin, replace the text, save.
    pub async fn edit_message(&mut self, message_id: Uuid, content: String) -> ChatResult<Message> {
        self.begin_edit(message_id)?.set_text(content);
        match self.save_edit().await? {
            Some(message) => Ok(message),
            None => self
                .session()?
                .store
                .get(message_id)
                .cloned()
                .ok_or_else(|| not_loaded(message_id)),
        }
    }

    // -- Deleting --

    pub fn request_delete(&self, message_id: Uuid) -> ChatResult<DeleteRequest> {
        let s = self.session()?;
        let message = s.store.get(message_id).ok_or_else(|| not_loaded(message_id))?;
        self.coordinator
            .request_delete(message, s.store.has_replies(message_id), &self.viewer, Utc::now())
    }

    pub async fn confirm_delete(&mut self, request: &mut DeleteRequest) -> ChatResult<DeleteOutcome> {
        let outcome = self.coordinator.confirm_delete(&*self.remote, request).await?;
        if let Some(s) = self.session.as_mut() {
            s.store
                .mark_deleted(outcome.message_id, outcome.delete_type, outcome.deleted_at);
            if let Some(previous) = outcome.superseded {
                s.store.seal(previous);
            }
            if s.edit.as_ref().is_some_and(|e| e.message_id() == outcome.message_id) {
                s.edit = None;
            }
        }
        Ok(outcome)
    }

    pub async fn delete_message(&mut self, message_id: Uuid, options: DeleteOptions) -> ChatResult<DeleteOutcome> {
        let mut request = self.request_delete(message_id)?;
        request.apply_options(options)?;
        self.confirm_delete(&mut request).await
    }

    pub async fn undo_delete_message(&mut self, message_id: Uuid) -> ChatResult<Message> {
        let result = self.coordinator.undo(&*self.remote, message_id).await;
        let pending = self.coordinator.pending_message() == Some(message_id);
        let Some(s) = self.session.as_mut() else {
            return result;
        };
        match &result {
            Ok(restored) => {
                s.store.upsert(restored.clone());
            }
            // The undo chance is spent; drop the retained content.
            Err(_) if !pending => s.store.seal(message_id),
            Err(_) => {}
        }
        result
    }

    pub fn delete_state(&self, message: &Message) -> DeleteState {
        self.coordinator.delete_state(message)
    }

    pub fn toast(&self, now: Instant) -> Option<ToastView> {
        self.coordinator.view(now)
    }

    pub fn dismiss_toast(&mut self) {
        if let Some(event) = self.coordinator.dismiss() {
            self.on_toast_event(event);
        }
    }

    fn on_toast_event(&mut self, event: ToastEvent) {
        if let (ToastEvent::Expired(id), Some(s)) = (event, self.session.as_mut()) {
            s.store.seal(id);
        }
    }

    // -- Reactions and pins --

    /// Flips the viewer's reaction locally, then on the server. A failed
    /// request puts the local state back.
    pub async fn toggle_reaction(&mut self, message_id: Uuid, emoji: &str) -> ChatResult<bool> {
        let me = self.viewer.user_id;
        let s = self.session.as_mut().ok_or_else(no_channel)?;
        let message = s.store.get(message_id).ok_or_else(|| not_loaded(message_id))?;
        if message.deleted {
            return Err(ChatError::Conflict("Cannot react to a deleted message".into()));
        }
        let had = s.store.has_reaction(message_id, me, emoji);
        s.store.set_reaction(message_id, me, emoji, !had);

        let result = if had {
            self.remote.remove_reaction(message_id, me, emoji).await
        } else {
            self.remote.add_reaction(message_id, me, emoji).await
        };
        if let Err(e) = result {
            warn!(%message_id, "Reaction failed, rolling back: {}", e);
            if let Some(s) = self.session.as_mut() {
                s.store.set_reaction(message_id, me, emoji, had);
            }
            return Err(e);
        }
        Ok(!had)
    }

    pub async fn set_pinned(&mut self, message_id: Uuid, pinned: bool) -> ChatResult<()> {
        let message = self
            .session()?
            .store
            .get(message_id)
            .ok_or_else(|| not_loaded(message_id))?;
        if pinned && message.deleted {
            return Err(ChatError::Conflict("Deleted messages cannot be pinned".into()));
        }
        if pinned {
            self.remote.pin_message(message_id).await?;
        } else {
            self.remote.unpin_message(message_id).await?;
        }
        if let Some(s) = self.session.as_mut() {
            s.store.set_pinned(message_id, pinned);
        }
        Ok(())
    }

    // -- Policy --

    pub fn is_within_edit_window(&self, message: &Message) -> bool {
        policy::is_within_edit_window(message, Utc::now(), self.config.edit_window)
    }

    pub fn can_edit_message(&self, message: &Message) -> bool {
        policy::can_edit_message(message, &self.viewer, Utc::now(), self.config.edit_window)
    }

    pub fn can_delete_message(&self, message: &Message) -> bool {
        policy::can_delete_message(message, &self.viewer, Utc::now(), self.config.edit_window)
    }

    // -- Drafts --

    fn draft_key(&self, thread_id: Option<Uuid>) -> Option<DraftKey> {
        let channel_id = self.session.as_ref()?.store.channel_id();
        Some(DraftKey { channel_id, thread_id })
    }

    pub fn draft(&self, thread_id: Option<Uuid>) -> Option<String> {
        let key = self.draft_key(thread_id)?;
        match self.drafts.as_ref()?.get(&key) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read draft: {:#}", e);
                None
            }
        }
    }

    pub fn stage_draft(&mut self, thread_id: Option<Uuid>, text: impl Into<String>, now: Instant) {
        if let (Some(key), Some(drafts)) = (self.draft_key(thread_id), self.drafts.as_mut()) {
            drafts.stage(key, text, now);
        }
    }

    fn clear_draft(&mut self, thread_id: Option<Uuid>) {
        if let (Some(key), Some(drafts)) = (self.draft_key(thread_id), self.drafts.as_mut()) {
            if let Err(e) = drafts.clear(&key) {
                warn!("Failed to clear draft: {:#}", e);
            }
        }
    }

    // -- Timers --

    /// Runs every timer that is due. Returns true when something visible
    /// changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if let Some(event) = self.coordinator.tick(now) {
            self.on_toast_event(event);
            changed = true;
        }
        if let Some(s) = self.session.as_mut() {
            changed |= s.highlight.tick(now).is_some();
        }
        if let Some(drafts) = self.drafts.as_mut() {
            if let Err(e) = drafts.flush_due(now) {
                warn!("Failed to flush drafts: {:#}", e);
            }
        }
        changed
    }

    /// The earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.coordinator.next_deadline(),
            self.session.as_ref().and_then(|s| s.highlight.deadline()),
            self.drafts.as_ref().and_then(|d| d.next_deadline()),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // -- Change feed --

    /// Waits for the next change on the open channel and merges it.
    /// Returns `None` when no channel is open or the feed has closed.
    ///
    /// Cancel-safe: a received change is parked in the session until it has
    /// been merged, so dropping this future inside `select!` loses nothing.
    pub async fn next_remote_change(&mut self) -> Option<RemoteChange> {
        let s = self.session.as_mut()?;
        if s.inbox.is_none() {
            s.inbox = Some(s.subscription.recv().await?);
        }
        self.take_next_change().await
    }

    /// Merges every change that is already queued.
    pub async fn drain_remote_changes(&mut self) -> Vec<RemoteChange> {
        let mut changes = Vec::new();
        loop {
            let Some(s) = self.session.as_mut() else {
                break;
            };
            if s.inbox.is_none() {
                s.inbox = s.subscription.try_recv();
            }
            match self.take_next_change().await {
                Some(change) => changes.push(change),
                None => break,
            }
        }
        changes
    }

    async fn take_next_change(&mut self) -> Option<RemoteChange> {
        self.resync_if_lagged().await;
        let event = self.session.as_mut()?.inbox.take()?;
        Some(self.apply_change(event))
    }

    /// Reloads the newest page after the feed dropped events. The lag flag
    /// is only cleared once the reload has finished.
    async fn resync_if_lagged(&mut self) {
        let Some(s) = self.session.as_ref() else {
            return;
        };
        if !s.subscription.is_lagged() {
            return;
        }
        let channel_id = s.store.channel_id();
        let page_size = self.config.page_size;
        let result = self
            .remote
            .fetch_messages(channel_id, MessageQuery::latest(page_size))
            .await;
        let Some(s) = self.session.as_mut() else {
            return;
        };
        s.subscription.take_lagged();
        match result {
            Ok(page) => {
                if s.store.resync_page(page, page_size) {
                    info!(%channel_id, "Resynced after change feed lag, history window restarted");
                } else {
                    info!(%channel_id, "Resynced after change feed lag");
                }
            }
            Err(e) => warn!(%channel_id, "Resync after lag failed: {}", e),
        }
    }

    fn apply_change(&mut self, event: ChangeEvent) -> RemoteChange {
        let pending = self.coordinator.pending_message();
        let me = self.viewer.user_id;
        let threshold = self.config.bottom_threshold_px;
        let Some(s) = self.session.as_mut() else {
            return RemoteChange {
                applied: Applied::Ignored,
                scroll: ScrollCommand::Stay,
            };
        };

        let applied = s.store.apply(event);
        let mut scroll = ScrollCommand::Stay;
        match applied {
            Applied::Inserted {
                author_id,
                thread_id: None,
                at_tail,
                ..
            } => {
                if should_auto_scroll(s.first_load, &s.viewport, threshold, author_id == me) {
                    s.unseen = 0;
                    scroll = ScrollCommand::ToBottom;
                } else if at_tail {
                    s.unseen += 1;
                }
            }
            Applied::Deleted {
                message_id,
                delete_type,
            } => {
                // Someone else's soft delete is never undoable from here.
                if delete_type == DeleteType::Soft && pending != Some(message_id) {
                    s.store.seal(message_id);
                }
                if s.edit.as_ref().is_some_and(|e| e.message_id() == message_id) {
                    debug!(%message_id, "Edited message was deleted remotely");
                    s.edit = None;
                }
            }
            _ => {}
        }
        RemoteChange { applied, scroll }
    }

    // -- Views --

    pub fn message_views(&self, now: Instant) -> Vec<MessageView> {
        self.views_of(self.messages(), now)
    }

    pub fn thread_views(&self, root_id: Uuid, now: Instant) -> Vec<MessageView> {
        self.views_of(self.thread(root_id), now)
    }

    fn views_of(&self, messages: &[Message], now: Instant) -> Vec<MessageView> {
        let highlighted = self.highlighted(now);
        messages
            .iter()
            .map(|m| {
                MessageView::build(
                    m,
                    self.viewer.user_id,
                    self.coordinator.delete_state(m),
                    highlighted == Some(m.id),
                )
            })
            .collect()
    }
}

impl<R: RemoteStore + ?Sized> Drop for ChatClient<R> {
    fn drop(&mut self) {
        self.close_channel();
    }
}

#[async_trait]
impl<R: RemoteStore + ?Sized> MessageActions for ChatClient<R> {
    fn can_edit(&self, message: &Message) -> bool {
        self.can_edit_message(message)
    }

    fn can_delete(&self, message: &Message) -> bool {
        self.can_delete_message(message)
    }

    async fn on_edit(&mut self, message_id: Uuid, content: String) -> ChatResult<Message> {
        self.edit_message(message_id, content).await
    }

    async fn on_delete(&mut self, message_id: Uuid, options: DeleteOptions) -> ChatResult<DeleteOutcome> {
        self.delete_message(message_id, options).await
    }

    async fn on_undo(&mut self, message_id: Uuid) -> ChatResult<Message> {
        self.undo_delete_message(message_id).await
    }

    async fn on_react(&mut self, message_id: Uuid, emoji: &str) -> ChatResult<bool> {
        self.toggle_reaction(message_id, emoji).await
    }

    async fn on_pin(&mut self, message_id: Uuid, pinned: bool) -> ChatResult<()> {
        self.set_pinned(message_id, pinned).await
    }

    async fn on_reply(&mut self, root_id: Uuid, content: String) -> ChatResult<Message> {
        self.reply(root_id, content).await.map(|sent| sent.message)
    }
}
