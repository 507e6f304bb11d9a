//! Per-channel message cache kept consistent with the remote change feed.
//!
//! Root messages live in a single timeline ordered by `(created_at, id)`,
//! oldest first. Replies are kept per thread root. Every id appears at most
//! once across the whole store, whatever order REST responses and feed
//! events arrive in.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use parley_types::events::ChangeEvent;
use parley_types::models::{DeleteType, Message, ReactionGroup};

/// What merging one change did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new message was added. `at_tail` is set when it landed after every
    /// other root message (a genuinely new message rather than backfill).
    Inserted {
        message_id: Uuid,
        author_id: Uuid,
        /// Thread root for replies; `None` for the channel timeline.
        thread_id: Option<Uuid>,
        at_tail: bool,
    },
    Updated(Uuid),
    Deleted {
        message_id: Uuid,
        delete_type: DeleteType,
    },
    Reaction(Uuid),
    /// Unknown message, other channel, or a no-op.
    Ignored,
}

#[derive(Debug)]
pub struct MessageStore {
    channel_id: Uuid,
    timeline: Vec<Message>,
    /// thread root id -> replies, oldest first
    threads: HashMap<Uuid, Vec<Message>>,
    /// Soft-deleted ids whose content has been dropped locally
    sealed: HashSet<Uuid>,
    has_more: bool,
}

impl MessageStore {
    pub fn new(channel_id: Uuid) -> Self {
        Self {
            channel_id,
            timeline: Vec::new(),
            threads: HashMap::new(),
            sealed: HashSet::new(),
            has_more: true,
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// Root messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.timeline
    }

    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Cursor for the next older page.
    /// Pagination cursor: `(created_at, id)` of the oldest root message.
    pub fn oldest_cursor(&self) -> Option<(DateTime<Utc>, Uuid)> {
        self.timeline.first().map(|m| (m.created_at, m.id))
    }

    pub fn newest_cursor(&self) -> Option<(DateTime<Utc>, Uuid)> {
        self.timeline.last().map(|m| (m.created_at, m.id))
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.timeline
            .iter()
            .chain(self.threads.values().flatten())
            .find(|m| m.id == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.get(id).is_some()
    }

    /// Replies to `root_id` that have been loaded or received, oldest first.
    pub fn thread(&self, root_id: Uuid) -> &[Message] {
        self.threads.get(&root_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pinned(&self) -> Vec<&Message> {
        self.timeline
            .iter()
            .chain(self.threads.values().flatten())
            .filter(|m| m.pinned && !m.deleted)
            .collect()
    }

    pub fn has_replies(&self, id: Uuid) -> bool {
        let counted = self.get(id).is_some_and(|m| m.reply_count > 0);
        counted || self.threads.get(&id).is_some_and(|r| !r.is_empty())
    }

    /// Replace the cache with the newest page. `page` may arrive in any order.
    pub fn replace_page(&mut self, page: Vec<Message>, page_size: u32) {
        self.timeline.clear();
        self.threads.clear();
        self.sealed.clear();
        self.has_more = page.len() >= page_size as usize;
        for message in page {
            self.upsert(message);
        }
        debug!(channel_id = %self.channel_id, count = self.timeline.len(), "Loaded initial page");
    }

    /// Merge an older page in front of the timeline. Returns how many
    /// messages were new to the cache.
    pub fn prepend_older(&mut self, page: Vec<Message>, page_size: u32) -> usize {
        self.has_more = page.len() >= page_size as usize;
        let before = self.timeline.len();
        for message in page {
            self.upsert(message);
        }
        let added = self.timeline.len() - before;
        debug!(channel_id = %self.channel_id, added, has_more = self.has_more, "Prepended older page");
        added
    }

    /// Merge a page without touching pagination state.
    pub fn merge_page(&mut self, page: Vec<Message>) {
        for message in page {
            self.upsert(message);
        }
    }

    /// Merge the newest page after the feed dropped events. If the page does
    /// not reach back to the cached tail, whatever lies between is unknown and
    /// the window restarts from this page, so paging back covers the gap.
    /// Returns true when the window was restarted.
    pub fn resync_page(&mut self, page: Vec<Message>, page_size: u32) -> bool {
        let page_oldest = page
            .iter()
            .filter(|m| m.thread_id.is_none())
            .map(|m| (m.created_at, m.id))
            .min();
        let contiguous = match (page_oldest, self.newest_cursor()) {
            (Some(oldest), Some(newest)) => oldest <= newest,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if contiguous {
            self.merge_page(page);
            false
        } else {
            self.replace_page(page, page_size);
            true
        }
    }

    pub fn set_thread(&mut self, root_id: Uuid, replies: Vec<Message>) {
        self.threads.entry(root_id).or_default();
        for reply in replies {
            self.upsert(reply);
        }
    }

    /// Insert or replace a message by id, keeping sort order.
    pub fn upsert(&mut self, mut message: Message) -> Applied {
        if message.channel_id != self.channel_id {
            return Applied::Ignored;
        }
        self.enforce_erasure(&mut message);

        if let Some(slot) = self.find_mut(message.id) {
            let id = message.id;
            *slot = message;
            return Applied::Updated(id);
        }

        let message_id = message.id;
        let author_id = message.author_id;
        let thread_id = message.thread_id;
        let at_tail = match thread_id {
            Some(root_id) => {
                let replies = self.threads.entry(root_id).or_default();
                insert_sorted(replies, message);
                false
            }
            None => insert_sorted(&mut self.timeline, message),
        };
        Applied::Inserted {
            message_id,
            author_id,
            thread_id,
            at_tail,
        }
    }

    /// Merge one change from the feed.
    pub fn apply(&mut self, event: ChangeEvent) -> Applied {
        if event.channel_id() != self.channel_id {
            return Applied::Ignored;
        }
        trace!(channel_id = %self.channel_id, kind = event.kind(), "Merging change");

        match event {
            ChangeEvent::Insert(message) => self.upsert(message),

            ChangeEvent::Update(message) => {
                // Updates for messages outside the loaded window would open
                // a gap in the timeline; a reply only lands if its thread is open.
                let known = self.contains(message.id)
                    || message.thread_id.is_some_and(|root| self.threads.contains_key(&root));
                if known {
                    self.upsert(message)
                } else {
                    Applied::Ignored
                }
            }

            ChangeEvent::Delete {
                id,
                delete_type,
                deleted_at,
                ..
            } => match self.find_mut(id) {
                Some(message) => {
                    message.mark_deleted(delete_type, deleted_at);
                    Applied::Deleted {
                        message_id: id,
                        delete_type,
                    }
                }
                None => Applied::Ignored,
            },

            ChangeEvent::ReactionAdd {
                message_id,
                user_id,
                emoji,
                ..
            } => {
                if self.set_reaction(message_id, user_id, &emoji, true) {
                    Applied::Reaction(message_id)
                } else {
                    Applied::Ignored
                }
            }

            ChangeEvent::ReactionRemove {
                message_id,
                user_id,
                emoji,
                ..
            } => {
                if self.set_reaction(message_id, user_id, &emoji, false) {
                    Applied::Reaction(message_id)
                } else {
                    Applied::Ignored
                }
            }
        }
    }

    /// Marks a message deleted locally. Hard deletes drop content at once.
    pub fn mark_deleted(&mut self, id: Uuid, delete_type: DeleteType, deleted_at: DateTime<Utc>) -> bool {
        match self.find_mut(id) {
            Some(message) => {
                message.mark_deleted(delete_type, deleted_at);
                true
            }
            None => false,
        }
    }

    /// Drops the cached content of a soft-deleted message once it can no
    /// longer be restored from this client. Later copies from the feed are
    /// erased on arrival.
    pub fn seal(&mut self, id: Uuid) {
        let Some(message) = self.find_mut(id) else {
            return;
        };
        if message.is_soft_deleted() {
            message.erase();
            self.sealed.insert(id);
            debug!(message_id = %id, "Sealed soft-deleted message");
        }
    }

    pub fn is_sealed(&self, id: Uuid) -> bool {
        self.sealed.contains(&id)
    }

    pub fn set_pinned(&mut self, id: Uuid, pinned: bool) -> bool {
        match self.find_mut(id) {
            Some(message) if message.pinned != pinned => {
                message.pinned = pinned;
                true
            }
            _ => false,
        }
    }

    pub fn has_reaction(&self, id: Uuid, user_id: Uuid, emoji: &str) -> bool {
        self.get(id).is_some_and(|m| {
            m.reactions
                .iter()
                .any(|g| g.emoji == emoji && g.user_ids.contains(&user_id))
        })
    }

    /// Adds or removes one `(user, emoji)` reaction. Idempotent; returns
    /// whether anything changed.
    pub fn set_reaction(&mut self, id: Uuid, user_id: Uuid, emoji: &str, present: bool) -> bool {
        let Some(message) = self.find_mut(id) else {
            return false;
        };
        if message.deleted {
            return false;
        }
        let groups = &mut message.reactions;
        let idx = groups.iter().position(|g| g.emoji == emoji);

        match (idx, present) {
            (Some(i), true) => {
                let group = &mut groups[i];
                if group.user_ids.contains(&user_id) {
                    return false;
                }
                group.user_ids.push(user_id);
                group.count = group.user_ids.len();
                true
            }
            (None, true) => {
                groups.push(ReactionGroup {
                    emoji: emoji.to_string(),
                    count: 1,
                    user_ids: vec![user_id],
                });
                true
            }
            (Some(i), false) => {
                let group = &mut groups[i];
                let before = group.user_ids.len();
                group.user_ids.retain(|u| *u != user_id);
                group.count = group.user_ids.len();
                let changed = group.count != before;
                if group.count == 0 {
                    groups.remove(i);
                }
                changed
            }
            (None, false) => false,
        }
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.timeline
            .iter_mut()
            .chain(self.threads.values_mut().flatten())
            .find(|m| m.id == id)
    }

    fn enforce_erasure(&mut self, message: &mut Message) {
        if !message.deleted {
            self.sealed.remove(&message.id);
            return;
        }
        if message.is_hard_deleted() || self.sealed.contains(&message.id) {
            message.erase();
        }
    }
}

/// Append when newer than the tail, otherwise insert in sorted position.
/// Returns true when the message became the new tail.
fn insert_sorted(list: &mut Vec<Message>, message: Message) -> bool {
    let key = (message.created_at, message.id);
    let newer_than_tail = list.last().is_none_or(|tail| (tail.created_at, tail.id) < key);
    if newer_than_tail {
        list.push(message);
        return true;
    }
    let pos = list.partition_point(|m| (m.created_at, m.id) < key);
    list.insert(pos, message);
    false
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn at(channel_id: Uuid, minutes: i64) -> Message {
        let base = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Message {
            id: Uuid::new_v4(),
            channel_id,
            thread_id: None,
            author_id: Uuid::new_v4(),
            author_display_name: "alice".into(),
            content: format!("at {minutes}"),
            attachments: Vec::new(),
            created_at: base + TimeDelta::minutes(minutes),
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

    fn ids(store: &MessageStore) -> Vec<Uuid> {
        store.messages().iter().map(|m| m.id).collect()
    }

    #[test]
    fn page_is_sorted_oldest_first() {
        let ch = Uuid::new_v4();
        let (a, b, c) = (at(ch, 0), at(ch, 1), at(ch, 2));
        let mut store = MessageStore::new(ch);
        store.replace_page(vec![c.clone(), b.clone(), a.clone()], 3);

        assert_eq!(ids(&store), vec![a.id, b.id, c.id]);
        assert!(store.has_more());
    }

    #[test]
    fn short_page_means_no_more_history() {
        let ch = Uuid::new_v4();
        let mut store = MessageStore::new(ch);
        store.replace_page(vec![at(ch, 0)], 50);
        assert!(!store.has_more());
    }

    #[test]
    fn resync_page_merges_when_it_reaches_the_tail() {
        let ch = Uuid::new_v4();
        let (a, b, c) = (at(ch, 0), at(ch, 1), at(ch, 2));
        let mut store = MessageStore::new(ch);
        store.replace_page(vec![a.clone(), b.clone()], 2);

        assert!(!store.resync_page(vec![c.clone(), b.clone()], 2));
        assert_eq!(ids(&store), vec![a.id, b.id, c.id]);
    }

    #[test]
    fn resync_page_restarts_window_across_a_gap() {
        let ch = Uuid::new_v4();
        let (a, b) = (at(ch, 0), at(ch, 1));
        let (y, z) = (at(ch, 10), at(ch, 11));
        let mut store = MessageStore::new(ch);
        store.replace_page(vec![a.clone(), b.clone()], 2);

        assert!(store.resync_page(vec![z.clone(), y.clone()], 2));
        assert_eq!(ids(&store), vec![y.id, z.id]);
        assert!(store.has_more());
        assert_eq!(store.oldest_cursor(), Some((y.created_at, y.id)));
    }

    #[test]
    fn out_of_order_insert_lands_in_place() {
        let ch = Uuid::new_v4();
        let (a, b, c) = (at(ch, 0), at(ch, 1), at(ch, 2));
        let mut store = MessageStore::new(ch);
        store.replace_page(vec![a.clone(), c.clone()], 50);

        let applied = store.apply(ChangeEvent::Insert(b.clone()));
        assert!(matches!(applied, Applied::Inserted { at_tail: false, .. }));
        assert_eq!(ids(&store), vec![a.id, b.id, c.id]);

        let d = at(ch, 3);
        let applied = store.apply(ChangeEvent::Insert(d.clone()));
        assert!(matches!(applied, Applied::Inserted { at_tail: true, .. }));
    }

    #[test]
    fn duplicate_insert_becomes_update() {
        let ch = Uuid::new_v4();
        let a = at(ch, 0);
        let mut store = MessageStore::new(ch);
        store.upsert(a.clone());

        let mut edited = a.clone();
        edited.content = "edited".into();
        assert_eq!(store.apply(ChangeEvent::Insert(edited)), Applied::Updated(a.id));
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].content, "edited");
    }

    #[test]
    fn ids_stay_unique_under_any_event_mix() {
        let ch = Uuid::new_v4();
        let msgs: Vec<Message> = (0..6).map(|i| at(ch, i)).collect();
        let mut store = MessageStore::new(ch);
        store.replace_page(msgs[3..].to_vec(), 3);

        for m in msgs.iter().rev() {
            store.apply(ChangeEvent::Insert(m.clone()));
            store.apply(ChangeEvent::Update(m.clone()));
        }
        store.prepend_older(msgs[..4].to_vec(), 4);

        let mut seen = HashSet::new();
        assert!(store.messages().iter().all(|m| seen.insert(m.id)));
        assert_eq!(store.len(), 6);
        let sorted = store
            .messages()
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at);
        assert!(sorted);
    }

    #[test]
    fn update_for_unknown_message_is_ignored() {
        let ch = Uuid::new_v4();
        let mut store = MessageStore::new(ch);
        assert_eq!(store.apply(ChangeEvent::Update(at(ch, 0))), Applied::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn other_channel_is_ignored() {
        let mut store = MessageStore::new(Uuid::new_v4());
        let stranger = at(Uuid::new_v4(), 0);
        assert_eq!(store.apply(ChangeEvent::Insert(stranger)), Applied::Ignored);
    }

    #[test]
    fn soft_delete_keeps_content_until_sealed() {
        let ch = Uuid::new_v4();
        let mut a = at(ch, 0);
        a.pinned = true;
        let mut store = MessageStore::new(ch);
        store.upsert(a.clone());

        store.apply(ChangeEvent::Delete {
            id: a.id,
            channel_id: ch,
            delete_type: DeleteType::Soft,
            deleted_at: Utc::now(),
        });
        let m = store.get(a.id).unwrap();
        assert!(m.deleted);
        assert!(!m.pinned);
        assert_eq!(m.content, "at 0");

        store.seal(a.id);
        assert!(store.get(a.id).unwrap().content.is_empty());

        // A late copy with content is erased on arrival.
        let mut late = a.clone();
        late.deleted = true;
        late.delete_type = Some(DeleteType::Soft);
        store.upsert(late);
        assert!(store.get(a.id).unwrap().content.is_empty());
    }

    #[test]
    fn hard_delete_erases_immediately() {
        let ch = Uuid::new_v4();
        let a = at(ch, 0);
        let mut store = MessageStore::new(ch);
        store.upsert(a.clone());

        store.mark_deleted(a.id, DeleteType::Hard, Utc::now());
        let m = store.get(a.id).unwrap();
        assert!(m.is_hard_deleted());
        assert!(m.content.is_empty());
        assert!(m.attachments.is_empty());
    }

    #[test]
    fn reactions_are_idempotent() {
        let ch = Uuid::new_v4();
        let a = at(ch, 0);
        let user = Uuid::new_v4();
        let mut store = MessageStore::new(ch);
        store.upsert(a.clone());

        let add = ChangeEvent::ReactionAdd {
            channel_id: ch,
            message_id: a.id,
            user_id: user,
            emoji: "👍".into(),
        };
        assert_eq!(store.apply(add.clone()), Applied::Reaction(a.id));
        assert_eq!(store.apply(add), Applied::Ignored);
        assert_eq!(store.get(a.id).unwrap().reactions[0].count, 1);

        let remove = ChangeEvent::ReactionRemove {
            channel_id: ch,
            message_id: a.id,
            user_id: user,
            emoji: "👍".into(),
        };
        assert_eq!(store.apply(remove.clone()), Applied::Reaction(a.id));
        assert_eq!(store.apply(remove), Applied::Ignored);
        assert!(store.get(a.id).unwrap().reactions.is_empty());
    }

    #[test]
    fn replies_are_kept_per_thread() {
        let ch = Uuid::new_v4();
        let mut root = at(ch, 0);
        let mut store = MessageStore::new(ch);
        store.upsert(root.clone());

        let mut reply = at(ch, 1);
        reply.thread_id = Some(root.id);
        let applied = store.apply(ChangeEvent::Insert(reply.clone()));
        assert!(matches!(applied, Applied::Inserted { at_tail: false, .. }));

        root.reply_count = 1;
        store.apply(ChangeEvent::Update(root.clone()));

        assert_eq!(store.len(), 1);
        assert_eq!(store.thread(root.id).len(), 1);
        assert!(store.has_replies(root.id));
        assert!(store.contains(reply.id));
    }

    #[test]
    fn pinned_view_skips_deleted() {
        let ch = Uuid::new_v4();
        let (a, b) = (at(ch, 0), at(ch, 1));
        let mut store = MessageStore::new(ch);
        store.upsert(a.clone());
        store.upsert(b.clone());
        store.set_pinned(a.id, true);
        store.set_pinned(b.id, true);
        store.mark_deleted(b.id, DeleteType::Soft, Utc::now());

        let pinned: Vec<Uuid> = store.pinned().iter().map(|m| m.id).collect();
        assert_eq!(pinned, vec![a.id]);
    }
}
