use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::models::{MessageRow, NewMessage, format_ts, parse_ts};
use parley_types::api::{MAX_PAGE_SIZE, MessageQuery, SendMessageRequest, SoftDeleteReceipt};
use parley_types::events::ChangeEvent;
use parley_types::models::{Attachment, DeleteType, Message, ReactionGroup};
use parley_types::{ChatError, ChatResult};

use crate::{BackendInner, LocalBackend, LocalConnection, storage_err};

pub async fn fetch_messages(
    conn: &LocalConnection,
    channel_id: Uuid,
    query: MessageQuery,
) -> ChatResult<Vec<Message>> {
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let before = query.before.map(format_ts);
    let before_id = query.before_id.map(|id| id.to_string());
    conn.blocking(move |inner| {
        let cid = channel_id.to_string();
        if inner.db.get_channel(&cid).map_err(storage_err)?.is_none() {
            return Err(ChatError::NotFound(format!("channel {channel_id}")));
        }
        let rows = inner
            .db
            .get_messages(&cid, limit, before.as_deref().map(|at| (at, before_id.as_deref())))
            .map_err(storage_err)?;
        hydrate(inner, rows, true)
    })
    .await
}

pub async fn fetch_thread(conn: &LocalConnection, root_id: Uuid) -> ChatResult<Vec<Message>> {
    conn.blocking(move |inner| {
        let rid = root_id.to_string();
        if inner.db.get_message(&rid).map_err(storage_err)?.is_none() {
            return Err(ChatError::NotFound(format!("message {root_id}")));
        }
        let rows = inner.db.get_thread(&rid).map_err(storage_err)?;
        hydrate(inner, rows, true)
    })
    .await
}

pub async fn send_message(
    conn: &LocalConnection,
    channel_id: Uuid,
    req: SendMessageRequest,
) -> ChatResult<Message> {
    if req.content.trim().is_empty() && req.attachments.is_empty() {
        return Err(ChatError::Validation("Message cannot be empty".into()));
    }

    let viewer = conn.viewer().clone();
    let message_id = Uuid::new_v4();
    let attachments = serde_json::to_string(&req.attachments)
        .map_err(|e| ChatError::Validation(format!("Invalid attachments: {e}")))?;

    let (message, root) = conn
        .blocking(move |inner| {
            let cid = channel_id.to_string();
            if inner.db.get_channel(&cid).map_err(storage_err)?.is_none() {
                return Err(ChatError::NotFound(format!("channel {channel_id}")));
            }
            let thread_id = req.thread_id.map(|t| t.to_string());
            if let Some(root_id) = &thread_id {
                let root = inner
                    .db
                    .get_message(root_id)
                    .map_err(storage_err)?
                    .ok_or_else(|| ChatError::NotFound(format!("thread root {root_id}")))?;
                if root.channel_id != cid || root.thread_id.is_some() {
                    return Err(ChatError::Validation("Replies must target a root message in the same channel".into()));
                }
                if root.deleted {
                    return Err(ChatError::Conflict("Cannot reply to a deleted message".into()));
                }
            }

            let mid = message_id.to_string();
            let aid = viewer.user_id.to_string();
            inner
                .db
                .insert_message(&NewMessage {
                    id: &mid,
                    channel_id: &cid,
                    thread_id: thread_id.as_deref(),
                    author_id: &aid,
                    author_display_name: &viewer.display_name,
                    content: &req.content,
                    attachments: &attachments,
                    created_at: &format_ts(Utc::now()),
                })
                .map_err(storage_err)?;
            inner.db.add_channel_member(&cid, &aid).map_err(storage_err)?;

            let message = load_one(inner, &mid)?;
            let root = match &thread_id {
                Some(root_id) => Some(load_one(inner, root_id)?),
                None => None,
            };
            Ok((message, root))
        })
        .await?;

    conn.publish(ChangeEvent::Insert(message.clone()));
    if let Some(root) = root {
        // reply_count changed on the root
        conn.publish(ChangeEvent::Update(root));
    }
    Ok(message)
}

pub async fn edit_message(
    conn: &LocalConnection,
    message_id: Uuid,
    new_content: String,
) -> ChatResult<Message> {
    if new_content.trim().is_empty() {
        return Err(ChatError::Validation("Message cannot be empty".into()));
    }
    let viewer_id = conn.viewer().user_id.to_string();

    let message = conn
        .blocking(move |inner| {
            let mid = message_id.to_string();
            let row = find_row(inner, &mid)?;
            if row.author_id != viewer_id {
                return Err(ChatError::Permission("Only the author can edit a message".into()));
            }
            if row.deleted {
                return Err(ChatError::Conflict("Deleted messages cannot be edited".into()));
            }
            inner
                .db
                .update_message_content(&mid, &new_content, &format_ts(Utc::now()))
                .map_err(storage_err)?;
            load_one(inner, &mid)
        })
        .await?;

    conn.publish(ChangeEvent::Update(message.clone()));
    Ok(message)
}

pub async fn soft_delete_message(
    conn: &LocalConnection,
    message_id: Uuid,
    reason: Option<String>,
) -> ChatResult<SoftDeleteReceipt> {
    let viewer = conn.viewer().clone();
    let deleted_at = Utc::now();

    let channel_id = conn
        .blocking(move |inner| {
            let mid = message_id.to_string();
            let row = find_row(inner, &mid)?;
            check_can_delete(&row, &viewer)?;
            let changed = inner
                .db
                .soft_delete_message(&mid, &format_ts(deleted_at), reason.as_deref())
                .map_err(storage_err)?;
            if changed == 0 {
                return Err(ChatError::Conflict("Message is already deleted".into()));
            }
            parse_uuid(&row.channel_id, &mid)
        })
        .await?;

    info!(%message_id, "Message soft-deleted");
    conn.publish(ChangeEvent::Delete {
        id: message_id,
        channel_id,
        delete_type: DeleteType::Soft,
        deleted_at,
    });
    Ok(SoftDeleteReceipt { deleted_at })
}

pub async fn hard_delete_message(conn: &LocalConnection, message_id: Uuid) -> ChatResult<()> {
    let viewer = conn.viewer().clone();
    let deleted_at = Utc::now();

    let channel_id = conn
        .blocking(move |inner| {
            let mid = message_id.to_string();
            let row = find_row(inner, &mid)?;
            check_can_delete(&row, &viewer)?;
            if row.reply_count > 0 {
                return Err(ChatError::Conflict(
                    "Messages with replies can only be soft-deleted".into(),
                ));
            }
            let changed = inner
                .db
                .hard_delete_message(&mid, &format_ts(deleted_at))
                .map_err(storage_err)?;
            if changed == 0 {
                return Err(ChatError::NotFound(format!("message {message_id}")));
            }
            parse_uuid(&row.channel_id, &mid)
        })
        .await?;

    info!(%message_id, "Message hard-deleted");
    conn.publish(ChangeEvent::Delete {
        id: message_id,
        channel_id,
        delete_type: DeleteType::Hard,
        deleted_at,
    });
    Ok(())
}

pub async fn undo_delete(conn: &LocalConnection, message_id: Uuid) -> ChatResult<Message> {
    let viewer = conn.viewer().clone();

    let message = conn
        .blocking(move |inner| {
            let mid = message_id.to_string();
            let row = find_row(inner, &mid)?;
            check_can_delete(&row, &viewer)?;
            let changed = inner.db.restore_message(&mid).map_err(storage_err)?;
            if changed == 0 {
                return Err(ChatError::Conflict("Only soft-deleted messages can be restored".into()));
            }
            load_one(inner, &mid)
        })
        .await?;

    info!(%message_id, "Message restored");
    conn.publish(ChangeEvent::Update(message.clone()));
    Ok(message)
}

pub async fn set_pinned(conn: &LocalConnection, message_id: Uuid, pinned: bool) -> ChatResult<()> {
    let changed = conn
        .blocking(move |inner| {
            let mid = message_id.to_string();
            let row = find_row(inner, &mid)?;
            if row.deleted && pinned {
                return Err(ChatError::Conflict("Deleted messages cannot be pinned".into()));
            }
            let n = inner.db.set_pinned(&mid, pinned).map_err(storage_err)?;
            if n == 0 {
                return Ok(None);
            }
            load_one(inner, &mid).map(Some)
        })
        .await?;

    // Pinning twice is a no-op and emits nothing.
    if let Some(message) = changed {
        conn.publish(ChangeEvent::Update(message));
    }
    Ok(())
}

impl LocalBackend {
    /// Links a message to an externally managed task and notifies subscribers.
    pub fn link_task(&self, message_id: Uuid, task_id: Option<Uuid>) -> ChatResult<Message> {
        let mid = message_id.to_string();
        let tid = task_id.map(|t| t.to_string());
        let n = self.db().set_task(&mid, tid.as_deref()).map_err(storage_err)?;
        if n == 0 {
            return Err(ChatError::NotFound(format!("message {message_id}")));
        }
        let message = load_one(&self.inner, &mid)?;
        self.dispatcher().publish(ChangeEvent::Update(message.clone()));
        Ok(message)
    }
}

fn find_row(inner: &BackendInner, id: &str) -> ChatResult<MessageRow> {
    inner
        .db
        .get_message(id)
        .map_err(storage_err)?
        .ok_or_else(|| ChatError::NotFound(format!("message {id}")))
}

fn load_one(inner: &BackendInner, id: &str) -> ChatResult<Message> {
    let row = find_row(inner, id)?;
    hydrate(inner, vec![row], false)?
        .pop()
        .ok_or_else(|| ChatError::NotFound(format!("message {id}")))
}

fn check_can_delete(row: &MessageRow, viewer: &parley_types::api::Viewer) -> ChatResult<()> {
    if row.author_id != viewer.user_id.to_string() && !viewer.elevated {
        return Err(ChatError::Permission("Only the author or a moderator can delete this message".into()));
    }
    Ok(())
}

fn parse_uuid(raw: &str, message_id: &str) -> ChatResult<Uuid> {
    raw.parse().map_err(|e| {
        warn!("Corrupt id '{}' on message '{}': {}", raw, message_id, e);
        ChatError::Network("storage returned a corrupt row".into())
    })
}

/// Attach reactions and convert rows. Deleted rows are redacted when
/// `redact` is set: list readers only ever see a placeholder.
fn hydrate(inner: &BackendInner, rows: Vec<MessageRow>, redact: bool) -> ChatResult<Vec<Message>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let reaction_rows = inner.db.get_reactions_for_messages(&ids).map_err(storage_err)?;

    // Group reactions by message_id -> emoji -> user_ids, keeping first-seen emoji order
    let mut reaction_map: HashMap<String, Vec<ReactionGroup>> = HashMap::new();
    for r in reaction_rows {
        let Ok(uid) = r.user_id.parse::<Uuid>() else {
            warn!("Corrupt reaction user_id '{}' on message '{}'", r.user_id, r.message_id);
            continue;
        };
        let groups = reaction_map.entry(r.message_id).or_default();
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(group) => {
                group.user_ids.push(uid);
                group.count = group.user_ids.len();
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji,
                count: 1,
                user_ids: vec![uid],
            }),
        }
    }

    rows.into_iter()
        .map(|row| {
            let reactions = reaction_map.remove(&row.id).unwrap_or_default();
            to_message(row, reactions, redact)
        })
        .collect()
}

fn to_message(row: MessageRow, reactions: Vec<ReactionGroup>, redact: bool) -> ChatResult<Message> {
    let attachments: Vec<Attachment> = serde_json::from_str(&row.attachments).unwrap_or_else(|e| {
        warn!("Corrupt attachments on message '{}': {}", row.id, e);
        Vec::new()
    });
    let created_at = parse_ts(&row.created_at).unwrap_or_else(|| {
        warn!("Corrupt created_at '{}' on message '{}'", row.created_at, row.id);
        chrono::DateTime::default()
    });

    let mut message = Message {
        id: parse_uuid(&row.id, &row.id)?,
        channel_id: parse_uuid(&row.channel_id, &row.id)?,
        thread_id: row
            .thread_id
            .as_deref()
            .map(|t| parse_uuid(t, &row.id))
            .transpose()?,
        author_id: parse_uuid(&row.author_id, &row.id)?,
        author_display_name: row.author_display_name,
        content: row.content,
        attachments,
        created_at,
        edited_at: row.edited_at.as_deref().and_then(parse_ts),
        deleted: row.deleted,
        deleted_at: row.deleted_at.as_deref().and_then(parse_ts),
        delete_type: row.delete_type.as_deref().and_then(DeleteType::parse),
        pinned: row.pinned,
        is_task: row.is_task,
        task_id: row.task_id.as_deref().and_then(|t| t.parse().ok()),
        reply_count: row.reply_count,
        reactions,
    };

    if message.deleted && (redact || message.is_hard_deleted()) {
        message.erase();
    }
    Ok(message)
}
