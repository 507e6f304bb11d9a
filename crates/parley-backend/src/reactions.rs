use tracing::debug;
use uuid::Uuid;

use parley_types::events::ChangeEvent;
use parley_types::{ChatError, ChatResult};

use crate::{LocalConnection, storage_err};

/// Longest emoji string accepted. Multi-codepoint sequences fit comfortably.
const MAX_EMOJI_LEN: usize = 64;

pub async fn add_reaction(
    conn: &LocalConnection,
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
) -> ChatResult<()> {
    toggle(conn, message_id, user_id, emoji, true).await
}

pub async fn remove_reaction(
    conn: &LocalConnection,
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
) -> ChatResult<()> {
    toggle(conn, message_id, user_id, emoji, false).await
}

async fn toggle(
    conn: &LocalConnection,
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
    add: bool,
) -> ChatResult<()> {
    if emoji.trim().is_empty() || emoji.len() > MAX_EMOJI_LEN {
        return Err(ChatError::Validation("Invalid emoji".into()));
    }
    if user_id != conn.viewer().user_id {
        return Err(ChatError::Permission("Cannot react on behalf of another user".into()));
    }

    let db_emoji = emoji.clone();
    let outcome = conn
        .blocking(move |inner| {
            let mid = message_id.to_string();
            let row = inner
                .db
                .get_message(&mid)
                .map_err(storage_err)?
                .ok_or_else(|| ChatError::NotFound(format!("message {message_id}")))?;
            if row.deleted {
                return Err(ChatError::Conflict("Cannot react to a deleted message".into()));
            }
            let uid = user_id.to_string();
            let changed = if add {
                inner.db.add_reaction(&mid, &uid, &db_emoji)
            } else {
                inner.db.remove_reaction(&mid, &uid, &db_emoji)
            }
            .map_err(storage_err)?;
            Ok((changed, row.channel_id))
        })
        .await?;

    let (changed, channel_id) = outcome;
    if !changed {
        debug!(%message_id, %emoji, add, "Reaction unchanged");
        return Ok(());
    }
    let channel_id = channel_id
        .parse()
        .map_err(|_| ChatError::Network("storage returned a corrupt row".into()))?;

    conn.publish(if add {
        ChangeEvent::ReactionAdd { channel_id, message_id, user_id, emoji }
    } else {
        ChangeEvent::ReactionRemove { channel_id, message_id, user_id, emoji }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use parley_types::api::{SendMessageRequest, Viewer};
    use parley_types::ports::RemoteStore;

    use super::*;
    use crate::LocalBackend;

    fn viewer(name: &str) -> Viewer {
        Viewer {
            user_id: Uuid::new_v4(),
            display_name: name.into(),
            elevated: false,
        }
    }

    fn text(content: &str) -> SendMessageRequest {
        SendMessageRequest {
            content: content.into(),
            attachments: Vec::new(),
            thread_id: None,
        }
    }

    #[tokio::test]
    async fn add_twice_publishes_once() {
        let backend = LocalBackend::open_in_memory().unwrap();
        let channel = LocalBackend::general_channel_id();
        let alice = backend.connect(viewer("alice"));
        let msg = alice.send_message(channel, text("hi")).await.unwrap();

        let mut sub = alice.subscribe_to_channel(channel);
        let uid = alice.viewer().user_id;
        alice.add_reaction(msg.id, uid, "👍").await.unwrap();
        alice.add_reaction(msg.id, uid, "👍").await.unwrap();

        assert!(matches!(sub.try_recv(), Some(ChangeEvent::ReactionAdd { .. })));
        assert!(sub.try_recv().is_none());

        let page = alice
            .fetch_messages(channel, parley_types::api::MessageQuery::latest(10))
            .await
            .unwrap();
        assert_eq!(page[0].reactions.len(), 1);
        assert_eq!(page[0].reactions[0].count, 1);
    }

    #[tokio::test]
    async fn removing_missing_reaction_is_ok() {
        let backend = LocalBackend::open_in_memory().unwrap();
        let channel = LocalBackend::general_channel_id();
        let alice = backend.connect(viewer("alice"));
        let msg = alice.send_message(channel, text("hi")).await.unwrap();

        let mut sub = alice.subscribe_to_channel(channel);
        alice
            .remove_reaction(msg.id, alice.viewer().user_id, "🎉")
            .await
            .unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn cannot_react_as_someone_else() {
        let backend = LocalBackend::open_in_memory().unwrap();
        let channel = LocalBackend::general_channel_id();
        let alice = backend.connect(viewer("alice"));
        let msg = alice.send_message(channel, text("hi")).await.unwrap();

        let err = alice.add_reaction(msg.id, Uuid::new_v4(), "👍").await.unwrap_err();
        assert!(matches!(err, ChatError::Permission(_)));
    }
}
