use tracing::warn;
use uuid::Uuid;

use parley_db::models::parse_ts;
use parley_types::models::Channel;
use parley_types::{ChatError, ChatResult};

use crate::{LocalBackend, LocalConnection, storage_err};

pub async fn fetch_channel(conn: &LocalConnection, channel_id: Uuid) -> ChatResult<Channel> {
    conn.blocking(move |inner| {
        let cid = channel_id.to_string();
        let row = inner
            .db
            .get_channel(&cid)
            .map_err(storage_err)?
            .ok_or_else(|| ChatError::NotFound(format!("channel {channel_id}")))?;
        let members = inner
            .db
            .get_channel_member_ids(&cid)
            .map_err(storage_err)?
            .into_iter()
            .filter_map(|id| match id.parse::<Uuid>() {
                Ok(uid) => Some(uid),
                Err(e) => {
                    warn!("Corrupt member id '{}' in channel '{}': {}", id, cid, e);
                    None
                }
            })
            .collect();

        Ok(Channel {
            id: channel_id,
            name: row.name,
            members,
            created_at: parse_ts(&row.created_at).unwrap_or_default(),
        })
    })
    .await
}

impl LocalBackend {
    /// Admin helper: create a channel and return its id.
    pub fn create_channel(&self, name: &str) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        self.db().create_channel(&id.to_string(), name)?;
        Ok(id)
    }

    /// Admin helper: add a user to a channel's member list.
    pub fn add_member(&self, channel_id: Uuid, user_id: Uuid) -> anyhow::Result<()> {
        self.db()
            .add_channel_member(&channel_id.to_string(), &user_id.to_string())
    }

    /// The channel seeded into every new database.
    pub fn general_channel_id() -> Uuid {
        Uuid::parse_str(parley_db::migrations::GENERAL_CHANNEL_ID).unwrap_or_default()
    }
}
