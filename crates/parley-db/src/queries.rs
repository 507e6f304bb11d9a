use crate::models::{ChannelRow, MessageRow, NewMessage, ReactionRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

const MESSAGE_SELECT: &str = "
    SELECT m.id, m.channel_id, m.thread_id, m.author_id, m.author_display_name,
           m.content, m.attachments, m.created_at, m.edited_at, m.deleted,
           m.deleted_at, m.delete_type, m.pinned, m.is_task, m.task_id,
           (SELECT COUNT(*) FROM messages r WHERE r.thread_id = m.id) AS reply_count
    FROM messages m";

impl Database {
    // -- Channels --

    pub fn create_channel(&self, id: &str, name: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("INSERT INTO channels (id, name) VALUES (?1, ?2)", (id, name))?;
            Ok(())
        })
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, created_at FROM channels WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(ChannelRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn add_channel_member(&self, channel_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id) VALUES (?1, ?2)",
                (channel_id, user_id),
            )?;
            Ok(())
        })
    }

    pub fn get_channel_member_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM channel_members WHERE channel_id = ?1 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map([channel_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, channel_id, thread_id, author_id, author_display_name, content, attachments, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.id,
                    msg.channel_id,
                    msg.thread_id,
                    msg.author_id,
                    msg.author_display_name,
                    msg.content,
                    msg.attachments,
                    msg.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Root messages of a channel, newest first. `before` is the
    /// `(created_at, id)` of the oldest message the caller already has; a
    /// missing id means strictly older than the timestamp.
    pub fn get_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<(&str, Option<&str>)>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id, limit, before))
    }

    /// Replies to a thread root, oldest first.
    pub fn get_thread(&self, root_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT} WHERE m.thread_id = ?1 ORDER BY m.created_at ASC, m.id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([root_id], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns the number of rows changed (0 when the message is missing or deleted).
    pub fn update_message_content(&self, id: &str, content: &str, edited_at: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1 AND deleted = 0",
                params![id, content, edited_at],
            )?;
            Ok(n)
        })
    }

    pub fn soft_delete_message(&self, id: &str, deleted_at: &str, reason: Option<&str>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE messages
                 SET deleted = 1, deleted_at = ?2, delete_type = 'soft', delete_reason = ?3, pinned = 0
                 WHERE id = ?1 AND deleted = 0",
                params![id, deleted_at, reason],
            )?;
            Ok(n)
        })
    }

    /// Erases content, attachments and reactions; keeps a tombstone row.
    pub fn hard_delete_message(&self, id: &str, deleted_at: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE messages
                 SET deleted = 1, deleted_at = ?2, delete_type = 'hard', delete_reason = NULL,
                     content = '', attachments = '[]', pinned = 0
                 WHERE id = ?1 AND (deleted = 0 OR delete_type = 'soft')",
                params![id, deleted_at],
            )?;
            tx.execute("DELETE FROM reactions WHERE message_id = ?1", [id])?;
            tx.commit()?;
            Ok(n)
        })
    }

    /// Reverts a soft delete. Hard deletes cannot be restored.
    pub fn restore_message(&self, id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE messages
                 SET deleted = 0, deleted_at = NULL, delete_type = NULL, delete_reason = NULL
                 WHERE id = ?1 AND deleted = 1 AND delete_type = 'soft'",
                [id],
            )?;
            Ok(n)
        })
    }

    pub fn set_pinned(&self, id: &str, pinned: bool) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE messages SET pinned = ?2 WHERE id = ?1 AND deleted = 0 AND pinned != ?2",
                params![id, pinned],
            )?;
            Ok(n)
        })
    }

    pub fn set_task(&self, id: &str, task_id: Option<&str>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE messages SET is_task = ?2, task_id = ?3 WHERE id = ?1",
                params![id, task_id.is_some(), task_id],
            )?;
            Ok(n)
        })
    }

    // -- Reactions --

    /// Returns true when a new row was inserted.
    pub fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                params![message_id, user_id, emoji],
            )?;
            Ok(n > 0)
        })
    }

    /// Returns true when a row was removed.
    pub fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id, user_id, emoji],
            )?;
            Ok(n > 0)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at ASC, rowid ASC",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    let row = conn.query_row(&sql, [id], map_message_row).optional()?;
    Ok(row)
}

fn query_messages(
    conn: &Connection,
    channel_id: &str,
    limit: u32,
    before: Option<(&str, Option<&str>)>,
) -> Result<Vec<MessageRow>> {
    let rows = match before {
        Some((before, before_id)) => {
            // Same keyset as the ORDER BY, so rows sharing a timestamp are
            // split across pages without loss.
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.channel_id = ?1 AND m.thread_id IS NULL
                   AND (m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?3))
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![channel_id, before, before_id, limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.channel_id = ?1 AND m.thread_id IS NULL
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![channel_id, limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(rows)
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        thread_id: row.get(2)?,
        author_id: row.get(3)?,
        author_display_name: row.get(4)?,
        content: row.get(5)?,
        attachments: row.get(6)?,
        created_at: row.get(7)?,
        edited_at: row.get(8)?,
        deleted: row.get(9)?,
        deleted_at: row.get(10)?,
        delete_type: row.get(11)?,
        pinned: row.get(12)?,
        is_task: row.get(13)?,
        task_id: row.get(14)?,
        reply_count: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::GENERAL_CHANNEL_ID;

    fn insert(db: &Database, id: &str, thread_id: Option<&str>, created_at: &str) {
        db.insert_message(&NewMessage {
            id,
            channel_id: GENERAL_CHANNEL_ID,
            thread_id,
            author_id: "u1",
            author_display_name: "ada",
            content: "hi",
            attachments: "[]",
            created_at,
        })
        .unwrap();
    }

    #[test]
    fn pages_roots_newest_first_with_cursor() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "a", None, "2024-01-01T10:00:00.000000Z");
        insert(&db, "b", None, "2024-01-01T10:01:00.000000Z");
        insert(&db, "c", None, "2024-01-01T10:02:00.000000Z");
        insert(&db, "b1", Some("b"), "2024-01-01T10:03:00.000000Z");

        let page = db.get_messages(GENERAL_CHANNEL_ID, 2, None).unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(page[1].reply_count, 1);

        let older = db
            .get_messages(GENERAL_CHANNEL_ID, 2, Some(("2024-01-01T10:01:00.000000Z", None)))
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, "a");
    }

    #[test]
    fn cursor_splits_rows_sharing_a_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let at = "2024-01-01T10:00:00.000000Z";
        for id in ["a", "b", "c", "d"] {
            insert(&db, id, None, at);
        }

        let first = db.get_messages(GENERAL_CHANNEL_ID, 2, None).unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c"]);

        let rest = db
            .get_messages(GENERAL_CHANNEL_ID, 2, Some((at, Some("c"))))
            .unwrap();
        let ids: Vec<_> = rest.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn hard_delete_erases_and_blocks_restore() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "a", None, "2024-01-01T10:00:00.000000Z");
        assert!(db.add_reaction("a", "u2", "👍").unwrap());

        assert_eq!(db.hard_delete_message("a", "2024-01-01T11:00:00.000000Z").unwrap(), 1);
        let row = db.get_message("a").unwrap().unwrap();
        assert!(row.deleted);
        assert_eq!(row.content, "");
        assert_eq!(row.delete_type.as_deref(), Some("hard"));
        assert!(db.get_reactions_for_messages(&["a".into()]).unwrap().is_empty());
        assert_eq!(db.restore_message("a").unwrap(), 0);
    }

    #[test]
    fn soft_delete_round_trip_keeps_content() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "a", None, "2024-01-01T10:00:00.000000Z");
        assert_eq!(db.soft_delete_message("a", "2024-01-01T11:00:00.000000Z", Some("typo")).unwrap(), 1);
        assert_eq!(db.soft_delete_message("a", "2024-01-01T11:00:01.000000Z", None).unwrap(), 0);
        assert_eq!(db.restore_message("a").unwrap(), 1);
        let row = db.get_message("a").unwrap().unwrap();
        assert!(!row.deleted);
        assert_eq!(row.content, "hi");
    }

    #[test]
    fn reactions_are_unique_per_user_and_emoji() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "a", None, "2024-01-01T10:00:00.000000Z");
        assert!(db.add_reaction("a", "u2", "🎉").unwrap());
        assert!(!db.add_reaction("a", "u2", "🎉").unwrap());
        assert!(db.remove_reaction("a", "u2", "🎉").unwrap());
        assert!(!db.remove_reaction("a", "u2", "🎉").unwrap());
    }
}
