use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Id of the channel every fresh database starts with.
pub const GENERAL_CHANNEL_ID: &str = "00000000-0000-0000-0000-000000000001";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            channel_id          TEXT NOT NULL REFERENCES channels(id),
            thread_id           TEXT REFERENCES messages(id),
            author_id           TEXT NOT NULL,
            author_display_name TEXT NOT NULL,
            content             TEXT NOT NULL,
            attachments         TEXT NOT NULL DEFAULT '[]',
            created_at          TEXT NOT NULL,
            edited_at           TEXT,
            deleted             INTEGER NOT NULL DEFAULT 0,
            deleted_at          TEXT,
            delete_type         TEXT,
            delete_reason       TEXT,
            pinned              INTEGER NOT NULL DEFAULT 0,
            is_task             INTEGER NOT NULL DEFAULT 0,
            task_id             TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        -- Seed the default general channel
        INSERT OR IGNORE INTO channels (id, name)
            VALUES ('00000000-0000-0000-0000-000000000001', 'general');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
