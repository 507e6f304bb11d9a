/// Database row types. These map directly to SQLite rows.
/// Distinct from parley-types models to keep the DB layer independent.
use chrono::{DateTime, SecondsFormat, Utc};

pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub author_id: String,
    pub author_display_name: String,
    pub content: String,
    /// JSON array of attachment objects
    pub attachments: String,
    pub created_at: String,
    pub edited_at: Option<String>,
    pub deleted: bool,
    pub deleted_at: Option<String>,
    pub delete_type: Option<String>,
    pub pinned: bool,
    pub is_task: bool,
    pub task_id: Option<String>,
    pub reply_count: u32,
}

/// Values for a new message row.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub channel_id: &'a str,
    pub thread_id: Option<&'a str>,
    pub author_id: &'a str,
    pub author_display_name: &'a str,
    pub content: &'a str,
    pub attachments: &'a str,
    pub created_at: &'a str,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

pub struct DraftRow {
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub content: String,
    pub updated_at: String,
}

/// Fixed-width RFC 3339 so that text ordering in SQLite matches time ordering.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // Column defaults are written by SQLite with millisecond precision.
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .map(|ndt| ndt.and_utc())
                .ok()
        })
}
