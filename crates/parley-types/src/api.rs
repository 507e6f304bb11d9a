use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, DeleteType};

/// Default page size for channel history.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound a store will honour for one page.
pub const MAX_PAGE_SIZE: u32 = 200;

// -- Identity --

/// The signed-in user as seen by the client core. Role resolution happens
/// elsewhere; the core only consumes the `elevated` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub elevated: bool,
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    /// Cursor: only messages ordered before `(before, before_id)`. Without
    /// an id, strictly before the instant.
    pub before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub before_id: Option<Uuid>,
    pub limit: u32,
}

impl MessageQuery {
    pub fn latest(limit: u32) -> Self {
        Self { before: None, before_id: None, limit }
    }

    /// The page that precedes the message `(created_at, id)`.
    pub fn before(created_at: DateTime<Utc>, id: Uuid, limit: u32) -> Self {
        Self { before: Some(created_at), before_id: Some(id), limit }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Root message id when replying in a thread.
    #[serde(default)]
    pub thread_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    pub delete_type: DeleteType,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DeleteOptions {
    pub fn soft() -> Self {
        Self { delete_type: DeleteType::Soft, reason: None }
    }

    pub fn hard() -> Self {
        Self { delete_type: DeleteType::Hard, reason: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeleteReceipt {
    pub deleted_at: DateTime<Utc>,
}
