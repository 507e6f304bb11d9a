/// Failure categories surfaced to the initiating control (modal, toast,
/// composer). Nothing here is meant to reach a global handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The action is not valid in the message's current state.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl ChatError {
    /// Inline text for the control that started the failed action.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Couldn't reach the server. Please try again.".into(),
            Self::Permission(msg) => format!("You can't do that: {msg}"),
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(_) => "This message no longer exists.".into(),
            Self::Conflict(msg) => msg.clone(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
