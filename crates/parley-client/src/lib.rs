//! Client core for a channel-based chat: the per-channel message cache,
//! soft-delete undo coordination, edit sessions, scroll bookkeeping and the
//! local draft cache, tied together by [`ChatClient`].

pub mod actions;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod drafts;
pub mod edit;
pub mod policy;
pub mod scroll;
pub mod store;
pub mod view;

pub use actions::MessageActions;
pub use client::{ChatClient, RemoteChange, Sent};
pub use config::ClientConfig;
pub use coordinator::{DeleteCoordinator, DeleteOutcome, DeleteRequest, DeleteState, ToastView};
pub use scroll::{ScrollAnchor, ScrollCommand, Viewport};
pub use store::MessageStore;
