//! Shared types for the parley workspace: the message data model, change-feed
//! events, request shapes, the error taxonomy and the remote store port.

pub mod api;
pub mod error;
pub mod events;
pub mod models;
pub mod ports;

pub use error::{ChatError, ChatResult};
