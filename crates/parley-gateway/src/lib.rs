//! Realtime change feed: fans out committed changes to per-channel subscribers.

pub mod dispatcher;

pub use dispatcher::Dispatcher;
