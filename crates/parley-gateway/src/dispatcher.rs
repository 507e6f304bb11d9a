use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use parley_types::events::ChangeEvent;
use parley_types::ports::ChangeSubscription;

const DEFAULT_CAPACITY: usize = 1024;

/// Manages per-channel change feeds and publishes committed changes.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Buffer size of each channel's broadcast queue
    capacity: usize,

    /// channel_id -> broadcast sender for that channel's changes
    channels: RwLock<HashMap<Uuid, broadcast::Sender<ChangeEvent>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                capacity: capacity.max(1),
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to one channel's changes. Dropping the returned subscription
    /// releases the channel's queue once nobody else is listening.
    pub fn subscribe(&self, channel_id: Uuid) -> ChangeSubscription {
        let rx = {
            let mut channels = match self.inner.channels.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            channels
                .entry(channel_id)
                .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                .subscribe()
        };
        debug!(%channel_id, "Change feed subscribed");

        let weak: Weak<DispatcherInner> = Arc::downgrade(&self.inner);
        ChangeSubscription::new(channel_id, rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.release(channel_id);
            }
        })
    }

    /// Publish a change to the subscribers of its channel.
    pub fn publish(&self, event: ChangeEvent) {
        let channel_id = event.channel_id();
        let channels = match self.inner.channels.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match channels.get(&channel_id) {
            Some(tx) => {
                trace!(%channel_id, kind = event.kind(), "Publishing change");
                let _ = tx.send(event);
            }
            None => trace!(%channel_id, kind = event.kind(), "No subscribers for change"),
        }
    }

    pub fn subscriber_count(&self, channel_id: Uuid) -> usize {
        let channels = match self.inner.channels.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.get(&channel_id).map_or(0, |tx| tx.receiver_count())
    }

    /// Number of channels that currently hold a queue.
    pub fn active_channels(&self) -> usize {
        match self.inner.channels.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl DispatcherInner {
    /// Called from a subscription's drop. The receiver is still alive at that
    /// point, so a count of one means it was the last listener.
    fn release(&self, channel_id: Uuid) {
        let mut channels = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(%channel_id, "Dispatcher lock poisoned during release");
                poisoned.into_inner()
            }
        };
        let last = channels
            .get(&channel_id)
            .is_some_and(|tx| tx.receiver_count() <= 1);
        if last {
            channels.remove(&channel_id);
            debug!(%channel_id, "Change feed released");
        }
    }
}
