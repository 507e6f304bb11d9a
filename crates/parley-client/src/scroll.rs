//! Viewport bookkeeping: auto-scroll on new messages, anchor preservation
//! across history prepends, and the jump-to-message highlight.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Scroll geometry reported by the rendering layer, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Viewport {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }

    pub fn is_near_bottom(&self, threshold_px: f64) -> bool {
        self.distance_from_bottom() <= threshold_px
    }
}

/// Auto-scroll on insert iff this is the first load, the reader is already
/// at the bottom, or the message is their own.
pub fn should_auto_scroll(first_load: bool, viewport: &Viewport, threshold_px: f64, own_message: bool) -> bool {
    first_load || viewport.is_near_bottom(threshold_px) || own_message
}

/// Position recorded before a history page is prepended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    scroll_top: f64,
    scroll_height: f64,
}

impl ScrollAnchor {
    pub fn capture(viewport: &Viewport) -> Self {
        Self {
            scroll_top: viewport.scroll_top,
            scroll_height: viewport.scroll_height,
        }
    }

    /// The scroll offset that keeps previously visible content in place once
    /// the content has grown to `new_scroll_height`.
    pub fn restore(&self, new_scroll_height: f64) -> f64 {
        self.scroll_top + (new_scroll_height - self.scroll_height)
    }
}

/// What the rendering layer should do with the viewport after an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollCommand {
    Stay,
    ToBottom,
    /// Re-render, then set `scroll_top = anchor.restore(new_scroll_height)`.
    PreserveAnchor(ScrollAnchor),
    ToMessage(Uuid),
}

/// Temporary emphasis on a jumped-to message.
#[derive(Debug, Default)]
pub struct Highlight {
    current: Option<(Uuid, Instant)>,
}

impl Highlight {
    pub fn start(&mut self, message_id: Uuid, now: Instant, duration: Duration) {
        self.current = Some((message_id, now + duration));
    }

    pub fn active(&self, now: Instant) -> Option<Uuid> {
        self.current
            .filter(|(_, until)| now < *until)
            .map(|(id, _)| id)
    }

    /// Clears an expired highlight. Returns the id that stopped glowing.
    pub fn tick(&mut self, now: Instant) -> Option<Uuid> {
        match self.current {
            Some((id, until)) if now >= until => {
                self.current = None;
                Some(id)
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.current.map(|(_, until)| until)
    }
}
