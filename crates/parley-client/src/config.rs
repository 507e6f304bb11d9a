use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::warn;

use parley_types::api::DEFAULT_PAGE_SIZE;

/// Tunables for the client core. `Default` carries the product values.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Messages requested per history page
    pub page_size: u32,

    /// How long after creation the author may edit or delete
    pub edit_window: TimeDelta,

    /// Grace period during which a soft delete can be undone
    pub undo_window: Duration,

    /// How long the "restored" confirmation stays up
    pub restored_toast: Duration,

    /// How long a failed undo stays up before auto-dismissing
    pub failed_toast: Duration,

    /// Distance from the bottom, in pixels, that still counts as "at the bottom"
    pub bottom_threshold_px: f64,

    /// Duration of the jump-to-message highlight
    pub highlight: Duration,

    pub draft_ttl: TimeDelta,
    pub draft_capacity: usize,
    pub draft_debounce: Duration,

    pub reason_max_len: usize,
    pub content_max_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            edit_window: TimeDelta::minutes(15),
            undo_window: Duration::from_secs(10),
            restored_toast: Duration::from_secs(2),
            failed_toast: Duration::from_secs(5),
            bottom_threshold_px: 20.0,
            highlight: Duration::from_millis(3000),
            draft_ttl: TimeDelta::days(7),
            draft_capacity: 200,
            draft_debounce: Duration::from_millis(500),
            reason_max_len: 500,
            content_max_len: 4000,
        }
    }
}

impl ClientConfig {
    /// Reads `PARLEY_*` overrides from the environment. Unset variables keep
    /// their defaults; unparsable ones are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();

        Self {
            page_size: read(&lookup, "PARLEY_PAGE_SIZE", d.page_size).max(1),
            edit_window: read_delta(&lookup, "PARLEY_EDIT_WINDOW_SECS", d.edit_window, TimeDelta::try_seconds),
            undo_window: Duration::from_secs(read(&lookup, "PARLEY_UNDO_WINDOW_SECS", d.undo_window.as_secs())),
            restored_toast: Duration::from_secs(read(
                &lookup,
                "PARLEY_RESTORED_TOAST_SECS",
                d.restored_toast.as_secs(),
            )),
            failed_toast: Duration::from_secs(read(&lookup, "PARLEY_FAILED_TOAST_SECS", d.failed_toast.as_secs())),
            bottom_threshold_px: read(&lookup, "PARLEY_BOTTOM_THRESHOLD_PX", d.bottom_threshold_px),
            highlight: Duration::from_millis(read(&lookup, "PARLEY_HIGHLIGHT_MS", d.highlight.as_millis() as u64)),
            draft_ttl: read_delta(&lookup, "PARLEY_DRAFT_TTL_DAYS", d.draft_ttl, TimeDelta::try_days),
            draft_capacity: read(&lookup, "PARLEY_DRAFT_CAPACITY", d.draft_capacity),
            draft_debounce: Duration::from_millis(read(
                &lookup,
                "PARLEY_DRAFT_DEBOUNCE_MS",
                d.draft_debounce.as_millis() as u64,
            )),
            reason_max_len: read(&lookup, "PARLEY_REASON_MAX_LEN", d.reason_max_len),
            content_max_len: read(&lookup, "PARLEY_CONTENT_MAX_LEN", d.content_max_len),
        }
    }
}

fn read<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid {}='{}'", key, raw);
                default
            }
        },
    }
}

/// Non-negative whole units; values chrono cannot represent fall back too.
fn read_delta(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: TimeDelta,
    unit: fn(i64) -> Option<TimeDelta>,
) -> TimeDelta {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<u32>().ok().and_then(|n| unit(i64::from(n))) {
        Some(value) => value,
        None => {
            warn!("Ignoring invalid {}='{}'", key, raw);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_product_values() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.edit_window, TimeDelta::minutes(15));
        assert_eq!(cfg.undo_window, Duration::from_secs(10));
        assert_eq!(cfg.bottom_threshold_px, 20.0);
        assert_eq!(cfg.draft_ttl, TimeDelta::days(7));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("PARLEY_UNDO_WINDOW_SECS", "30"),
            ("PARLEY_EDIT_WINDOW_SECS", "60"),
            ("PARLEY_PAGE_SIZE", "25"),
        ]));
        assert_eq!(cfg.undo_window, Duration::from_secs(30));
        assert_eq!(cfg.edit_window, TimeDelta::seconds(60));
        assert_eq!(cfg.page_size, 25);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let cfg = ClientConfig::from_lookup(lookup(&[("PARLEY_HIGHLIGHT_MS", "soon")]));
        assert_eq!(cfg.highlight, Duration::from_millis(3000));
    }

    #[test]
    fn out_of_range_windows_fall_back() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("PARLEY_EDIT_WINDOW_SECS", "-60"),
            ("PARLEY_DRAFT_TTL_DAYS", "-3"),
        ]));
        assert_eq!(cfg.edit_window, TimeDelta::minutes(15));
        assert_eq!(cfg.draft_ttl, TimeDelta::days(7));

        let cfg = ClientConfig::from_lookup(lookup(&[("PARLEY_EDIT_WINDOW_SECS", "99999999999999")]));
        assert_eq!(cfg.edit_window, TimeDelta::minutes(15));
    }
}
