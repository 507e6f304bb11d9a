//! Composer drafts persisted per `(channel, thread)`.
//!
//! Writes are debounced: keystrokes are staged in memory and flushed to the
//! draft database once they have been quiet for the debounce interval.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use parley_db::drafts::DraftDb;
use parley_db::models::{DraftRow, format_ts, parse_ts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DraftKey {
    pub channel_id: Uuid,
    pub thread_id: Option<Uuid>,
}

impl DraftKey {
    pub fn channel(channel_id: Uuid) -> Self {
        Self {
            channel_id,
            thread_id: None,
        }
    }

    pub fn thread(channel_id: Uuid, root_id: Uuid) -> Self {
        Self {
            channel_id,
            thread_id: Some(root_id),
        }
    }

    fn storage_key(&self) -> String {
        match self.thread_id {
            Some(t) => format!("{}:{}", self.channel_id, t),
            None => format!("{}:", self.channel_id),
        }
    }
}

struct Staged {
    text: String,
    due: Instant,
}

pub struct DraftCache {
    db: DraftDb,
    ttl: TimeDelta,
    capacity: usize,
    debounce: Duration,
    staged: HashMap<DraftKey, Staged>,
}

impl DraftCache {
    /// Wraps `db` and sweeps expired and excess drafts.
    pub fn open(db: DraftDb, ttl: TimeDelta, capacity: usize, debounce: Duration) -> Result<Self> {
        let cache = Self {
            db,
            ttl,
            capacity,
            debounce,
            staged: HashMap::new(),
        };
        cache.sweep(Utc::now())?;
        Ok(cache)
    }

    /// Drops drafts older than the TTL, then the least recently updated ones
    /// beyond capacity. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.db.delete_older_than(&format_ts(now - self.ttl))?;
        let evicted = self.db.truncate_to(self.capacity)?;
        if expired + evicted > 0 {
            info!("Draft sweep removed {} expired and {} excess drafts", expired, evicted);
        }
        Ok(expired + evicted)
    }

    /// Current draft text, including edits not yet flushed.
    pub fn get(&self, key: &DraftKey) -> Result<Option<String>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(Some(staged.text.clone()).filter(|t| !t.is_empty()));
        }
        let Some(row) = self.db.get(&key.storage_key())? else {
            return Ok(None);
        };
        let fresh = parse_ts(&row.updated_at).is_some_and(|at| Utc::now() - at < self.ttl);
        Ok(fresh.then_some(row.content))
    }

    /// Records a keystroke-level change, to be written after the debounce.
    pub fn stage(&mut self, key: DraftKey, text: impl Into<String>, now: Instant) {
        self.staged.insert(
            key,
            Staged {
                text: text.into(),
                due: now + self.debounce,
            },
        );
    }

    /// Writes staged drafts whose debounce has elapsed.
    pub fn flush_due(&mut self, now: Instant) -> Result<usize> {
        let due: Vec<DraftKey> = self
            .staged
            .iter()
            .filter(|(_, s)| s.due <= now)
            .map(|(k, _)| *k)
            .collect();
        for key in &due {
            if let Some(staged) = self.staged.remove(key) {
                self.save(key, &staged.text)?;
            }
        }
        Ok(due.len())
    }

    pub fn flush_all(&mut self) -> Result<usize> {
        let staged: Vec<(DraftKey, Staged)> = self.staged.drain().collect();
        for (key, s) in &staged {
            self.save(key, &s.text)?;
        }
        Ok(staged.len())
    }

    /// Writes immediately. Empty text removes the draft.
    pub fn save(&self, key: &DraftKey, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            self.db.delete(&key.storage_key())?;
            return Ok(());
        }
        self.db.upsert(
            &key.storage_key(),
            &DraftRow {
                channel_id: key.channel_id.to_string(),
                thread_id: key.thread_id.map(|t| t.to_string()),
                content: text.to_string(),
                updated_at: format_ts(Utc::now()),
            },
        )?;
        debug!(channel_id = %key.channel_id, "Draft saved");
        Ok(())
    }

    pub fn clear(&mut self, key: &DraftKey) -> Result<()> {
        self.staged.remove(key);
        self.db.delete(&key.storage_key())?;
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.staged.values().map(|s| s.due).min()
    }

    pub fn len(&self) -> Result<usize> {
        self.db.count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> DraftCache {
        DraftCache::open(
            DraftDb::open_in_memory().unwrap(),
            TimeDelta::days(7),
            capacity,
            Duration::from_millis(500),
        )
        .unwrap()
    }

    fn backdate(db: &DraftDb, key: &DraftKey, text: &str, at: DateTime<Utc>) {
        db.upsert(
            &key.storage_key(),
            &DraftRow {
                channel_id: key.channel_id.to_string(),
                thread_id: key.thread_id.map(|t| t.to_string()),
                content: text.into(),
                updated_at: format_ts(at),
            },
        )
        .unwrap();
    }

    #[test]
    fn channel_and_thread_drafts_are_separate() {
        let mut drafts = cache(10);
        let ch = Uuid::new_v4();
        let root = Uuid::new_v4();
        drafts.save(&DraftKey::channel(ch), "channel text").unwrap();
        drafts.save(&DraftKey::thread(ch, root), "thread text").unwrap();

        assert_eq!(drafts.get(&DraftKey::channel(ch)).unwrap().as_deref(), Some("channel text"));
        assert_eq!(drafts.get(&DraftKey::thread(ch, root)).unwrap().as_deref(), Some("thread text"));

        drafts.clear(&DraftKey::channel(ch)).unwrap();
        assert!(drafts.get(&DraftKey::channel(ch)).unwrap().is_none());
        assert_eq!(drafts.len().unwrap(), 1);
    }

    #[test]
    fn sweep_drops_week_old_drafts() {
        let db = DraftDb::open_in_memory().unwrap();
        let old = DraftKey::channel(Uuid::new_v4());
        let recent = DraftKey::channel(Uuid::new_v4());
        backdate(&db, &old, "old", Utc::now() - TimeDelta::days(8));
        backdate(&db, &recent, "recent", Utc::now() - TimeDelta::days(6));

        let drafts = DraftCache::open(db, TimeDelta::days(7), 10, Duration::from_millis(500)).unwrap();
        assert!(drafts.get(&old).unwrap().is_none());
        assert_eq!(drafts.get(&recent).unwrap().as_deref(), Some("recent"));
    }

    #[test]
    fn sweep_enforces_capacity() {
        let db = DraftDb::open_in_memory().unwrap();
        for i in 0..5 {
            backdate(&db, &DraftKey::channel(Uuid::new_v4()), "x", Utc::now() - TimeDelta::minutes(i));
        }
        let drafts = DraftCache::open(db, TimeDelta::days(7), 3, Duration::from_millis(500)).unwrap();
        assert_eq!(drafts.len().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn staged_text_is_flushed_after_debounce() {
        let mut drafts = cache(10);
        let key = DraftKey::channel(Uuid::new_v4());
        drafts.stage(key, "hel", Instant::now());
        drafts.stage(key, "hello", Instant::now());

        assert_eq!(drafts.get(&key).unwrap().as_deref(), Some("hello"));
        assert_eq!(drafts.flush_due(Instant::now()).unwrap(), 0);
        assert!(drafts.is_empty().unwrap());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(drafts.flush_due(Instant::now()).unwrap(), 1);
        assert_eq!(drafts.len().unwrap(), 1);
        assert!(drafts.next_deadline().is_none());
    }
}
