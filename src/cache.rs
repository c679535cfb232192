use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::document::Document;

/// Source of "now" for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.origin + *offset
    }
}

struct CacheEntry {
    document: Rc<Document>,
    inserted_at: Instant,
}

/// Short-lived cache of parsed documents.
///
/// Expired entries are dropped when they are read; there is no background sweep.
/// At most `max_entries` documents are held at once.
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn key(url: &str, proxy_slot: Option<usize>) -> String {
        match proxy_slot {
            Some(slot) => format!("{}#proxy-{}", url, slot),
            None => format!("{}#direct", url),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.ttl
    }

    /// Live entry for `key`, purging it if it has expired
    pub fn get(&mut self, key: &str, now: Instant) -> Option<Rc<Document>> {
        let expired = match self.entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => return None,
        };

        if expired {
            log::debug!("Cache entry expired: {}", key);
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| Rc::clone(&entry.document))
    }

    pub fn insert(&mut self, key: String, document: Rc<Document>, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired(now);

            if self.entries.len() >= self.max_entries {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone());

                if let Some(oldest) = oldest {
                    log::debug!("Cache full, evicting {}", oldest);
                    self.entries.remove(&oldest);
                }
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                document,
                inserted_at: now,
            },
        );
    }

    pub fn evict(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
