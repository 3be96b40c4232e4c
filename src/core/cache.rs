use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Deterministic cache key derived from everything that affects a response:
/// operation, entity ids (in request order) and pagination cursor. Stable
/// across runs for identical inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(operation: &str, ids: &[String], page_cursor: Option<&str>) -> Self {
        Self(format!(
            "{}:{}:{}",
            operation,
            ids.join(","),
            page_cursor.unwrap_or("-")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: serde_json::Value,
    stored_at: DateTime<Utc>,
    ttl: ChronoDuration,
}

impl CacheEntry {
    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.stored_at + self.ttl
    }
}

/// TTL response cache. Entries are immutable once written and replaced
/// wholesale on overwrite; expired entries are discarded lazily on read.
#[derive(Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<serde_json::Value> {
        self.get_at(fingerprint, Utc::now()).await
    }

    pub(crate) async fn get_at(
        &self,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().await;
        match entries.get(fingerprint) {
            Some(entry) if entry.expired_at(now) => {
                entries.remove(fingerprint);
                None
            }
            Some(entry) => Some(entry.payload.clone()),
            None => None,
        }
    }

    pub async fn put(&self, fingerprint: Fingerprint, payload: serde_json::Value, ttl: Duration) {
        self.put_at(fingerprint, payload, ttl, Utc::now()).await
    }

    pub(crate) async fn put_at(
        &self,
        fingerprint: Fingerprint,
        payload: serde_json::Value,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::hours(1));
        let mut entries = self.entries.lock().await;
        entries.insert(
            fingerprint,
            CacheEntry {
                payload,
                stored_at: now,
                ttl,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
