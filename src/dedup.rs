//! Write-deduplication cache.
//!
//! Suppresses RTU bus traffic for writes whose normalized value has not
//! changed since the last observed write within `ttl`. Guarded by a single
//! async `RwLock` — write traffic on a 9600-baud bus is infrequent enough
//! that lock contention is a non-issue.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::protocol::WriteValues;
use crate::types::Kind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    unit_id: u8,
    address: u16,
    kind: Kind,
}

struct DedupEntry {
    value: WriteValues,
    timestamp_ms: u64,
}

pub struct WriteDedupCache {
    entries: RwLock<HashMap<DedupKey, DedupEntry>>,
    ttl_ms: u64,
    history_ttl_ms: u64,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl WriteDedupCache {
    pub fn new(ttl_ms: u64, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        let history_ttl_ms = (ttl_ms * 10).max(1_000);
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_ms,
            history_ttl_ms,
            max_entries,
            clock,
        }
    }

    /// Returns `true` if this write is an exact repeat of the last
    /// successfully-written value within the TTL window and should be
    /// short-circuited without ever reaching the bus. Never refreshes the
    /// entry's timestamp on a hit — only `record_success` does that,
    /// matching the deliberate "do not refresh on skip" policy.
    pub async fn should_skip(&self, unit_id: u8, address: u16, kind: Kind, incoming: &WriteValues) -> bool {
        let key = DedupKey { unit_id, address, kind };
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(entry) => entry.value == *incoming && now.saturating_sub(entry.timestamp_ms) < self.ttl_ms,
            None => false,
        }
    }

    /// Installs or overwrites the entry after a write actually lands on
    /// the bus (or a broadcast write is sent). Failed writes must not call
    /// this. Also performs lazy eviction of stale/over-bound entries.
    pub async fn record_success(&self, unit_id: u8, address: u16, kind: Kind, value: WriteValues) {
        let key = DedupKey { unit_id, address, kind };
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        entries.insert(key, DedupEntry { value, timestamp_ms: now });
        Self::evict(&mut entries, now, self.history_ttl_ms, self.max_entries);
    }

    fn evict(entries: &mut HashMap<DedupKey, DedupEntry>, now: u64, history_ttl_ms: u64, max_entries: usize) {
        entries.retain(|_, entry| now.saturating_sub(entry.timestamp_ms) < history_ttl_ms);

        while entries.len() > max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.timestamp_ms)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
