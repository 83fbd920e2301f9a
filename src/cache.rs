// =============================================================================
// TTL Cache — single-writer-per-key snapshot cache for broker data
// =============================================================================
//
// Stale reads within the TTL are acceptable by design (§ concurrency model):
// option chains hold for 12 hours, trend classifications for 24 hours, and
// qualified contract ids never expire.
// =============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Chain cache TTL: 12 hours.
pub const CHAIN_TTL: Duration = Duration::from_secs(12 * 3600);
/// Trend-classification cache TTL: 24 hours.
pub const TREND_TTL: Duration = Duration::from_secs(24 * 3600);

/// A thread-safe map whose entries expire `ttl` after insertion.
/// `ttl = None` means entries never expire (qualified contract ids).
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, (V, Option<Instant>)>>,
    ttl: Option<Duration>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch a live entry, or `None` if absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        let (value, expires) = entries.get(key)?;
        if let Some(deadline) = expires {
            if Instant::now() >= *deadline {
                return None;
            }
        }
        Some(value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let expires = self.ttl.map(|ttl| Instant::now() + ttl);
        self.entries.write().insert(key, (value, expires));
    }

    /// Number of entries, including any that have expired but not yet been
    /// purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop expired entries. Call opportunistically; correctness does not
    /// depend on it because `get` re-checks the deadline.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries
            .write()
            .retain(|_, (_, expires)| match expires {
                Some(deadline) => now < *deadline,
                None => true,
            });
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.read().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
