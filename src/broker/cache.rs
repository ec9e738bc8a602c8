//! Market data cache with TTL expiry.
//!
//! Short TTLs are preferred over invalidation protocols: snapshots live for
//! 60 seconds, bars for 5 minutes. Entries are keyed by
//! (symbol, timeframe-or-"snapshot"). Freshness-critical callers bypass the
//! cache explicitly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::{Bar, MarketSnapshot};

const SNAPSHOT_KEY: &str = "snapshot";

struct Entry<T> {
    value: T,
    inserted_at: Instant,
}

impl<T: Clone> Entry<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.inserted_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

/// TTL cache for snapshots and bars, consulted before the network.
pub struct MarketDataCache {
    snapshot_ttl: Duration,
    bars_ttl: Duration,
    snapshots: Mutex<HashMap<String, Entry<MarketSnapshot>>>,
    bars: Mutex<HashMap<(String, String), Entry<Vec<Bar>>>>,
}

impl Default for MarketDataCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(300))
    }
}

impl MarketDataCache {
    /// Create a cache with explicit TTLs.
    #[must_use]
    pub fn new(snapshot_ttl: Duration, bars_ttl: Duration) -> Self {
        Self {
            snapshot_ttl,
            bars_ttl,
            snapshots: Mutex::new(HashMap::new()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Get a fresh snapshot, `None` on miss or expiry.
    #[must_use]
    pub fn get_snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.snapshots
            .lock()
            .get(symbol)
            .and_then(|e| e.fresh(self.snapshot_ttl))
    }

    /// Store a snapshot.
    pub fn put_snapshot(&self, snapshot: MarketSnapshot) {
        self.snapshots.lock().insert(
            snapshot.instrument.symbol.clone(),
            Entry {
                value: snapshot,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Get fresh bars for (symbol, timeframe), `None` on miss or expiry.
    #[must_use]
    pub fn get_bars(&self, symbol: &str, timeframe: &str) -> Option<Vec<Bar>> {
        self.bars
            .lock()
            .get(&(symbol.to_string(), timeframe.to_string()))
            .and_then(|e| e.fresh(self.bars_ttl))
    }

    /// Store bars for (symbol, timeframe).
    pub fn put_bars(&self, symbol: &str, timeframe: &str, bars: Vec<Bar>) {
        self.bars.lock().insert(
            (symbol.to_string(), timeframe.to_string()),
            Entry {
                value: bars,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.snapshots.lock().clear();
        self.bars.lock().clear();
    }

    /// Cache keys currently held, for diagnostics.
    #[must_use]
    pub fn keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<(String, String)> = self
            .snapshots
            .lock()
            .keys()
            .map(|s| (s.clone(), SNAPSHOT_KEY.to_string()))
            .collect();
        keys.extend(self.bars.lock().keys().cloned());
        keys
    }
}
