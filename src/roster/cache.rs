//! Time-bounded roster cache.
//!
//! The cached roster lives behind an `Arc` that is swapped under a write lock, so a reader
//! always holds a complete old or new snapshot. A separate refresh mutex keeps concurrent
//! callers from fetching the same expired window twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use super::{normalize_table, Roster, RosterSource};

struct Cached {
    roster: Arc<Roster>,
    fetched_at: Instant,
}

pub struct RosterCache {
    source: Arc<dyn RosterSource>,
    ttl: Duration,
    current: RwLock<Option<Cached>>,
    refresh: Mutex<()>,
}

impl RosterCache {
    pub fn new(source: Arc<dyn RosterSource>, ttl: Duration) -> Self {
        Self { source, ttl, current: RwLock::new(None), refresh: Mutex::new(()) }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    /// Current roster, refetched when the last load (successful or not) is older than the TTL.
    /// Never fails: fetch and schema problems come back as a degraded roster.
    pub fn load(&self) -> Arc<Roster> {
        self.load_at(Instant::now())
    }

    /// `load` with an explicit clock reading.
    pub fn load_at(&self, now: Instant) -> Arc<Roster> {
        if let Some(hit) = self.fresh(now) {
            return hit;
        }
        let _guard = self.refresh.lock();
        // Another caller may have refreshed while we waited.
        if let Some(hit) = self.fresh(now) {
            return hit;
        }
        let roster = Arc::new(self.fetch_roster());
        *self.current.write() = Some(Cached { roster: roster.clone(), fetched_at: now });
        roster
    }

    /// Cached roster without triggering a fetch, whatever its age.
    pub fn peek(&self) -> Option<Arc<Roster>> {
        self.current.read().as_ref().map(|c| c.roster.clone())
    }

    /// Drop the cached roster so the next `load` fetches.
    pub fn invalidate(&self) {
        let _guard = self.refresh.lock();
        *self.current.write() = None;
        info!(target: "roster", "roster cache invalidated");
    }

    fn fresh(&self, now: Instant) -> Option<Arc<Roster>> {
        let cur = self.current.read();
        let cached = cur.as_ref()?;
        // refetch only once the load is older than the ttl
        if now.saturating_duration_since(cached.fetched_at) <= self.ttl {
            Some(cached.roster.clone())
        } else {
            None
        }
    }

    fn fetch_roster(&self) -> Roster {
        let started = Instant::now();
        let result = self.source.fetch().and_then(|table| normalize_table(&table));
        let elapsed_ms = started.elapsed().as_millis();
        match result {
            Ok(roster) => {
                info!(
                    target: "roster",
                    source = %self.source.describe(),
                    records = roster.len(),
                    elapsed_ms = elapsed_ms as u64,
                    "roster loaded"
                );
                roster
            }
            Err(e) => {
                warn!(
                    target: "roster",
                    source = %self.source.describe(),
                    elapsed_ms = elapsed_ms as u64,
                    "roster degraded: {}", e
                );
                Roster::degraded(e)
            }
        }
    }
}
