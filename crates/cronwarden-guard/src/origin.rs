//! Volatile per-origin failure counter with sliding expiration.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long an origin's count survives without a new failure.
pub const ORIGIN_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u32,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Failed-login counts keyed by origin address.
///
/// Each increment pushes the entry's expiry out to `ttl` from now; an entry
/// that outlives its expiry reads as zero. Updates are atomic per key.
#[derive(Debug)]
pub struct OriginFailures {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl OriginFailures {
    pub fn new() -> Self {
        Self::with_ttl(ORIGIN_WINDOW)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record one failure for `origin` and return the new count.
    pub fn increment(&self, origin: &str) -> u32 {
        let now = Instant::now();
        let mut entry = self.entries.entry(origin.to_string()).or_insert(Entry {
            count: 0,
            expires_at: now,
        });
        if !entry.is_live(now) {
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        entry.expires_at = now + self.ttl;
        entry.count
    }

    /// Current count for `origin`, zero if absent or expired.
    pub fn count(&self, origin: &str) -> u32 {
        let now = Instant::now();
        self.entries
            .get(origin)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Forget `origin` entirely. Returns whether an entry existed.
    pub fn reset(&self, origin: &str) -> bool {
        self.entries.remove(origin).is_some()
    }

    /// Drop every expired entry and return how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked origins, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Purge expired entries every `period` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let counters = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Origin counter sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let purged = counters.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Purged expired origin counters");
                        }
                    }
                }
            }
        })
    }
}

impl Default for OriginFailures {
    fn default() -> Self {
        Self::new()
    }
}
