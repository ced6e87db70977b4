//! Process-global metrics: atomic counters and a fixed-bucket histogram of
//! per-round durations. Initialised once at startup; no locks on the hot
//! path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use once_cell::sync::Lazy;

/// Upper bounds (milliseconds) of the round-duration histogram buckets; the
/// final bucket is unbounded.
const ROUND_BUCKETS_MS: [u64; 8] = [5, 10, 25, 50, 100, 500, 2_000, 10_000];

/// Histogram with fixed bucket bounds, counters all atomic.
pub struct DurationHistogram {
    buckets: [AtomicU64; 9],
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl DurationHistogram {
    const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU64 = AtomicU64::new(0);
        DurationHistogram { buckets: [ZERO; 9], count: ZERO, sum_ms: ZERO }
    }

    pub fn observe(&self, d: Duration) {
        let ms = d.as_millis() as u64;
        let idx = ROUND_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(ROUND_BUCKETS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<(u64, u64)> {
        let mut out = Vec::with_capacity(9);
        for (i, bucket) in self.buckets.iter().enumerate() {
            let bound = ROUND_BUCKETS_MS.get(i).copied().unwrap_or(u64::MAX);
            out.push((bound, bucket.load(Ordering::Relaxed)));
        }
        out
    }
}

/// The custody core's metric set.
pub struct Metrics {
    pub sessions_created: AtomicU64,
    pub sessions_completed: AtomicU64,
    pub sessions_failed: AtomicU64,
    pub sessions_cancelled: AtomicU64,
    pub messages_routed: AtomicU64,
    pub messages_deduplicated: AtomicU64,
    pub messages_discarded_past_round: AtomicU64,
    pub wal_appends: AtomicU64,
    pub auth_denied: AtomicU64,
    pub round_duration: DurationHistogram,
}

impl Metrics {
    const fn new() -> Self {
        Metrics {
            sessions_created: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_cancelled: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            messages_deduplicated: AtomicU64::new(0),
            messages_discarded_past_round: AtomicU64::new(0),
            wal_appends: AtomicU64::new(0),
            auth_denied: AtomicU64::new(0),
            round_duration: DurationHistogram::new(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Convenience: bump a counter by one.
pub fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
