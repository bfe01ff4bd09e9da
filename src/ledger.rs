//! Bounded record of inbound mentions that have already been handled.
//!
//! Entries leave the ledger in three ways: a read finds them older than the
//! retention window, the periodic sweep finds them older than the retention
//! window, or an insert at capacity evicts the oldest tenth.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::task::TaskHandle;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub capacity: usize,
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            retention: DEFAULT_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MentionRecord {
    pub processed: bool,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    mentions: HashMap<String, MentionRecord>,
    last_sweep: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MentionLedger {
    config: LedgerConfig,
    retention: chrono::Duration,
    sweep_interval: chrono::Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl Default for MentionLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl MentionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        let config = LedgerConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        let inner = Inner {
            mentions: HashMap::new(),
            last_sweep: clock.now(),
        };
        Self {
            retention: to_chrono(config.retention),
            sweep_interval: to_chrono(config.sweep_interval),
            config,
            clock,
            inner: Mutex::new(inner),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.lock().mentions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expired entries read as unprocessed and are removed on the spot.
    pub fn is_processed(&self, id: &str) -> Result<bool> {
        let id = validate_id(id)?;
        let now = self.clock.now();
        let mut inner = self.lock();
        Ok(self.live_entry(&mut inner, id, now))
    }

    /// Idempotent: marking an already-processed id changes nothing.
    pub fn mark_processed(&self, id: &str) -> Result<()> {
        self.check_and_mark(id).map(|_| ())
    }

    /// Mark `id` processed in one step and report whether it already was.
    pub fn check_and_mark(&self, id: &str) -> Result<bool> {
        let id = validate_id(id)?;
        let now = self.clock.now();
        let mut inner = self.lock();
        if self.live_entry(&mut inner, id, now) {
            debug!(id, "mention already processed");
            return Ok(true);
        }

        if inner.mentions.len() >= self.config.capacity {
            self.evict_oldest(&mut inner);
        }
        inner.mentions.insert(
            id.to_string(),
            MentionRecord {
                processed: true,
                processed_at: now,
            },
        );
        debug!(id, size = inner.mentions.len(), "marked mention processed");
        Ok(false)
    }

    /// Remove every expired entry. Calls closer together than the sweep
    /// interval are no-ops and return 0.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        if now - inner.last_sweep < self.sweep_interval {
            return 0;
        }
        self.sweep_locked(&mut inner, now)
    }

    /// Scheduled sweep. Tick jitter can bring two ticks closer than the
    /// interval, so the guard of `sweep_expired` does not apply here.
    fn run_sweep(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.sweep_locked(&mut inner, now)
    }

    fn sweep_locked(&self, inner: &mut Inner, now: DateTime<Utc>) -> usize {
        let before = inner.mentions.len();
        let retention = self.retention;
        inner
            .mentions
            .retain(|_, record| now - record.processed_at <= retention);
        let removed = before - inner.mentions.len();
        inner.last_sweep = now;

        if removed > 0 {
            info!(removed, remaining = inner.mentions.len(), "swept expired mentions");
        }
        removed
    }

    /// Sweep every sweep interval until the handle is stopped or dropped.
    pub fn start_sweeper(self: &Arc<Self>) -> TaskHandle {
        let ledger = Arc::clone(self);
        let period = self.config.sweep_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                ledger.run_sweep();
            }
        });
        TaskHandle::new(task)
    }

    fn live_entry(&self, inner: &mut Inner, id: &str, now: DateTime<Utc>) -> bool {
        let Some(record) = inner.mentions.get(id).copied() else {
            return false;
        };
        if now - record.processed_at > self.retention {
            inner.mentions.remove(id);
            debug!(id, "expired mention removed");
            return false;
        }
        record.processed
    }

    fn evict_oldest(&self, inner: &mut Inner) {
        let count = inner.mentions.len().div_ceil(10).max(1);
        let mut by_age: Vec<(DateTime<Utc>, String)> = inner
            .mentions
            .iter()
            .map(|(id, record)| (record.processed_at, id.clone()))
            .collect();
        by_age.sort_unstable();
        for (_, id) in by_age.into_iter().take(count) {
            inner.mentions.remove(&id);
        }
        debug!(count, remaining = inner.mentions.len(), "evicted oldest mentions");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn validate_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::Validation("mention id is required".into()));
    }
    Ok(id)
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn ledger(capacity: usize) -> (MentionLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = LedgerConfig {
            capacity,
            ..LedgerConfig::default()
        };
        (MentionLedger::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn mark_processed_is_idempotent() {
        let (ledger, clock) = ledger(10);
        assert!(!ledger.is_processed("m1").unwrap());
        ledger.mark_processed("m1").unwrap();
        clock.advance(chrono::Duration::minutes(5));
        ledger.mark_processed("m1").unwrap();
        assert!(ledger.is_processed("m1").unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn check_and_mark_reports_duplicates() {
        let (ledger, _) = ledger(10);
        assert!(!ledger.check_and_mark("m1").unwrap());
        assert!(ledger.check_and_mark("m1").unwrap());
        assert!(ledger.check_and_mark(" m1 ").unwrap());
    }

    #[test]
    fn empty_id_is_rejected() {
        let (ledger, _) = ledger(10);
        assert!(matches!(ledger.is_processed(""), Err(Error::Validation(_))));
        assert!(matches!(ledger.mark_processed("   "), Err(Error::Validation(_))));
    }

    #[test]
    fn capacity_eviction_removes_oldest_tenth() {
        let (ledger, clock) = ledger(20);
        for i in 0..20 {
            ledger.mark_processed(&format!("m{}", i)).unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }
        assert_eq!(ledger.len(), 20);

        ledger.mark_processed("new").unwrap();
        // Two oldest of twenty evicted, then one inserted.
        assert_eq!(ledger.len(), 19);
        assert!(!ledger.is_processed("m0").unwrap());
        assert!(!ledger.is_processed("m1").unwrap());
        assert!(ledger.is_processed("m2").unwrap());
        assert!(ledger.is_processed("new").unwrap());
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let (ledger, clock) = ledger(7);
        for i in 0..100 {
            ledger.mark_processed(&format!("m{}", i)).unwrap();
            clock.advance(chrono::Duration::milliseconds(10));
            assert!(ledger.len() <= 7);
        }
    }

    #[test]
    fn expired_entry_reads_unprocessed_and_is_removed() {
        let (ledger, clock) = ledger(10);
        ledger.mark_processed("old").unwrap();
        clock.advance(chrono::Duration::days(8));
        assert!(!ledger.is_processed("old").unwrap());
        assert_eq!(ledger.len(), 0);
        // A fresh mark after expiry is a first-time observation again.
        assert!(!ledger.check_and_mark("old").unwrap());
    }

    #[test]
    fn sweep_removes_expired_and_ignores_early_calls() {
        let (ledger, clock) = ledger(10);
        ledger.mark_processed("old").unwrap();
        // Too soon after construction.
        assert_eq!(ledger.sweep_expired(), 0);

        clock.advance(chrono::Duration::days(6));
        ledger.mark_processed("recent").unwrap();
        clock.advance(chrono::Duration::days(2));
        assert_eq!(ledger.sweep_expired(), 1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_processed("recent").unwrap());

        // Overlapping sweep right after the last one.
        assert_eq!(ledger.sweep_expired(), 0);
    }

    #[test]
    fn late_tick_does_not_skip_the_next_scheduled_sweep() {
        let clock = Arc::new(ManualClock::default());
        let ledger = MentionLedger::with_clock(
            LedgerConfig {
                retention: Duration::from_secs(30),
                sweep_interval: Duration::from_secs(60),
                ..LedgerConfig::default()
            },
            clock.clone(),
        );

        // First tick wakes 5ms late.
        clock.advance(chrono::Duration::milliseconds(60_005));
        assert_eq!(ledger.run_sweep(), 0);
        ledger.mark_processed("m").unwrap();

        // Second tick lands on schedule, less than one interval later.
        clock.advance(chrono::Duration::milliseconds(59_996));
        assert_eq!(ledger.sweep_expired(), 0);
        assert_eq!(ledger.run_sweep(), 1);
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_interval_and_stops() {
        let clock = Arc::new(ManualClock::default());
        let ledger = Arc::new(MentionLedger::with_clock(
            LedgerConfig {
                sweep_interval: Duration::from_secs(60),
                ..LedgerConfig::default()
            },
            clock.clone(),
        ));
        ledger.mark_processed("old").unwrap();
        clock.advance(chrono::Duration::days(8));

        let handle = ledger.start_sweeper();
        assert!(handle.is_running());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ledger.len(), 0);

        handle.stop();
        ledger.mark_processed("later").unwrap();
        clock.advance(chrono::Duration::days(8));
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(ledger.len(), 1);
    }
}
