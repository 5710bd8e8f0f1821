//! Per-run counters for discovery yield and rejection tuning.
//!
//! A [`RunHandle`] is created at run start and passed explicitly to every
//! component that evaluates a message. Each evaluated message lands in
//! exactly one counter: a histogram bucket if it became a new pending item,
//! or one rejection reason otherwise. `scanned` and `flagged` are derived
//! from those counters when the run is finalized, so both accounting
//! identities hold for every persisted row.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::db::{ConfidenceHistogram, DiscoveryRunStats, RejectionBreakdown, SharedDb};
use crate::error::HearthError;
use crate::types::{ConfidenceBucket, RejectionReason};

struct RunCounters {
    run_id: String,
    pack_id: String,
    started_at: DateTime<Utc>,
    histogram: [AtomicU64; 5],
    rejections: [AtomicU64; 5],
    sampled_for_review: AtomicU64,
    error_count: AtomicU64,
    sample_cap: u64,
}

/// Handle to an in-flight discovery run. Cheap to clone across workers.
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<RunCounters>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.inner.run_id)
            .field("pack_id", &self.inner.pack_id)
            .finish()
    }
}

impl RunHandle {
    pub(crate) fn new(pack_id: &str, sample_cap: u64) -> Self {
        Self {
            inner: Arc::new(RunCounters {
                run_id: uuid::Uuid::new_v4().to_string(),
                pack_id: pack_id.to_string(),
                started_at: Utc::now(),
                histogram: Default::default(),
                rejections: Default::default(),
                sampled_for_review: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                sample_cap,
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn pack_id(&self) -> &str {
        &self.inner.pack_id
    }

    /// A message became a new pending item with this score.
    pub fn record_included(&self, score: f64) {
        let bucket = ConfidenceBucket::from_score(score);
        self.inner.histogram[bucket.index()].fetch_add(1, Ordering::Relaxed);
        let cap = self.inner.sample_cap;
        let _ = self
            .inner
            .sampled_for_review
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < cap).then_some(n + 1)
            });
    }

    /// A message was evaluated and did not become a new pending item.
    pub fn record_excluded(&self, reason: RejectionReason) {
        self.inner.rejections[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// A per-item external failure. Counted as `other` and as an error.
    pub fn record_failure(&self) {
        self.record_excluded(RejectionReason::Other);
        self.inner.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values. Consistent by construction.
    pub fn snapshot(&self, finished_at: DateTime<Utc>) -> DiscoveryRunStats {
        let load = |slots: &[AtomicU64; 5]| {
            let mut out = [0u64; 5];
            for (i, slot) in slots.iter().enumerate() {
                out[i] = slot.load(Ordering::Relaxed);
            }
            out
        };
        let histogram = ConfidenceHistogram::from_counts(load(&self.inner.histogram));
        let rejections = RejectionBreakdown::from_counts(load(&self.inner.rejections));
        let flagged = histogram.total();

        DiscoveryRunStats {
            run_id: self.inner.run_id.clone(),
            pack_id: self.inner.pack_id.clone(),
            started_at: self.inner.started_at,
            finished_at,
            scanned: flagged + rejections.total(),
            flagged,
            histogram,
            sampled_for_review: self.inner.sampled_for_review.load(Ordering::Relaxed),
            rejections,
            error_count: self.inner.error_count.load(Ordering::Relaxed),
        }
    }
}

/// Starts runs and persists their final counters.
#[derive(Clone)]
pub struct RunRecorder {
    db: SharedDb,
    review_sample_cap: u64,
}

impl RunRecorder {
    pub fn new(db: SharedDb, review_sample_cap: u64) -> Self {
        Self {
            db,
            review_sample_cap,
        }
    }

    pub fn start_run(&self, pack_id: &str) -> RunHandle {
        let handle = RunHandle::new(pack_id, self.review_sample_cap);
        log::info!("Discovery run {} started for pack '{}'", handle.run_id(), pack_id);
        handle
    }

    /// Persist the run's counters as one immutable row.
    pub fn finalize_run(&self, handle: RunHandle) -> Result<DiscoveryRunStats, HearthError> {
        let stats = handle.snapshot(Utc::now());
        self.db.lock().insert_run_stats(&stats)?;
        log::info!(
            "Discovery run {} finished: scanned={} flagged={} yield={:.2} errors={}",
            stats.run_id,
            stats.scanned,
            stats.flagged,
            stats.yield_rate(),
            stats.error_count
        );
        Ok(stats)
    }

    pub fn recent_runs(
        &self,
        pack_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DiscoveryRunStats>, HearthError> {
        Ok(self.db.lock().recent_runs(pack_id, limit)?)
    }

    /// Rejection reasons summed over the last `days` days.
    pub fn rejection_totals(
        &self,
        pack_id: Option<&str>,
        days: i64,
    ) -> Result<RejectionBreakdown, HearthError> {
        let since = Utc::now() - Duration::days(days);
        Ok(self.db.lock().rejection_totals(pack_id, &since)?)
    }
}
