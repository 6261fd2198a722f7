//! Global atomic counters for evaluation telemetry.
//!
//! Counters are incremented at the call site and never read by the workflow.
//! Call [`Metrics::flush`] to emit current values as one `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    evaluations_started: AtomicU64,
    evaluations_completed: AtomicU64,
    evaluations_failed: AtomicU64,
    delegate_retries: AtomicU64,
    criteria_degraded: AtomicU64,
    criteria_missing: AtomicU64,
    audits_run: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations_started: AtomicU64::new(0),
            evaluations_completed: AtomicU64::new(0),
            evaluations_failed: AtomicU64::new(0),
            delegate_retries: AtomicU64::new(0),
            criteria_degraded: AtomicU64::new(0),
            criteria_missing: AtomicU64::new(0),
            audits_run: AtomicU64::new(0),
        }
    }

    pub fn inc_evaluations_started(&self) {
        self.evaluations_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_started", "counter incremented");
    }

    pub fn inc_evaluations_completed(&self) {
        self.evaluations_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_completed", "counter incremented");
    }

    pub fn inc_evaluations_failed(&self) {
        self.evaluations_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_failed", "counter incremented");
    }

    pub fn inc_delegate_retries(&self) {
        self.delegate_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "delegate_retries", "counter incremented");
    }

    pub fn inc_criteria_degraded(&self) {
        self.criteria_degraded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "criteria_degraded", "counter incremented");
    }

    pub fn inc_criteria_missing(&self) {
        self.criteria_missing.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "criteria_missing", "counter incremented");
    }

    pub fn inc_audits_run(&self) {
        self.audits_run.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "audits_run", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call at natural boundaries such as the end of a CLI run.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations_started = self.evaluations_started(),
            evaluations_completed = self.evaluations_completed(),
            evaluations_failed = self.evaluations_failed(),
            delegate_retries = self.delegate_retries(),
            criteria_degraded = self.criteria_degraded(),
            criteria_missing = self.criteria_missing(),
            audits_run = self.audits_run(),
        );
    }

    pub fn evaluations_started(&self) -> u64 {
        self.evaluations_started.load(Ordering::Relaxed)
    }

    pub fn evaluations_completed(&self) -> u64 {
        self.evaluations_completed.load(Ordering::Relaxed)
    }

    pub fn evaluations_failed(&self) -> u64 {
        self.evaluations_failed.load(Ordering::Relaxed)
    }

    pub fn delegate_retries(&self) -> u64 {
        self.delegate_retries.load(Ordering::Relaxed)
    }

    pub fn criteria_degraded(&self) -> u64 {
        self.criteria_degraded.load(Ordering::Relaxed)
    }

    pub fn criteria_missing(&self) -> u64 {
        self.criteria_missing.load(Ordering::Relaxed)
    }

    pub fn audits_run(&self) -> u64 {
        self.audits_run.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.evaluations_started,
            &self.evaluations_completed,
            &self.evaluations_failed,
            &self.delegate_retries,
            &self.criteria_degraded,
            &self.criteria_missing,
            &self.audits_run,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
