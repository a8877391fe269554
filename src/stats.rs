//! Run-level counters and their consistency checks.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Counters for one harvest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Fast-path attempts.
    pub seen: u64,
    /// Fast-path successes.
    pub accepted: u64,
    /// Fast-path failures routed to the fallback list.
    pub deferred: u64,
    /// Render-path attempts actually run.
    pub rendered: u64,
    /// Documents written to the store by either tier.
    pub persisted: u64,
    /// Documents dropped because they failed validation.
    pub rejected: u64,
    /// Deferred URLs the router could not re-enqueue for rendering.
    pub fallback_dropped: u64,
    /// Share of rendered pages among produced pages, as a whole percentage.
    pub rendered_rate: u64,
}

/// Raised when the fast-phase counters disagree at the barrier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    /// `accepted + deferred != seen`.
    #[error("barrier mismatch: accepted {accepted} + deferred {deferred} != seen {seen}")]
    BarrierMismatch {
        /// Fast-path attempts.
        seen: u64,
        /// Fast-path successes.
        accepted: u64,
        /// Fast-path deferrals.
        deferred: u64,
    },
}

impl RunStats {
    /// Checks `accepted + deferred == seen`. Call after the fast phase drains.
    pub fn check_barrier(&self) -> Result<(), StatsError> {
        if self.accepted + self.deferred == self.seen {
            Ok(())
        } else {
            Err(StatsError::BarrierMismatch {
                seen: self.seen,
                accepted: self.accepted,
                deferred: self.deferred,
            })
        }
    }

    /// Computes `rendered_rate` once both phases are done.
    pub fn finalize(mut self) -> Self {
        self.rendered_rate = compute_rendered_rate(self.accepted, self.rendered);
        self
    }

    /// Prints the run summary block.
    pub fn report(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f32().max(f32::EPSILON);
        println!("--- harvest stats ({secs:.2}s) ---");
        println!("urls seen: {}", self.seen);
        println!("fast accepted: {}", self.accepted);
        println!("deferred to render: {}", self.deferred);
        println!("rendered: {}", self.rendered);
        println!("rendered rate: {}%", self.rendered_rate);
        println!("documents persisted: {}", self.persisted);
        println!("validation rejects: {}", self.rejected);
        println!("fallback drops: {}", self.fallback_dropped);
        println!(
            "pages/sec: {:.2}",
            (self.seen + self.rendered) as f32 / secs
        );
    }
}

/// `round(rendered / (accepted + rendered) * 100)`, half rounding up; 0 when nothing was produced.
pub fn compute_rendered_rate(accepted: u64, rendered: u64) -> u64 {
    let denominator = accepted + rendered;
    if denominator == 0 {
        return 0;
    }
    (rendered * 200 + denominator) / (2 * denominator)
}

/// Atomic counters bumped by pipeline handlers during one phase.
#[derive(Debug, Default)]
pub struct PhaseCounters {
    seen: AtomicU64,
    accepted: AtomicU64,
    deferred: AtomicU64,
    rendered: AtomicU64,
    persisted: AtomicU64,
    rejected: AtomicU64,
}

impl PhaseCounters {
    pub(crate) fn record_seen(&self) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rendered(&self) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds this phase's counts onto `stats`.
    pub fn fold_into(&self, mut stats: RunStats) -> RunStats {
        stats.seen += self.seen.load(Ordering::Relaxed);
        stats.accepted += self.accepted.load(Ordering::Relaxed);
        stats.deferred += self.deferred.load(Ordering::Relaxed);
        stats.rendered += self.rendered.load(Ordering::Relaxed);
        stats.persisted += self.persisted.load(Ordering::Relaxed);
        stats.rejected += self.rejected.load(Ordering::Relaxed);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_rate_rounds_half_up() {
        assert_eq!(compute_rendered_rate(0, 0), 0);
        assert_eq!(compute_rendered_rate(2, 0), 0);
        assert_eq!(compute_rendered_rate(0, 3), 100);
        assert_eq!(compute_rendered_rate(1, 1), 50);
        assert_eq!(compute_rendered_rate(2, 1), 33);
        assert_eq!(compute_rendered_rate(1, 2), 67);
        assert_eq!(compute_rendered_rate(7, 1), 13);
        assert_eq!(compute_rendered_rate(199, 1), 1);
    }

    #[test]
    fn barrier_detects_mismatch() {
        let mut stats = RunStats {
            seen: 3,
            accepted: 2,
            deferred: 1,
            ..RunStats::default()
        };
        assert!(stats.check_barrier().is_ok());
        stats.seen = 4;
        assert_eq!(
            stats.check_barrier(),
            Err(StatsError::BarrierMismatch {
                seen: 4,
                accepted: 2,
                deferred: 1
            })
        );
    }

    #[test]
    fn counters_fold_across_phases() {
        let fast = PhaseCounters::default();
        fast.record_seen();
        fast.record_seen();
        fast.record_accepted();
        fast.record_deferred();
        fast.record_persisted();
        let stats = fast.fold_into(RunStats::default());

        let render = PhaseCounters::default();
        render.record_rendered();
        render.record_persisted();
        let stats = render.fold_into(stats).finalize();

        assert_eq!(stats.seen, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.deferred, 1);
        assert_eq!(stats.rendered, 1);
        assert_eq!(stats.persisted, 2);
        assert_eq!(stats.rendered_rate, 50);
    }
}
