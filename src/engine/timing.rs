//! Phase timing and the end-of-pass performance summary (§4.F Phase 6).

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseName {
    Prune,
    Fetch,
    Enumerate,
    OrphanCleanup,
    Classify,
    CreateMissing,
    Finalize,
}

impl PhaseName {
    pub fn label(self) -> &'static str {
        match self {
            PhaseName::Prune => "prune",
            PhaseName::Fetch => "fetch",
            PhaseName::Enumerate => "enumerate",
            PhaseName::OrphanCleanup => "orphan-cleanup",
            PhaseName::Classify => "classify",
            PhaseName::CreateMissing => "create-missing",
            PhaseName::Finalize => "finalize",
        }
    }
}

/// One phase's recorded duration and the number of discrete operations it
/// performed (git invocations, filesystem moves — whatever unit the phase
/// counts), used to compute parallel efficiency.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTiming {
    pub phase: PhaseName,
    pub duration: Duration,
    pub op_count: usize,
}

/// Measures one phase's wall-clock duration; call [`Self::finish`] with the
/// operation count once the phase completes.
pub struct PhaseStopwatch {
    phase: PhaseName,
    started: Instant,
}

impl PhaseStopwatch {
    pub fn start(phase: PhaseName) -> Self {
        Self {
            phase,
            started: Instant::now(),
        }
    }

    pub fn finish(self, op_count: usize) -> PhaseTiming {
        PhaseTiming {
            phase: self.phase,
            duration: self.started.elapsed(),
            op_count,
        }
    }
}

/// A table of every phase's timing for one pass, plus a parallel-efficiency
/// estimate: the ratio of what sequential execution of all operations would
/// have cost (at an assumed per-op cost derived from the slowest
/// single-operation phase) against the actual wall-clock total. Values near
/// 1.0 mean concurrency bought little; lower values mean the parallelism
/// limiter is earning its keep.
#[derive(Debug, Clone, Default)]
pub struct PerformanceSummary {
    pub phases: Vec<PhaseTiming>,
}

impl PerformanceSummary {
    pub fn record(&mut self, timing: PhaseTiming) {
        self.phases.push(timing);
    }

    pub fn total_duration(&self) -> Duration {
        self.phases.iter().map(|p| p.duration).sum()
    }

    pub fn total_ops(&self) -> usize {
        self.phases.iter().map(|p| p.op_count).sum()
    }

    /// `mean-per-op-time-across-phases * op_count / actual-wall-clock`,
    /// clamped to `[0, 1]`. Phases with zero recorded ops don't contribute to
    /// the mean (an empty pass has no parallelism to speak of).
    pub fn parallel_efficiency(&self) -> f64 {
        let timed_phases: Vec<&PhaseTiming> = self.phases.iter().filter(|p| p.op_count > 0).collect();
        if timed_phases.is_empty() {
            return 1.0;
        }
        let mean_per_op = timed_phases
            .iter()
            .map(|p| p.duration.as_secs_f64() / p.op_count as f64)
            .sum::<f64>()
            / timed_phases.len() as f64;
        let theoretical_sequential = mean_per_op * self.total_ops() as f64;
        let actual = self.total_duration().as_secs_f64();
        if actual <= 0.0 {
            return 1.0;
        }
        (theoretical_sequential / actual).clamp(0.0, 1.0)
    }
}
