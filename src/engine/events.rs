//! Structured events the Sync Engine emits for UI/observability collaborators
//! (the CLI's own logger, and eventually a TUI) to subscribe to, instead of
//! the engine writing to stdout directly.

use crate::engine::timing::{PhaseName, PhaseTiming};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    PhaseStart {
        phase: PhaseName,
    },
    PhaseEnd {
        phase: PhaseName,
        duration: std::time::Duration,
        op_count: usize,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    /// One worktree's classification decision, for fine-grained UI updates.
    WorktreeStatus {
        branch: String,
        action: String,
    },
}

/// Where an [`Engine`](crate::engine::Engine) sends its events. A bounded
/// channel so a stalled UI consumer applies backpressure rather than letting
/// events pile up unbounded in memory during a long pass.
pub type EventSink = crossbeam_channel::Sender<EngineEvent>;

/// Convenience for constructing a sink/receiver pair sized for one pass's
/// worth of chatter without the engine blocking on a slow consumer under
/// normal conditions.
pub fn channel() -> (EventSink, crossbeam_channel::Receiver<EngineEvent>) {
    crossbeam_channel::bounded(256)
}

pub(crate) fn emit_log(sink: &EventSink, level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    match level {
        LogLevel::Debug => log::debug!("{message}"),
        LogLevel::Info => log::info!("{message}"),
        LogLevel::Warn => log::warn!("{message}"),
        LogLevel::Error => log::error!("{message}"),
    }
    let _ = sink.send(EngineEvent::Log { level, message });
}

pub(crate) fn emit_phase_start(sink: &EventSink, phase: PhaseName) {
    let _ = sink.send(EngineEvent::PhaseStart { phase });
}

pub(crate) fn emit_phase_end(sink: &EventSink, timing: &PhaseTiming) {
    let _ = sink.send(EngineEvent::PhaseEnd {
        phase: timing.phase,
        duration: timing.duration,
        op_count: timing.op_count,
    });
}

/// Per-classification-decision update, for fine-grained UI progress during
/// Phase 4 rather than waiting for the whole phase to finish.
pub(crate) fn emit_worktree_status(sink: &EventSink, branch: impl Into<String>, action: impl Into<String>) {
    let _ = sink.send(EngineEvent::WorktreeStatus {
        branch: branch.into(),
        action: action.into(),
    });
}
