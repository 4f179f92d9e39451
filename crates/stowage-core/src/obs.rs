//! Structured lifecycle events for a stowage run.
//!
//! Every event carries an `event` field so log pipelines can filter on it:
//! `run.started`, `unit.validated`, `build.dispatched`, `build.finished`,
//! `verify.finished`, `run.finished`.

use tracing::{info, warn};

use crate::domain::{BuildResult, BuildStatus, Verification};

/// RAII guard that keeps a run-scoped span entered.
///
/// ```ignore
/// let _span = RunSpan::enter(&run_id.to_string());
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The run-scoped span itself, for instrumenting futures.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("stowage.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, units: usize, config_digest: &str) {
    info!(event = "run.started", run_id = %run_id, units = units, config_digest = %config_digest);
}

pub fn emit_unit_validated(unit: &str, issues: usize, checked_sources: usize) {
    info!(event = "unit.validated", unit = %unit, issues = issues, checked_sources = checked_sources);
}

pub fn emit_build_dispatched(unit: &str, platforms: &[String], push: bool) {
    info!(
        event = "build.dispatched",
        unit = %unit,
        platforms = %platforms.join(","),
        push = push,
    );
}

pub fn emit_build_finished(result: &BuildResult) {
    match &result.status {
        BuildStatus::Succeeded => info!(
            event = "build.finished",
            unit = %result.unit,
            status = "succeeded",
            duration_ms = result.duration_ms,
        ),
        BuildStatus::Failed { detail } => warn!(
            event = "build.finished",
            unit = %result.unit,
            status = "failed",
            detail = %detail,
            duration_ms = result.duration_ms,
        ),
        BuildStatus::Skipped { reason } => info!(
            event = "build.finished",
            unit = %result.unit,
            status = "skipped",
            reason = %reason,
        ),
    }
}

pub fn emit_verify_finished(unit: &str, verification: &Verification) {
    match verification {
        Verification::VerificationFailed { reason } => {
            warn!(event = "verify.finished", unit = %unit, verified = false, reason = %reason)
        }
        Verification::Verified { platforms } => info!(
            event = "verify.finished",
            unit = %unit,
            verified = true,
            platforms = %platforms.join(","),
        ),
        Verification::NotAttempted => {}
    }
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, blocking: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        passed = !blocking,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SkipReason;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
    }

    #[test]
    fn test_emit_for_every_status() {
        emit_build_finished(&BuildResult::skipped("a", SkipReason::Aborted));
        emit_build_finished(&BuildResult::failed("b", vec![], vec![], "exit 1", 10));
        emit_verify_finished("c", &Verification::NotAttempted);
    }
}
