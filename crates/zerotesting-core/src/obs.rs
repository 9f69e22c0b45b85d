//! Structured observability hooks for the experiment lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for lifecycle milestones
//!
//! Milestones are emitted at `info!`, failures at `warn!`.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped span for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter("waku-regression", "3f1c...");
/// // every event below carries experiment and run_id
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(experiment: &str, run_id: &str) -> Self {
        let span = tracing::info_span!("zerotesting.run", experiment = %experiment, run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_run_started(experiment: &str, workdir: &std::path::Path) {
    info!(event = "run.started", experiment = %experiment, workdir = %workdir.display());
}

pub fn emit_deployment_applied(name: &str, kind: &str, digest: &str) {
    info!(event = "deployment.applied", deployment = %name, kind = %kind, digest = %digest);
}

pub fn emit_rollout_ready(name: &str, waited_ms: u64) {
    info!(event = "deployment.ready", deployment = %name, waited_ms = waited_ms);
}

/// Cleanup never propagates; this is the only trace a failure leaves.
pub fn emit_cleanup_failed(what: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", what = %what, error = %error);
}

pub fn emit_run_finished(experiment: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        experiment = %experiment,
        duration_ms = duration_ms,
        success = success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_cleanup_failure_is_logged() {
        let _span = RunSpan::enter("exp", "run-1");
        emit_cleanup_failed("delete Pod ns/p", &"boom");
        assert!(logs_contain("cleanup.failed"));
        assert!(logs_contain("boom"));
    }
}
