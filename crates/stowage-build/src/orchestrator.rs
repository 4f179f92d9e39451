//! Build dispatch.
//!
//! `fail-fast` builds strictly one unit at a time and stops at the first
//! failure. `continue` dispatches every unit with at most `workers` builds in
//! flight. In both modes results come back in request order, and a cancelled
//! run stops dispatching and kills in-flight builds.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use stowage_core::{
    emit_build_dispatched, emit_build_finished, BuildResult, CancelSignal, ReportCollector,
    RunMode, SkipReason,
};

use crate::builder::ImageBuilder;
use crate::error::BuildError;
use crate::request::BuildRequest;

pub struct Orchestrator {
    builder: Arc<dyn ImageBuilder>,
    mode: RunMode,
    workers: usize,
}

impl Orchestrator {
    pub fn new(builder: Arc<dyn ImageBuilder>, mode: RunMode, workers: usize) -> Self {
        Self {
            builder,
            mode,
            workers: workers.max(1),
        }
    }

    /// Build every request and record each result in `collector`.
    #[instrument(skip_all, fields(mode = ?self.mode, units = requests.len()))]
    pub async fn run(
        &self,
        requests: Vec<BuildRequest>,
        cancel: CancelSignal,
        collector: &ReportCollector,
    ) -> Vec<BuildResult> {
        match self.mode {
            RunMode::FailFast => self.run_sequential(requests, cancel, collector).await,
            RunMode::Continue => self.run_parallel(requests, cancel, collector).await,
        }
    }

    async fn run_sequential(
        &self,
        requests: Vec<BuildRequest>,
        cancel: CancelSignal,
        collector: &ReportCollector,
    ) -> Vec<BuildResult> {
        let mut results = Vec::with_capacity(requests.len());
        let mut aborted = false;

        for request in requests {
            let result = if cancel.is_cancelled() {
                BuildResult::skipped(request.unit(), SkipReason::Cancelled)
            } else if aborted {
                BuildResult::skipped(request.unit(), SkipReason::Aborted)
            } else {
                execute(self.builder.as_ref(), &request, cancel.clone()).await
            };

            if result.is_failed() && !aborted {
                info!(unit = %result.unit, "build failed, skipping remaining units");
                aborted = true;
            }
            emit_build_finished(&result);
            collector.record_result(result.clone());
            results.push(result);
        }
        results
    }

    async fn run_parallel(
        &self,
        requests: Vec<BuildRequest>,
        cancel: CancelSignal,
        collector: &ReportCollector,
    ) -> Vec<BuildResult> {
        let sem = Arc::new(Semaphore::new(self.workers));
        let units: Vec<String> = requests.iter().map(|r| r.unit().to_string()).collect();

        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let builder = Arc::clone(&self.builder);
                let sem = Arc::clone(&sem);
                let cancel = cancel.clone();
                let collector = collector.clone();

                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok();

                    let result = if cancel.is_cancelled() {
                        BuildResult::skipped(request.unit(), SkipReason::Cancelled)
                    } else {
                        execute(builder.as_ref(), &request, cancel).await
                    };
                    emit_build_finished(&result);
                    collector.record_result(result.clone());
                    result
                })
            })
            .collect();

        let joined = futures::future::join_all(tasks).await;
        joined
            .into_iter()
            .zip(units)
            .map(|(outcome, unit)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(unit = %unit, error = %e, "build task panicked");
                    let result = BuildResult::failed(unit, Vec::new(), Vec::new(), format!("build task failed: {}", e), 0);
                    collector.record_result(result.clone());
                    result
                }
            })
            .collect()
    }
}

/// Run one build under its timeout, racing the cancellation signal.
///
/// Dropping the builder future on timeout or cancellation kills the child.
pub async fn execute(builder: &dyn ImageBuilder, request: &BuildRequest, mut cancel: CancelSignal) -> BuildResult {
    let start = Instant::now();
    let platforms = request.platform_strings();
    emit_build_dispatched(request.unit(), &platforms, request.push());

    let outcome = tokio::select! {
        res = tokio::time::timeout(request.timeout(), builder.build(request)) => {
            res.unwrap_or_else(|_| Err(BuildError::TimedOut(request.timeout())))
        }
        _ = cancel.cancelled() => Err(BuildError::Cancelled),
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(outcome) => {
            let manifest_ref = outcome.digest.as_deref().and_then(|digest| {
                request
                    .tags()
                    .first()
                    .map(|tag| format!("{}@{}", repository_of(tag), digest))
            });
            BuildResult::succeeded(
                request.unit(),
                platforms,
                request.tags().to_vec(),
                request.push(),
                manifest_ref,
                duration_ms,
            )
        }
        Err(BuildError::Cancelled) => BuildResult::skipped(request.unit(), SkipReason::Cancelled),
        Err(e) => BuildResult::failed(request.unit(), platforms, request.tags().to_vec(), e.to_string(), duration_ms),
    }
}

/// `registry/repo/name:tag` → `registry/repo/name`. A `:` inside the host
/// part (a port) is kept.
fn repository_of(tag: &str) -> &str {
    let last_slash = tag.rfind('/').map_or(0, |i| i + 1);
    match tag[last_slash..].find(':') {
        Some(colon) => &tag[..last_slash + colon],
        None => tag,
    }
}
