//! End-to-end run: discover, validate, build, verify, report.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};

use stowage_core::discovery::UnitRegistry;
use stowage_core::{
    discover, emit_run_finished, emit_run_started, run_span, validate_units, BuildResult,
    ReportCollector, RunContext, RunMeta, RunReport, SkipReason, StowageError, UnitValidation,
};

use crate::builder::ImageBuilder;
use crate::orchestrator::Orchestrator;
use crate::registry::RegistryClient;
use crate::request::BuildRequest;
use crate::verifier::ManifestVerifier;

/// Wires discovery, validation, the builder and the registry together.
pub struct Pipeline {
    builder: Arc<dyn ImageBuilder>,
    registry: Arc<dyn RegistryClient>,
    selection: Vec<String>,
}

/// Units and their validation outcome, before anything is built.
struct Validated {
    units: UnitRegistry,
    validations: Vec<UnitValidation>,
    collector: ReportCollector,
}

impl Pipeline {
    pub fn new(builder: Arc<dyn ImageBuilder>, registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            builder,
            registry,
            selection: Vec::new(),
        }
    }

    /// Restrict the run to the named units.
    pub fn with_selection(mut self, units: Vec<String>) -> Self {
        self.selection = units;
        self
    }

    /// Discovery and validation only; nothing is built.
    pub async fn validate(&self, ctx: &RunContext) -> Result<RunReport, StowageError> {
        self.validate_only(ctx)
            .instrument(run_span(&ctx.run_id().to_string()))
            .await
    }

    /// The full run.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport, StowageError> {
        self.run_all(ctx)
            .instrument(run_span(&ctx.run_id().to_string()))
            .await
    }

    async fn validate_only(&self, ctx: &RunContext) -> Result<RunReport, StowageError> {
        let started_at = Utc::now();
        let started = Instant::now();

        let validated = self.discover_and_validate(ctx).await?;
        let report = validated.collector.finalize(run_meta(ctx, started_at));
        emit_run_finished(
            &ctx.run_id().to_string(),
            started.elapsed().as_millis() as u64,
            report.has_blocking_problems(),
        );
        Ok(report)
    }

    async fn run_all(&self, ctx: &RunContext) -> Result<RunReport, StowageError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let config = ctx.config();

        if config.push {
            let registry = config.registry.as_deref().unwrap_or_default();
            if !self.registry.has_session(registry) {
                return Err(StowageError::Config(format!(
                    "push requested but there is no registry session for '{}'",
                    registry
                )));
            }
        }

        let Validated {
            units,
            validations,
            collector,
        } = self.discover_and_validate(ctx).await?;

        let enforcing = config.policy.is_enforcing();
        let mut requests = Vec::new();
        for (unit, validation) in units.units().iter().zip(&validations) {
            if enforcing && validation.has_blocking_issues() {
                info!(unit = %unit.name(), issues = validation.issues.len(), "unit blocked by validation");
                collector.record_result(BuildResult::skipped(unit.name(), SkipReason::Blocked));
                continue;
            }
            let request = BuildRequest::from_config(unit, config)
                .map_err(|e| StowageError::Config(e.to_string()))?;
            requests.push(request);
        }

        let orchestrator = Orchestrator::new(Arc::clone(&self.builder), config.mode, config.workers);
        let results = orchestrator
            .run(requests, ctx.cancel_signal(), &collector)
            .await;

        let verifier = ManifestVerifier::new(Arc::clone(&self.registry));
        for result in verifier.verify_all(results).await {
            if result.verification.is_failed() {
                warn!(unit = %result.unit, "manifest verification failed");
            }
            collector.record_result(result);
        }

        let report = collector.finalize(run_meta(ctx, started_at));
        emit_run_finished(
            &ctx.run_id().to_string(),
            started.elapsed().as_millis() as u64,
            report.has_blocking_problems(),
        );
        Ok(report)
    }

    async fn discover_and_validate(&self, ctx: &RunContext) -> Result<Validated, StowageError> {
        let config = ctx.config();
        let discovered = discover(ctx.root(), &config.units, config.scan.as_ref())?;

        if let Some(unknown) = self.selection.iter().find(|n| discovered.get(n).is_none()) {
            return Err(StowageError::Config(format!("unknown unit '{}'", unknown)));
        }
        let units = discovered.select(&self.selection);

        emit_run_started(&ctx.run_id().to_string(), units.len(), ctx.config_digest());

        let collector = ReportCollector::for_units(units.units());
        let validations = validate_units(
            units.units(),
            Arc::new(config.policy_set()),
            config.resolution,
            &collector,
        )
        .await;

        Ok(Validated {
            units,
            validations,
            collector,
        })
    }
}

fn run_meta(ctx: &RunContext, started_at: chrono::DateTime<Utc>) -> RunMeta {
    RunMeta {
        run_id: ctx.run_id().to_string(),
        config_digest: ctx.config_digest().to_string(),
        policy: ctx.config().policy,
        mode: ctx.config().mode,
        started_at,
    }
}
