//! Per-unit validation: parse, policy, and copy-source existence.
//!
//! Each unit is validated independently and in parallel; every issue found
//! for a unit is collected before the unit's verdict is formed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::descriptor::Descriptor;
use crate::domain::{BuildUnit, ValidationIssue};
use crate::obs;
use crate::policy::{self, ComplianceVerdict, PolicySet};
use crate::report::ReportCollector;
use crate::resolve::{PathResolver, Resolution, ResolutionMode, ResolvedPath};

/// How the copy sources of one unit were classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    /// Sources checked against the filesystem.
    pub checked: usize,
    pub stage_local: usize,
    /// Exempt because they contain an unresolved variable.
    pub variable: usize,
    pub remote: usize,
}

/// Everything learned about one unit before building.
#[derive(Debug, Clone)]
pub struct UnitValidation {
    pub unit: String,
    pub issues: Vec<ValidationIssue>,
    pub stats: SourceStats,
    /// `None` when the descriptor did not parse.
    pub compliance: Option<ComplianceVerdict>,
}

impl UnitValidation {
    /// Whether any issue would keep this unit from building under the enforcing policy.
    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(|i| i.kind().blocks_when_enforcing())
    }
}

/// Check every non-exempt copy source of `descriptor` against the filesystem.
pub fn check_dependencies(
    unit: &BuildUnit,
    descriptor: &Descriptor,
    resolver: &PathResolver,
) -> (Vec<ValidationIssue>, SourceStats) {
    let mut issues = Vec::new();
    let mut stats = SourceStats::default();

    for copy in descriptor.copies() {
        for resolution in resolver.resolve_all(copy) {
            match resolution {
                Resolution::StageLocal(_) => stats.stage_local += 1,
                Resolution::Variable => stats.variable += 1,
                Resolution::Remote => stats.remote += 1,
                Resolution::Path(resolved) => {
                    stats.checked += 1;
                    if !source_exists(&resolved) {
                        debug!(unit = %unit.name(), path = %resolved.path.display(), "copy source missing");
                        issues.push(ValidationIssue::MissingSource {
                            unit: unit.name().to_string(),
                            source: resolved.source,
                            resolved: resolved.path,
                            line: copy.line,
                        });
                    }
                }
            }
        }
    }

    (issues, stats)
}

fn source_exists(resolved: &ResolvedPath) -> bool {
    let Some(pattern) = resolved.pattern.as_deref().filter(|_| resolved.is_glob) else {
        return resolved.path.exists();
    };
    match glob::glob(pattern) {
        Ok(mut entries) => entries.any(|e| e.is_ok()),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "invalid glob in copy source");
            false
        }
    }
}

/// Parse, evaluate policy, and check dependencies for one unit.
pub fn validate_unit(unit: &BuildUnit, policy: &PolicySet, mode: ResolutionMode) -> UnitValidation {
    let descriptor = match Descriptor::load(unit.descriptor()) {
        Ok(d) => d,
        Err(e) => {
            return UnitValidation {
                unit: unit.name().to_string(),
                issues: vec![ValidationIssue::ParseError {
                    unit: unit.name().to_string(),
                    line: e.line,
                    reason: e.reason,
                }],
                stats: SourceStats::default(),
                compliance: None,
            }
        }
    };

    let verdict = policy::evaluate(policy, unit, &descriptor);
    let mut issues = verdict.clone().into_issues(unit.name());
    issues.extend(policy::advisories(policy, unit, &descriptor));

    let resolver = PathResolver::for_unit(unit, mode);
    let (missing, stats) = check_dependencies(unit, &descriptor, &resolver);
    issues.extend(missing);

    UnitValidation {
        unit: unit.name().to_string(),
        issues,
        stats,
        compliance: Some(verdict),
    }
}

/// Validate all `units` in parallel and record their issues in `collector`.
///
/// Results are returned in the order of `units`.
pub async fn validate_units(
    units: &[BuildUnit],
    policy: Arc<PolicySet>,
    mode: ResolutionMode,
    collector: &ReportCollector,
) -> Vec<UnitValidation> {
    let tasks: Vec<_> = units
        .iter()
        .cloned()
        .map(|unit| {
            let policy = Arc::clone(&policy);
            let collector = collector.clone();
            tokio::task::spawn_blocking(move || {
                let validation = validate_unit(&unit, &policy, mode);
                collector.record_validation(&validation);
                obs::emit_unit_validated(&validation.unit, validation.issues.len(), validation.stats.checked);
                validation
            })
        })
        .collect();

    let joined = futures::future::join_all(tasks).await;

    joined
        .into_iter()
        .zip(units)
        .map(|(outcome, unit)| match outcome {
            Ok(validation) => validation,
            Err(e) => {
                // A panicking validator still yields a reportable issue for its unit.
                let validation = UnitValidation {
                    unit: unit.name().to_string(),
                    issues: vec![ValidationIssue::ParseError {
                        unit: unit.name().to_string(),
                        line: None,
                        reason: format!("validation task failed: {}", e),
                    }],
                    stats: SourceStats::default(),
                    compliance: None,
                };
                collector.record_validation(&validation);
                validation
            }
        })
        .collect()
}
