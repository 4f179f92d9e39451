//! Run report aggregation.
//!
//! Workers append to a shared [`ReportCollector`] while the run is in
//! progress. Once every worker has joined, [`ReportCollector::finalize`]
//! produces the immutable [`RunReport`] that decides the exit status and
//! renders the human summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{PolicyMode, RunMode};
use crate::domain::{BuildResult, BuildStatus, BuildUnit, IssueKind, ValidationIssue, Verification};
use crate::validate::{SourceStats, UnitValidation};

#[derive(Debug, Default)]
struct Collected {
    unit_order: Vec<String>,
    issues: Vec<ValidationIssue>,
    stats: HashMap<String, SourceStats>,
    results: Vec<BuildResult>,
}

/// Append-only sink shared by validation and build workers.
#[derive(Debug, Clone, Default)]
pub struct ReportCollector {
    inner: Arc<Mutex<Collected>>,
}

impl ReportCollector {
    /// A collector whose report lists units in the given order.
    pub fn new(unit_order: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Collected {
                unit_order,
                ..Collected::default()
            })),
        }
    }

    pub fn for_units(units: &[BuildUnit]) -> Self {
        Self::new(units.iter().map(|u| u.name().to_string()).collect())
    }

    fn lock(&self) -> MutexGuard<'_, Collected> {
        // A panicked worker leaves the data intact; keep collecting.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_validation(&self, validation: &UnitValidation) {
        let mut inner = self.lock();
        inner.issues.extend(validation.issues.iter().cloned());
        inner.stats.insert(validation.unit.clone(), validation.stats);
    }

    pub fn record_issue(&self, issue: ValidationIssue) {
        self.lock().issues.push(issue);
    }

    /// Record a result, replacing any earlier result for the same unit.
    pub fn record_result(&self, result: BuildResult) {
        let mut inner = self.lock();
        match inner.results.iter_mut().find(|r| r.unit == result.unit) {
            Some(existing) => *existing = result,
            None => inner.results.push(result),
        }
    }

    pub fn issue_count(&self) -> usize {
        self.lock().issues.len()
    }

    pub fn results(&self) -> Vec<BuildResult> {
        self.lock().results.clone()
    }

    /// Drain everything collected into a report.
    pub fn finalize(self, meta: RunMeta) -> RunReport {
        let collected = std::mem::take(&mut *self.lock());
        RunReport::assemble(meta, collected, Utc::now())
    }
}

/// Identity and settings of the run a report describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub config_digest: String,
    pub policy: PolicyMode,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
}

/// Everything recorded for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: String,
    pub issues: Vec<ValidationIssue>,
    pub sources: SourceStats,
    /// `None` when the run stopped before building (e.g. validate only).
    pub result: Option<BuildResult>,
}

impl UnitReport {
    fn issues_by_kind(&self) -> BTreeMap<IssueKind, Vec<&ValidationIssue>> {
        let mut grouped: BTreeMap<IssueKind, Vec<&ValidationIssue>> = BTreeMap::new();
        for issue in &self.issues {
            grouped.entry(issue.kind()).or_default().push(issue);
        }
        grouped
    }
}

/// Aggregate counts over the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub units: usize,
    pub issues: BTreeMap<IssueKind, usize>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub verification_failed: usize,
    pub blocking: bool,
}

/// Final, immutable record of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    meta: RunMeta,
    finished_at: DateTime<Utc>,
    units: Vec<UnitReport>,
    summary: ReportSummary,
}

impl RunReport {
    fn assemble(meta: RunMeta, mut collected: Collected, finished_at: DateTime<Utc>) -> Self {
        let mut order = collected.unit_order.clone();
        let mut strays: Vec<String> = collected
            .issues
            .iter()
            .map(|i| i.unit().to_string())
            .chain(collected.results.iter().map(|r| r.unit.clone()))
            .filter(|u| !order.contains(u))
            .collect();
        strays.sort();
        strays.dedup();
        order.extend(strays);

        let units: Vec<UnitReport> = order
            .into_iter()
            .map(|unit| {
                let issues = collected
                    .issues
                    .iter()
                    .filter(|i| i.unit() == unit)
                    .cloned()
                    .collect();
                let result = collected
                    .results
                    .iter()
                    .position(|r| r.unit == unit)
                    .map(|idx| collected.results.swap_remove(idx));
                UnitReport {
                    sources: collected.stats.remove(&unit).unwrap_or_default(),
                    unit,
                    issues,
                    result,
                }
            })
            .collect();

        let summary = summarize(&units, meta.policy);
        Self {
            meta,
            finished_at,
            units,
            summary,
        }
    }

    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    pub fn units(&self) -> &[UnitReport] {
        &self.units
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit == name)
    }

    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.units.iter().flat_map(|u| u.issues.iter())
    }

    pub fn results(&self) -> impl Iterator<Item = &BuildResult> {
        self.units.iter().filter_map(|u| u.result.as_ref())
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.meta.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Blocking issues under the enforcing policy, or any failed build.
    pub fn has_blocking_problems(&self) -> bool {
        self.summary.blocking
    }

    /// 0 when the run passed, 1 when it has blocking problems.
    pub fn exit_code(&self) -> i32 {
        if self.has_blocking_problems() {
            1
        } else {
            0
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human summary grouped by unit, then issue kind, ending in PASS or FAIL.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "stowage run {} (policy: {}, mode: {})",
            self.meta.run_id,
            policy_label(self.meta.policy),
            mode_label(self.meta.mode)
        );

        for unit in &self.units {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", unit.unit);
            let grouped = unit.issues_by_kind();
            if grouped.is_empty() {
                let _ = writeln!(out, "  no issues");
            }
            for (kind, issues) in grouped {
                let _ = writeln!(out, "  {} ({})", kind, issues.len());
                for issue in issues {
                    let _ = writeln!(out, "    - {}", issue);
                }
            }
            if let Some(result) = &unit.result {
                let _ = writeln!(out, "  build: {}", describe_result(result));
            }
        }

        let s = &self.summary;
        let issue_total: usize = s.issues.values().sum();
        let breakdown: Vec<String> = s
            .issues
            .iter()
            .map(|(kind, count)| format!("{} {}", count, kind))
            .collect();
        let _ = writeln!(out);
        let _ = write!(out, "{} units, {} issues", s.units, issue_total);
        if !breakdown.is_empty() {
            let _ = write!(out, " ({})", breakdown.join(", "));
        }
        if s.succeeded + s.failed + s.skipped > 0 {
            let _ = write!(
                out,
                "; builds: {} succeeded, {} failed, {} skipped",
                s.succeeded, s.failed, s.skipped
            );
        }
        if s.verification_failed > 0 {
            let _ = write!(out, "; {} failed verification", s.verification_failed);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", if s.blocking { "FAIL" } else { "PASS" });
        out
    }
}

fn summarize(units: &[UnitReport], policy: PolicyMode) -> ReportSummary {
    let mut summary = ReportSummary {
        units: units.len(),
        ..ReportSummary::default()
    };
    let mut blocking_issue = false;
    for unit in units {
        for issue in &unit.issues {
            *summary.issues.entry(issue.kind()).or_default() += 1;
            blocking_issue |= issue.kind().blocks_when_enforcing();
        }
        if let Some(result) = &unit.result {
            match result.status {
                BuildStatus::Succeeded => summary.succeeded += 1,
                BuildStatus::Failed { .. } => summary.failed += 1,
                BuildStatus::Skipped { .. } => summary.skipped += 1,
            }
            if result.verification.is_failed() {
                summary.verification_failed += 1;
            }
        }
    }
    summary.blocking = (policy.is_enforcing() && blocking_issue) || summary.failed > 0;
    summary
}

fn describe_result(result: &BuildResult) -> String {
    let mut line = match &result.status {
        BuildStatus::Succeeded => match result.canonical_tag() {
            Some(tag) => format!("succeeded ({})", tag),
            None => "succeeded".to_string(),
        },
        BuildStatus::Failed { detail } => format!("failed: {}", detail),
        BuildStatus::Skipped { reason } => format!("skipped: {}", reason),
    };
    match &result.verification {
        Verification::NotAttempted => {}
        Verification::Verified { platforms } => {
            let _ = write!(line, " [verified {}]", platforms.join(", "));
        }
        Verification::VerificationFailed { reason } => {
            let _ = write!(line, " [verification failed: {}]", reason);
        }
    }
    line
}

fn policy_label(policy: PolicyMode) -> &'static str {
    match policy {
        PolicyMode::Enforce => "enforce",
        PolicyMode::ReportOnly => "report-only",
    }
}

fn mode_label(mode: RunMode) -> &'static str {
    match mode {
        RunMode::FailFast => "fail-fast",
        RunMode::Continue => "continue",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SkipReason;
    use std::path::PathBuf;

    fn meta(policy: PolicyMode) -> RunMeta {
        RunMeta {
            run_id: "run-1".into(),
            config_digest: "abc".into(),
            policy,
            mode: RunMode::FailFast,
            started_at: Utc::now(),
        }
    }

    fn violation(unit: &str) -> ValidationIssue {
        ValidationIssue::ComplianceViolation {
            unit: unit.into(),
            rule_id: "application/allowed-image-prefix".into(),
            offending_ref: "ubuntu:20.04".into(),
        }
    }

    fn missing(unit: &str, source: &str) -> ValidationIssue {
        ValidationIssue::MissingSource {
            unit: unit.into(),
            source: source.into(),
            resolved: PathBuf::from(format!("/repo/{}/{}", unit, source)),
            line: 3,
        }
    }

    fn ok(unit: &str) -> BuildResult {
        BuildResult::succeeded(unit, vec!["linux/amd64".into()], vec![format!("r/{}:latest", unit)], false, None, 5)
    }

    #[test]
    fn test_clean_run_passes() {
        let collector = ReportCollector::new(vec!["api".into()]);
        collector.record_result(ok("api"));
        let report = collector.finalize(meta(PolicyMode::Enforce));
        assert!(!report.has_blocking_problems());
        assert_eq!(report.exit_code(), 0);
        assert!(report.render_summary().trim_end().ends_with("PASS"));
    }

    #[test]
    fn test_enforcing_violation_blocks() {
        let collector = ReportCollector::new(vec!["api".into()]);
        collector.record_issue(violation("api"));
        collector.record_result(BuildResult::skipped("api", SkipReason::Blocked));
        let report = collector.finalize(meta(PolicyMode::Enforce));
        assert!(report.has_blocking_problems());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_report_only_violation_does_not_block() {
        let collector = ReportCollector::new(vec!["api".into()]);
        collector.record_issue(violation("api"));
        collector.record_result(ok("api"));
        let report = collector.finalize(meta(PolicyMode::ReportOnly));
        assert!(!report.has_blocking_problems());
        assert_eq!(report.issues().count(), 1);
    }

    #[test]
    fn test_failed_build_blocks_even_when_reporting_only() {
        let collector = ReportCollector::new(vec!["api".into()]);
        collector.record_result(BuildResult::failed("api", vec![], vec![], "exit status 1", 10));
        let report = collector.finalize(meta(PolicyMode::ReportOnly));
        assert!(report.has_blocking_problems());
    }

    #[test]
    fn test_advisory_and_verification_failure_never_block() {
        let collector = ReportCollector::new(vec!["api".into()]);
        collector.record_issue(ValidationIssue::Advisory {
            unit: "api".into(),
            code: "nonroot-user".into(),
            message: "runs as root".into(),
        });
        collector.record_result(ok("api").with_verification(Verification::VerificationFailed {
            reason: "missing linux/arm64".into(),
        }));
        let report = collector.finalize(meta(PolicyMode::Enforce));
        assert!(!report.has_blocking_problems());
        assert_eq!(report.summary().verification_failed, 1);
    }

    #[test]
    fn test_summary_grouped_by_unit_then_kind() {
        let collector = ReportCollector::new(vec!["web".into(), "api".into()]);
        collector.record_issue(missing("api", "a.txt"));
        collector.record_issue(violation("web"));
        collector.record_issue(missing("api", "b.txt"));
        let report = collector.finalize(meta(PolicyMode::Enforce));

        let names: Vec<&str> = report.units().iter().map(|u| u.unit.as_str()).collect();
        assert_eq!(names, vec!["web", "api"]);

        let text = report.render_summary();
        assert!(text.contains("missing source (2)"));
        assert!(text.contains("compliance violation (1)"));
        assert!(text.find("web").unwrap() < text.find("\napi").unwrap());
        assert!(text.contains("2 units, 3 issues"));
        assert!(text.trim_end().ends_with("FAIL"));
    }

    #[test]
    fn test_record_result_replaces() {
        let collector = ReportCollector::new(vec!["api".into()]);
        collector.record_result(ok("api"));
        collector.record_result(ok("api").with_verification(Verification::Verified {
            platforms: vec!["linux/amd64".into()],
        }));
        assert_eq!(collector.results().len(), 1);
        let report = collector.finalize(meta(PolicyMode::Enforce));
        assert!(report.render_summary().contains("[verified linux/amd64]"));
    }

    #[test]
    fn test_json_shape() {
        let collector = ReportCollector::new(vec!["api".into()]);
        collector.record_issue(missing("api", "a.txt"));
        let report = collector.finalize(meta(PolicyMode::Enforce));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["meta"]["policy"], "enforce");
        assert_eq!(json["units"][0]["issues"][0]["kind"], "missing_source");
        assert_eq!(json["summary"]["issues"]["missing_source"], 1);
        assert_eq!(json["summary"]["blocking"], true);
    }

    #[test]
    fn test_concurrent_appends() {
        let collector = ReportCollector::new((0..8).map(|i| format!("u{}", i)).collect());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let c = collector.clone();
                std::thread::spawn(move || c.record_issue(missing(&format!("u{}", i), "x")))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let report = collector.finalize(meta(PolicyMode::Enforce));
        assert_eq!(report.issues().count(), 8);
        assert_eq!(report.units()[0].unit, "u0");
    }
}
