//! Integration tests: config file → discovery → validation → report.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use stowage_core::config::load_or_default;
use stowage_core::{
    discover, validate_units, IssueKind, PolicyMode, ReportCollector, RunMeta, RunMode,
    ValidationIssue,
};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn meta(policy: PolicyMode) -> RunMeta {
    RunMeta {
        run_id: "it".into(),
        config_digest: "0".repeat(64),
        policy,
        mode: RunMode::FailFast,
        started_at: Utc::now(),
    }
}

/// Builds a small monorepo:
/// - services/api: python builder stage, distroless final stage, copies from a sibling dir
/// - services/worker: ubuntu base, one missing source
/// - services/debug: outside the approved families, ignored by the scan
fn monorepo(root: &Path) {
    write(
        root,
        "stowage.toml",
        r#"
push = false

[scan]
root = "services"
approved_families = ["gcr.io/distroless/", "python", "ubuntu"]
"#,
    );
    write(
        root,
        "services/api/Dockerfile.api",
        "FROM python:3.12 AS build\n\
         COPY requirements.txt /src/\n\
         FROM gcr.io/distroless/python3-debian12:nonroot\n\
         COPY --from=build /src /app\n\
         COPY ../shared/settings.py /app/\n",
    );
    write(root, "services/api/requirements.txt", "flask\n");
    write(root, "services/shared/settings.py", "DEBUG = False\n");
    write(
        root,
        "services/worker/Dockerfile",
        "FROM ubuntu:22.04\nCOPY worker.py /opt/\nUSER 1000\n",
    );
    write(root, "services/debug/Dockerfile", "FROM busybox\n");
}

#[tokio::test]
async fn test_scan_validate_and_report() {
    let tmp = TempDir::new().unwrap();
    monorepo(tmp.path());

    let config = load_or_default(tmp.path()).expect("config loads");
    assert!(!config.push);

    let registry = discover(tmp.path(), &config.units, config.scan.as_ref()).expect("discovery");
    assert_eq!(registry.names(), vec!["api", "worker"]);

    let collector = ReportCollector::for_units(registry.units());
    let validations = validate_units(
        registry.units(),
        Arc::new(config.policy_set()),
        config.resolution,
        &collector,
    )
    .await;

    let api = &validations[0];
    assert_eq!(api.unit, "api");
    // The python:3.12 builder stage is not a distroless base.
    assert_eq!(api.issues.len(), 1, "{:?}", api.issues);
    assert_eq!(api.issues[0].kind(), IssueKind::ComplianceViolation);
    assert_eq!(api.stats.stage_local, 1);
    assert_eq!(api.stats.checked, 2);

    let worker = &validations[1];
    let kinds: Vec<IssueKind> = worker.issues.iter().map(|i| i.kind()).collect();
    assert!(kinds.contains(&IssueKind::ComplianceViolation));
    assert!(kinds.contains(&IssueKind::MissingSource));
    assert!(!kinds.contains(&IssueKind::Advisory), "USER 1000 is non-root");

    let report = collector.finalize(meta(config.policy));
    assert!(report.has_blocking_problems());
    let summary = report.render_summary();
    assert!(summary.contains("missing source (1)"));
    assert!(summary.trim_end().ends_with("FAIL"));
}

#[tokio::test]
async fn test_descriptor_relative_resolution_is_the_default() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "stowage.toml",
        r#"
push = false

[[units]]
name = "web"
descriptor = "deploy/docker/Dockerfile"
context = "."
"#,
    );
    write(
        tmp.path(),
        "deploy/docker/Dockerfile",
        "FROM gcr.io/distroless/static:nonroot\nCOPY ./entry.sh /entry.sh\nCOPY site/ /srv/\n",
    );
    write(tmp.path(), "deploy/docker/entry.sh", "");
    write(tmp.path(), "site/index.html", "");

    let config = load_or_default(tmp.path()).unwrap();
    let registry = discover(tmp.path(), &config.units, config.scan.as_ref()).unwrap();
    let collector = ReportCollector::for_units(registry.units());
    let validations = validate_units(
        registry.units(),
        Arc::new(config.policy_set()),
        config.resolution,
        &collector,
    )
    .await;

    // site/ sits next to the context root, not the descriptor, so it is missing.
    let missing: Vec<&ValidationIssue> = validations[0]
        .issues
        .iter()
        .filter(|i| i.kind() == IssueKind::MissingSource)
        .collect();
    assert_eq!(missing.len(), 1);
    match missing[0] {
        ValidationIssue::MissingSource { source, resolved, .. } => {
            assert_eq!(source, "site/");
            assert!(resolved.ends_with("deploy/docker/site"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
