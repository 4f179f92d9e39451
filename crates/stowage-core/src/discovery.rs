//! Build unit discovery.
//!
//! Units come from explicit `[[units]]` entries, from a recursive scan of the
//! repository for descriptor files, or both. Either way the result is a
//! [`UnitRegistry`] that owns the units for the rest of the run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::descriptor::first_base_image;
use crate::domain::{BuildUnit, Tier};
use crate::error::DiscoveryError;
use crate::resolve::normalize;

/// An explicitly declared unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    pub descriptor: PathBuf,
    /// Defaults to the descriptor's directory.
    #[serde(default)]
    pub context: Option<PathBuf>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Recursive scan for descriptor files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSpec {
    /// Directory to scan, relative to the repository root.
    pub root: PathBuf,
    /// File name pattern, e.g. `Dockerfile*`.
    pub pattern: String,
    /// Keep only descriptors whose first `FROM` starts with one of these.
    /// Empty keeps everything.
    pub approved_families: Vec<String>,
    pub tier: Tier,
    /// Treat a scan that finds nothing as an error.
    pub expect_units: bool,
    /// Shared build context for every scanned unit. Defaults to each
    /// descriptor's directory.
    pub context: Option<PathBuf>,
}

impl Default for ScanSpec {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            pattern: "Dockerfile*".to_string(),
            approved_families: Vec::new(),
            tier: Tier::default(),
            expect_units: true,
            context: None,
        }
    }
}

/// The units of one run, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: Vec<BuildUnit>,
}

impl UnitRegistry {
    /// Build a registry, rejecting duplicate names.
    pub fn new(units: Vec<BuildUnit>) -> Result<Self, DiscoveryError> {
        let mut seen: HashMap<&str, &Path> = HashMap::new();
        for unit in &units {
            if let Some(first) = seen.insert(unit.name(), unit.descriptor()) {
                return Err(DiscoveryError::NameCollision {
                    name: unit.name().to_string(),
                    first: first.to_path_buf(),
                    second: unit.descriptor().to_path_buf(),
                });
            }
        }
        Ok(Self { units })
    }

    pub fn units(&self) -> &[BuildUnit] {
        &self.units
    }

    pub fn get(&self, name: &str) -> Option<&BuildUnit> {
        self.units.iter().find(|u| u.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Keep only the named units, preserving discovery order.
    pub fn select(&self, names: &[String]) -> Self {
        if names.is_empty() {
            return self.clone();
        }
        Self {
            units: self
                .units
                .iter()
                .filter(|u| names.iter().any(|n| n == u.name()))
                .cloned()
                .collect(),
        }
    }
}

/// Discover every unit under `root` from explicit entries and an optional scan.
pub fn discover(
    root: &Path,
    explicit: &[UnitSpec],
    scan: Option<&ScanSpec>,
) -> Result<UnitRegistry, DiscoveryError> {
    if explicit.is_empty() && scan.is_none() {
        return Err(DiscoveryError::NothingConfigured);
    }

    let mut units = resolve_explicit(root, explicit)?;
    if let Some(spec) = scan {
        units.extend(scan_units(root, spec)?);
    }

    let registry = UnitRegistry::new(units)?;
    info!(root = %root.display(), units = registry.len(), "discovered build units");
    Ok(registry)
}

/// Turn explicit entries into units, resolving relative paths against `root`.
pub fn resolve_explicit(root: &Path, specs: &[UnitSpec]) -> Result<Vec<BuildUnit>, DiscoveryError> {
    specs
        .iter()
        .map(|spec| {
            let descriptor = anchor(root, &spec.descriptor);
            if !descriptor.is_file() {
                return Err(DiscoveryError::MissingDescriptor {
                    unit: spec.name.clone(),
                    path: descriptor,
                });
            }
            let context = match &spec.context {
                Some(ctx) => anchor(root, ctx),
                None => parent_dir(&descriptor),
            };
            if !context.is_dir() {
                return Err(DiscoveryError::MissingContext {
                    unit: spec.name.clone(),
                    path: context,
                });
            }
            Ok(BuildUnit::new(spec.name.clone(), descriptor, context, spec.tier.clone())
                .with_tags(spec.tags.clone()))
        })
        .collect()
}

/// Recursively scan for descriptors matching `spec`. Results are sorted by
/// descriptor path, so repeated scans of an unchanged tree agree.
pub fn scan_units(root: &Path, spec: &ScanSpec) -> Result<Vec<BuildUnit>, DiscoveryError> {
    let scan_root = anchor(root, &spec.root);
    let pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&scan_root.to_string_lossy()),
        spec.pattern
    );
    debug!(pattern = %pattern, "scanning for descriptors");

    let entries = glob::glob(&pattern).map_err(|e| DiscoveryError::InvalidPattern {
        pattern: spec.pattern.clone(),
        reason: e.to_string(),
    })?;

    let mut descriptors: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "unreadable path during scan");
                None
            }
        })
        .filter(|path| path.is_file())
        .filter(|path| !is_hidden(path, &scan_root))
        .filter(|path| !path.to_string_lossy().ends_with(".dockerignore"))
        .collect();
    descriptors.sort();
    descriptors.dedup();

    let shared_context = spec.context.as_ref().map(|c| anchor(root, c));
    let mut units = Vec::new();
    for descriptor in descriptors {
        if !spec.approved_families.is_empty() && !in_approved_family(&descriptor, &spec.approved_families) {
            debug!(descriptor = %descriptor.display(), "skipping descriptor outside approved families");
            continue;
        }
        let Some(name) = unit_name_for(&descriptor) else {
            warn!(descriptor = %descriptor.display(), "cannot derive unit name");
            continue;
        };
        let context = shared_context.clone().unwrap_or_else(|| parent_dir(&descriptor));
        units.push(BuildUnit::new(name, descriptor, context, spec.tier.clone()));
    }

    if units.is_empty() && spec.expect_units {
        return Err(DiscoveryError::NoUnits {
            root: scan_root,
            pattern: spec.pattern.clone(),
        });
    }
    Ok(units)
}

/// Unit name for a descriptor path.
///
/// `Dockerfile.<suffix>` → `<suffix>`, `<name>.Dockerfile` → `<name>`,
/// plain `Dockerfile` → its directory's name.
pub fn unit_name_for(descriptor: &Path) -> Option<String> {
    let file_name = descriptor.file_name()?.to_string_lossy().into_owned();
    let lower = file_name.to_ascii_lowercase();

    if lower == "dockerfile" {
        return descriptor
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());
    }
    if lower.starts_with("dockerfile.") && file_name.len() > "dockerfile.".len() {
        return Some(file_name["dockerfile.".len()..].to_string());
    }
    if lower.ends_with(".dockerfile") && file_name.len() > ".dockerfile".len() {
        return Some(file_name[..file_name.len() - ".dockerfile".len()].to_string());
    }
    Some(file_name)
}

fn in_approved_family(descriptor: &Path, families: &[String]) -> bool {
    let text = match std::fs::read_to_string(descriptor) {
        Ok(t) => t,
        Err(e) => {
            warn!(descriptor = %descriptor.display(), error = %e, "cannot read descriptor");
            return false;
        }
    };
    first_base_image(&text)
        .is_some_and(|image| families.iter().any(|f| image.starts_with(f.as_str())))
}

fn is_hidden(path: &Path, scan_root: &Path) -> bool {
    let relative = path.strip_prefix(scan_root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

fn anchor(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&root.join(path))
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn spec(name: &str, descriptor: &str) -> UnitSpec {
        UnitSpec {
            name: name.to_string(),
            descriptor: PathBuf::from(descriptor),
            context: None,
            tier: Tier::default(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_unit_names() {
        assert_eq!(unit_name_for(Path::new("/r/svc/Dockerfile.api")).as_deref(), Some("api"));
        assert_eq!(unit_name_for(Path::new("/r/worker/Dockerfile")).as_deref(), Some("worker"));
        assert_eq!(unit_name_for(Path::new("/r/x/web.Dockerfile")).as_deref(), Some("web"));
    }

    #[test]
    fn test_explicit_units_resolve_against_root() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "services/api/Dockerfile", "FROM alpine\n");
        let units = resolve_explicit(tmp.path(), &[spec("api", "services/api/Dockerfile")]).unwrap();
        assert_eq!(units[0].descriptor(), tmp.path().join("services/api/Dockerfile"));
        assert_eq!(units[0].context(), tmp.path().join("services/api"));
    }

    #[test]
    fn test_missing_explicit_descriptor() {
        let tmp = TempDir::new().unwrap();
        let err = resolve_explicit(tmp.path(), &[spec("api", "nope/Dockerfile")]).unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingDescriptor { .. }));
    }

    #[test]
    fn test_missing_explicit_context() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "api/Dockerfile", "FROM alpine\n");
        let mut s = spec("api", "api/Dockerfile");
        s.context = Some(PathBuf::from("does-not-exist"));
        let err = resolve_explicit(tmp.path(), &[s]).unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingContext { .. }));
    }

    #[test]
    fn test_scan_sorted_filters_hidden_and_families() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b/Dockerfile", "FROM gcr.io/distroless/base\n");
        write(tmp.path(), "a/Dockerfile.api", "FROM gcr.io/distroless/python3\n");
        write(tmp.path(), "c/Dockerfile", "FROM ubuntu:22.04\n");
        write(tmp.path(), ".cache/Dockerfile", "FROM gcr.io/distroless/base\n");
        write(tmp.path(), "a/Dockerfile.api.dockerignore", "*.pyc\n");

        let scan = ScanSpec {
            approved_families: vec!["gcr.io/distroless/".to_string()],
            ..ScanSpec::default()
        };
        let units = scan_units(tmp.path(), &scan).unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["api", "b"]);
    }

    #[test]
    fn test_scan_keeps_descriptor_that_fails_to_parse() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "good/Dockerfile", "FROM gcr.io/distroless/base\n");
        write(tmp.path(), "broken/Dockerfile", "FROM gcr.io/distroless/base\nCOPY lonely\n");

        let scan = ScanSpec {
            approved_families: vec!["gcr.io/distroless/".to_string()],
            ..ScanSpec::default()
        };
        let units = scan_units(tmp.path(), &scan).unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["broken", "good"]);

        let broken = crate::validate::validate_unit(
            &units[0],
            &crate::policy::PolicySet::standard(),
            crate::resolve::ResolutionMode::Descriptor,
        );
        assert_eq!(broken.issues.len(), 1);
        assert_eq!(broken.issues[0].kind(), crate::domain::IssueKind::ParseError);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "x/Dockerfile", "FROM alpine\n");
        write(tmp.path(), "y/z/Dockerfile.worker", "FROM alpine\n");
        let first = scan_units(tmp.path(), &ScanSpec::default()).unwrap();
        let second = scan_units(tmp.path(), &ScanSpec::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_scan() {
        let tmp = TempDir::new().unwrap();
        let err = scan_units(tmp.path(), &ScanSpec::default()).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoUnits { .. }));

        let lenient = ScanSpec {
            expect_units: false,
            ..ScanSpec::default()
        };
        assert!(scan_units(tmp.path(), &lenient).unwrap().is_empty());
    }

    #[test]
    fn test_name_collision_is_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "one/Dockerfile.api", "FROM alpine\n");
        write(tmp.path(), "two/Dockerfile.api", "FROM alpine\n");
        let err = discover(tmp.path(), &[], Some(&ScanSpec::default())).unwrap_err();
        match err {
            DiscoveryError::NameCollision { name, .. } => assert_eq!(name, "api"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_explicit_and_scan_combined() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "svc/Dockerfile.api", "FROM alpine\n");
        write(tmp.path(), "base/Dockerfile", "FROM alpine\n");
        let scan = ScanSpec {
            root: PathBuf::from("svc"),
            ..ScanSpec::default()
        };
        let registry = discover(tmp.path(), &[spec("foundation", "base/Dockerfile")], Some(&scan)).unwrap();
        assert_eq!(registry.names(), vec!["foundation", "api"]);
        assert!(registry.get("api").is_some());
    }

    #[test]
    fn test_nothing_configured() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            discover(tmp.path(), &[], None).unwrap_err(),
            DiscoveryError::NothingConfigured
        ));
    }

    #[test]
    fn test_select_keeps_order() {
        let units = vec![
            BuildUnit::new("a", "/r/a/Dockerfile", "/r/a", Tier::default()),
            BuildUnit::new("b", "/r/b/Dockerfile", "/r/b", Tier::default()),
            BuildUnit::new("c", "/r/c/Dockerfile", "/r/c", Tier::default()),
        ];
        let registry = UnitRegistry::new(units).unwrap();
        let picked = registry.select(&["c".to_string(), "a".to_string()]);
        assert_eq!(picked.names(), vec!["a", "c"]);
        assert_eq!(registry.select(&[]).len(), 3);
    }
}
