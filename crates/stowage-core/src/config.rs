//! Run configuration.
//!
//! Loaded from `stowage.toml` in the repository root, then overridden by
//! command-line flags. The effective configuration is validated once before
//! any unit is built and its digest is recorded in the run report.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::discovery::{ScanSpec, UnitSpec};
use crate::domain::BuildUnit;
use crate::error::{Result, StowageError};
use crate::platform::Platform;
use crate::policy::{PolicyRule, PolicySet};
use crate::resolve::ResolutionMode;

/// The config file name to search for.
pub const CONFIG_FILE_NAME: &str = "stowage.toml";

/// Default tag template; `{registry}` and `{repository}` may be empty.
pub const DEFAULT_TAG_TEMPLATE: &str = "{registry}/{repository}/{name}:{tag}";

/// How the orchestrator reacts to a failed build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Sequential; the first failure skips everything after it.
    #[default]
    FailFast,
    /// Bounded parallelism; every unit is attempted.
    Continue,
}

/// Whether policy and dependency issues block builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyMode {
    #[default]
    Enforce,
    ReportOnly,
}

impl PolicyMode {
    pub fn is_enforcing(self) -> bool {
        self == PolicyMode::Enforce
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    None,
    #[default]
    Default,
}

/// Top-level configuration from `stowage.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Registry host, e.g. `ghcr.io`.
    pub registry: Option<String>,
    /// Repository path under the registry, e.g. `acme/platform`.
    pub repository: Option<String>,
    /// Run tag applied to every unit.
    pub tag: String,
    pub platforms: Vec<String>,
    pub push: bool,
    pub cache: CachePolicy,
    pub mode: RunMode,
    pub policy: PolicyMode,
    /// Concurrent builds in `continue` mode.
    pub workers: usize,
    /// Per-build timeout.
    pub timeout_secs: u64,
    /// Stream builder output instead of the quiet progress mode.
    pub verbose: bool,
    pub resolution: ResolutionMode,
    pub tag_template: String,
    pub units: Vec<UnitSpec>,
    pub scan: Option<ScanSpec>,
    /// Replaces the built-in policy when set.
    pub policy_rules: Option<Vec<PolicyRule>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            registry: None,
            repository: None,
            tag: "latest".to_string(),
            platforms: vec!["linux/amd64".to_string(), "linux/arm64".to_string()],
            push: true,
            cache: CachePolicy::default(),
            mode: RunMode::default(),
            policy: PolicyMode::default(),
            workers: 2,
            timeout_secs: 3600,
            verbose: false,
            resolution: ResolutionMode::default(),
            tag_template: DEFAULT_TAG_TEMPLATE.to_string(),
            units: Vec::new(),
            scan: None,
            policy_rules: None,
        }
    }
}

/// Values supplied on the command line. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub registry: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub platforms: Option<Vec<String>>,
    pub push: Option<bool>,
    pub cache: Option<CachePolicy>,
    pub mode: Option<RunMode>,
    pub policy: Option<PolicyMode>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub verbose: Option<bool>,
    pub resolution: Option<ResolutionMode>,
}

impl RunConfig {
    /// Apply command-line overrides; CLI values win.
    pub fn with_overrides(mut self, o: ConfigOverrides) -> Self {
        if o.registry.is_some() {
            self.registry = o.registry;
        }
        if o.repository.is_some() {
            self.repository = o.repository;
        }
        if let Some(tag) = o.tag {
            self.tag = tag;
        }
        if let Some(platforms) = o.platforms {
            self.platforms = platforms;
        }
        if let Some(push) = o.push {
            self.push = push;
        }
        if let Some(cache) = o.cache {
            self.cache = cache;
        }
        if let Some(mode) = o.mode {
            self.mode = mode;
        }
        if let Some(policy) = o.policy {
            self.policy = policy;
        }
        if let Some(workers) = o.workers {
            self.workers = workers;
        }
        if let Some(timeout) = o.timeout_secs {
            self.timeout_secs = timeout;
        }
        if let Some(verbose) = o.verbose {
            self.verbose = verbose;
        }
        if let Some(resolution) = o.resolution {
            self.resolution = resolution;
        }
        self
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(StowageError::Config("platform list is empty".into()));
        }
        self.parsed_platforms()?;
        if self.workers == 0 {
            return Err(StowageError::Config("workers must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(StowageError::Config("timeout_secs must be at least 1".into()));
        }
        if !self.tag_template.contains("{name}") {
            return Err(StowageError::Config(format!(
                "tag template '{}' does not contain {{name}}",
                self.tag_template
            )));
        }
        if self.tag.trim().is_empty() {
            return Err(StowageError::Config("tag is empty".into()));
        }
        if self.push && self.registry.as_deref().map_or(true, |r| r.trim().is_empty()) {
            return Err(StowageError::Config(
                "push requested but no registry is configured".into(),
            ));
        }
        self.policy_set()
            .check_patterns()
            .map_err(StowageError::Config)?;
        Ok(())
    }

    pub fn parsed_platforms(&self) -> Result<Vec<Platform>> {
        self.platforms
            .iter()
            .map(|p| p.parse::<Platform>().map_err(|e| StowageError::Config(e.to_string())))
            .collect()
    }

    /// The policy rules in force: configured ones, or the built-in set.
    pub fn policy_set(&self) -> PolicySet {
        match &self.policy_rules {
            Some(rules) => rules
                .iter()
                .cloned()
                .fold(PolicySet::empty(), PolicySet::with_rule),
            None => PolicySet::standard(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Render one image reference for `unit` at `tag`.
    pub fn render_tag(&self, unit: &str, tag: &str) -> String {
        let rendered = self
            .tag_template
            .replace("{registry}", self.registry.as_deref().unwrap_or(""))
            .replace("{repository}", self.repository.as_deref().unwrap_or(""))
            .replace("{name}", unit)
            .replace("{tag}", tag);
        let mut collapsed = String::with_capacity(rendered.len());
        for c in rendered.chars() {
            if c == '/' && collapsed.ends_with('/') {
                continue;
            }
            collapsed.push(c);
        }
        collapsed.trim_start_matches('/').to_string()
    }

    /// Every image reference for `unit`: the run tag first, then its declared tags.
    pub fn render_tags(&self, unit: &BuildUnit) -> Vec<String> {
        let mut tags = vec![self.render_tag(unit.name(), &self.tag)];
        for extra in unit.tags() {
            let rendered = self.render_tag(unit.name(), extra);
            if !tags.contains(&rendered) {
                tags.push(rendered);
            }
        }
        tags
    }

    /// Deterministic SHA-256 over the serialized configuration.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Look for `stowage.toml` in `root`.
pub fn discover_config(root: &Path) -> Option<PathBuf> {
    let path = root.join(CONFIG_FILE_NAME);
    if path.is_file() {
        debug!(path = %path.display(), "found config file");
        Some(path)
    } else {
        debug!(path = %path.display(), "no config file");
        None
    }
}

pub fn load_config(path: &Path) -> Result<RunConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| StowageError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&contents).map_err(|source| StowageError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_config(contents: &str) -> std::result::Result<RunConfig, toml::de::Error> {
    toml::from_str(contents)
}

/// Load the config from `root`, or the defaults when there is none.
pub fn load_or_default(root: &Path) -> Result<RunConfig> {
    match discover_config(root) {
        Some(path) => load_config(&path),
        None => Ok(RunConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Tier;
    use tempfile::TempDir;

    fn pushable() -> RunConfig {
        RunConfig {
            registry: Some("ghcr.io".into()),
            repository: Some("acme".into()),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.tag, "latest");
        assert_eq!(config.platforms, vec!["linux/amd64", "linux/arm64"]);
        assert_eq!(config.mode, RunMode::FailFast);
        assert_eq!(config.policy, PolicyMode::Enforce);
        assert_eq!(config.cache, CachePolicy::Default);
        assert_eq!(config.workers, 2);
        assert_eq!(config.resolution, ResolutionMode::Descriptor);
    }

    #[test]
    fn test_full_file() {
        let config = parse_config(
            r#"
registry = "ghcr.io"
repository = "acme/platform"
tag = "v1.2.0"
platforms = ["linux/amd64"]
push = false
cache = "none"
mode = "continue"
policy = "report-only"
workers = 4
resolution = "context-root"

[[units]]
name = "api"
descriptor = "services/api/Dockerfile"
tier = "foundation"
tags = ["stable"]

[scan]
root = "apps"
pattern = "Dockerfile.*"
approved_families = ["gcr.io/distroless/"]

[[policy_rules]]
tier = "application"
allowed_image_prefixes = ["gcr.io/distroless/", "cgr.dev/chainguard/"]
denied_name_patterns = ["*debug*"]
allow_scratch = true
"#,
        )
        .unwrap();

        assert_eq!(config.mode, RunMode::Continue);
        assert_eq!(config.policy, PolicyMode::ReportOnly);
        assert_eq!(config.cache, CachePolicy::None);
        assert_eq!(config.resolution, ResolutionMode::ContextRoot);
        assert_eq!(config.units[0].tier, Tier::foundation());
        let scan = config.scan.as_ref().unwrap();
        assert_eq!(scan.pattern, "Dockerfile.*");
        assert!(scan.expect_units);
        let policy = config.policy_set();
        let rule = policy.rule_for(&Tier::application()).unwrap();
        assert!(rule.allow_scratch);
        assert!(policy.rule_for(&Tier::foundation()).is_none());
    }

    #[test]
    fn test_overrides_win() {
        let config = pushable().with_overrides(ConfigOverrides {
            tag: Some("abc123".into()),
            push: Some(false),
            mode: Some(RunMode::Continue),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.tag, "abc123");
        assert!(!config.push);
        assert_eq!(config.mode, RunMode::Continue);
        assert_eq!(config.registry.as_deref(), Some("ghcr.io"));
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(pushable().validate().is_ok());
        assert!(RunConfig::default().validate().is_err(), "push without registry");

        let cases = [
            RunConfig { platforms: vec![], ..pushable() },
            RunConfig { platforms: vec!["linux".into()], ..pushable() },
            RunConfig { workers: 0, ..pushable() },
            RunConfig { tag_template: "{registry}/fixed:{tag}".into(), ..pushable() },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(StowageError::Config(_))));
        }
    }

    #[test]
    fn test_render_tags() {
        let config = pushable();
        let unit = BuildUnit::new("api", "/r/Dockerfile", "/r", Tier::default())
            .with_tags(vec!["stable".into(), "latest".into()]);
        assert_eq!(
            config.render_tags(&unit),
            vec!["ghcr.io/acme/api:latest", "ghcr.io/acme/api:stable"]
        );

        let local = RunConfig::default();
        assert_eq!(local.render_tag("api", "dev"), "api:dev");
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = pushable().digest().unwrap();
        let b = pushable().digest().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let other = RunConfig { tag: "x".into(), ..pushable() }.digest().unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_load_or_default() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(load_or_default(tmp.path()).unwrap(), RunConfig::default());

        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "workers = 8\n").unwrap();
        assert_eq!(load_or_default(tmp.path()).unwrap().workers, 8);

        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "workers = \"many\"\n").unwrap();
        assert!(matches!(
            load_or_default(tmp.path()),
            Err(StowageError::ConfigParse { .. })
        ));
    }
}
