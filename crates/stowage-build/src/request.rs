//! Immutable build requests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use stowage_core::{BuildUnit, CachePolicy, Platform, RunConfig};

use crate::error::BuildError;

/// Everything the builder needs to produce one unit's image.
///
/// Constructed once through [`BuildRequestBuilder`] and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    unit: String,
    descriptor: PathBuf,
    context: PathBuf,
    platforms: Vec<Platform>,
    tags: Vec<String>,
    no_cache: bool,
    push: bool,
    verbose: bool,
    timeout: Duration,
}

impl BuildRequest {
    /// Request for `unit` with every setting taken from `config`.
    pub fn from_config(unit: &BuildUnit, config: &RunConfig) -> Result<Self, BuildError> {
        let platforms = config
            .parsed_platforms()
            .map_err(|e| BuildError::InvalidRequest(e.to_string()))?;
        BuildRequestBuilder::for_unit(unit)
            .platforms(platforms)
            .tags(config.render_tags(unit))
            .no_cache(config.cache == CachePolicy::None)
            .push(config.push)
            .verbose(config.verbose)
            .timeout(config.timeout())
            .build()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn platform_strings(&self) -> Vec<String> {
        self.platforms.iter().map(ToString::to_string).collect()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn no_cache(&self) -> bool {
        self.no_cache
    }

    pub fn push(&self) -> bool {
        self.push
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder for [`BuildRequest`].
#[derive(Debug, Clone)]
pub struct BuildRequestBuilder {
    unit: String,
    descriptor: PathBuf,
    context: PathBuf,
    platforms: Vec<Platform>,
    tags: Vec<String>,
    no_cache: bool,
    push: bool,
    verbose: bool,
    timeout: Duration,
}

impl BuildRequestBuilder {
    pub fn for_unit(unit: &BuildUnit) -> Self {
        Self {
            unit: unit.name().to_string(),
            descriptor: unit.descriptor().to_path_buf(),
            context: unit.context().to_path_buf(),
            platforms: Vec::new(),
            tags: Vec::new(),
            no_cache: false,
            push: false,
            verbose: false,
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<BuildRequest, BuildError> {
        if self.platforms.is_empty() {
            return Err(BuildError::InvalidRequest(format!(
                "no platforms for unit '{}'",
                self.unit
            )));
        }
        if self.tags.is_empty() {
            return Err(BuildError::InvalidRequest(format!(
                "no tags for unit '{}'",
                self.unit
            )));
        }
        if self.timeout.is_zero() {
            return Err(BuildError::InvalidRequest("timeout must be positive".into()));
        }
        Ok(BuildRequest {
            unit: self.unit,
            descriptor: self.descriptor,
            context: self.context,
            platforms: self.platforms,
            tags: self.tags,
            no_cache: self.no_cache,
            push: self.push,
            verbose: self.verbose,
            timeout: self.timeout,
        })
    }
}
