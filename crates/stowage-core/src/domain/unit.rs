//! Build units and service tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Policy classification of a unit, e.g. `foundation` or `application`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(String);

impl Tier {
    pub const FOUNDATION: &'static str = "foundation";
    pub const APPLICATION: &'static str = "application";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_ascii_lowercase())
    }

    pub fn foundation() -> Self {
        Self::new(Self::FOUNDATION)
    }

    pub fn application() -> Self {
        Self::new(Self::APPLICATION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::application()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One independently buildable artifact: a descriptor plus its build context.
///
/// Units are created by discovery and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildUnit {
    name: String,
    descriptor: PathBuf,
    context: PathBuf,
    tags: Vec<String>,
    tier: Tier,
}

impl BuildUnit {
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<PathBuf>,
        context: impl Into<PathBuf>,
        tier: Tier,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            context: context.into(),
            tags: Vec::new(),
            tier,
        }
    }

    /// Attach extra tags declared for this unit (in addition to the run tag).
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.tags = tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn tier(&self) -> &Tier {
        &self.tier
    }

    /// Directory containing the descriptor.
    pub fn descriptor_dir(&self) -> &Path {
        self.descriptor.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// File name of the descriptor, e.g. `Dockerfile.api`.
    pub fn descriptor_file_name(&self) -> String {
        self.descriptor
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
