//! Target platform identifiers (`os/arch[/variant]`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A normalized platform identifier.
///
/// `linux/arm64/v8` and `linux/arm64` compare equal; so do `linux/amd64/v1`
/// and `linux/amd64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    os: String,
    arch: String,
    variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, arch: &str, variant: Option<&str>) -> Self {
        let os = os.to_ascii_lowercase();
        let arch = arch.to_ascii_lowercase();
        let variant = variant
            .map(str::to_ascii_lowercase)
            .filter(|v| !is_default_variant(&arch, v));
        Self { os, arch, variant }
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }
}

fn is_default_variant(arch: &str, variant: &str) -> bool {
    matches!((arch, variant), ("arm64", "v8") | ("amd64", "v1"))
}

fn is_component(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Error for a malformed platform identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid platform '{0}': expected os/arch[/variant]")]
pub struct InvalidPlatform(pub String);

impl FromStr for Platform {
    type Err = InvalidPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if !parts.iter().all(|p| is_component(p)) {
            return Err(InvalidPlatform(s.to_string()));
        }
        match parts.as_slice() {
            [os, arch] => Ok(Self::new(os, arch, None)),
            [os, arch, variant] => Ok(Self::new(os, arch, Some(variant))),
            _ => Err(InvalidPlatform(s.to_string())),
        }
    }
}

impl TryFrom<String> for Platform {
    type Error = InvalidPlatform;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Requested platforms absent from `available`, compared normalized.
///
/// Entries of `available` that do not parse are ignored.
pub fn missing_platforms(requested: &[Platform], available: &[String]) -> Vec<Platform> {
    let available: Vec<Platform> = available.iter().filter_map(|s| s.parse().ok()).collect();
    requested
        .iter()
        .filter(|p| !available.contains(p))
        .cloned()
        .collect()
}
