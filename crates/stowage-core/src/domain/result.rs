//! Per-unit build outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a unit was never handed to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The unit has blocking validation issues under the enforcing policy.
    Blocked,
    /// An earlier unit failed in fail-fast mode.
    Aborted,
    /// The run was cancelled before the unit was dispatched.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Blocked => "blocked by validation issues",
            SkipReason::Aborted => "aborted after earlier failure",
            SkipReason::Cancelled => "cancelled",
        })
    }
}

/// Outcome of the build invocation itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildStatus {
    Succeeded,
    Failed { detail: String },
    Skipped { reason: SkipReason },
}

/// Outcome of comparing the published manifest with the requested platforms.
///
/// Kept separate from [`BuildStatus`]: a failed verification never retracts a
/// successful build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Verification {
    #[default]
    NotAttempted,
    Verified {
        platforms: Vec<String>,
    },
    VerificationFailed {
        reason: String,
    },
}

impl Verification {
    pub fn is_failed(&self) -> bool {
        matches!(self, Verification::VerificationFailed { .. })
    }
}

/// Result recorded for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub unit: String,
    #[serde(flatten)]
    pub status: BuildStatus,
    /// Platforms actually requested from the builder.
    pub platforms: Vec<String>,
    pub tags: Vec<String>,
    /// Set when the image was pushed and the builder reported a digest.
    pub manifest_ref: Option<String>,
    pub pushed: bool,
    pub verification: Verification,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn succeeded(
        unit: impl Into<String>,
        platforms: Vec<String>,
        tags: Vec<String>,
        pushed: bool,
        manifest_ref: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            unit: unit.into(),
            status: BuildStatus::Succeeded,
            platforms,
            tags,
            manifest_ref,
            pushed,
            verification: Verification::NotAttempted,
            duration_ms,
        }
    }

    pub fn failed(
        unit: impl Into<String>,
        platforms: Vec<String>,
        tags: Vec<String>,
        detail: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            unit: unit.into(),
            status: BuildStatus::Failed {
                detail: detail.into(),
            },
            platforms,
            tags,
            manifest_ref: None,
            pushed: false,
            verification: Verification::NotAttempted,
            duration_ms,
        }
    }

    pub fn skipped(unit: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            unit: unit.into(),
            status: BuildStatus::Skipped { reason },
            platforms: Vec::new(),
            tags: Vec::new(),
            manifest_ref: None,
            pushed: false,
            verification: Verification::NotAttempted,
            duration_ms: 0,
        }
    }

    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verification = verification;
        self
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.status, BuildStatus::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, BuildStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, BuildStatus::Skipped { .. })
    }

    /// The tag the registry is queried at after a push.
    pub fn canonical_tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }
}
