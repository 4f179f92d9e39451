//! Compliance policy for base images, keyed by service tier.
//!
//! A unit is compliant when every `FROM` image reference starts with one of
//! its tier's allowed prefixes and neither its name nor its descriptor file
//! name matches one of the tier's denied patterns. Every failing check is
//! reported; evaluation never stops at the first violation.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::domain::{BuildUnit, Tier, ValidationIssue};

/// Allow/deny rules for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub tier: Tier,
    #[serde(default)]
    pub allowed_image_prefixes: Vec<String>,
    /// Glob patterns matched case-insensitively against the unit name and
    /// the descriptor file name.
    #[serde(default)]
    pub denied_name_patterns: Vec<String>,
    /// Permit `FROM scratch`.
    #[serde(default)]
    pub allow_scratch: bool,
    /// Emit an advisory when the final stage does not drop root.
    #[serde(default)]
    pub require_nonroot_user: bool,
}

impl PolicyRule {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            allowed_image_prefixes: Vec::new(),
            denied_name_patterns: Vec::new(),
            allow_scratch: false,
            require_nonroot_user: false,
        }
    }

    pub fn allow_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.allowed_image_prefixes.push(prefix.into());
        self
    }

    pub fn deny_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.denied_name_patterns.push(pattern.into());
        self
    }

    pub fn require_nonroot(mut self) -> Self {
        self.require_nonroot_user = true;
        self
    }

    fn rule_id(&self, check: &str) -> String {
        format!("{}/{}", self.tier, check)
    }

    fn allows_image(&self, image_ref: &str) -> bool {
        self.allowed_image_prefixes
            .iter()
            .any(|prefix| image_ref.starts_with(prefix.as_str()))
    }
}

/// The rule set evaluated for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    pub rules: Vec<PolicyRule>,
}

impl PolicySet {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Hardened defaults: distroless bases only, "simple" variants denied.
    pub fn standard() -> Self {
        Self::empty()
            .with_rule(
                PolicyRule::new(Tier::foundation())
                    .allow_prefix("gcr.io/distroless/")
                    .deny_pattern("*simple*")
                    .require_nonroot(),
            )
            .with_rule(
                PolicyRule::new(Tier::application())
                    .allow_prefix("gcr.io/distroless/")
                    .deny_pattern("*simple*")
                    .require_nonroot(),
            )
    }

    pub fn rule_for(&self, tier: &Tier) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| &r.tier == tier)
    }

    /// Reject malformed denied patterns up front.
    pub fn check_patterns(&self) -> Result<(), String> {
        for rule in &self.rules {
            for pattern in &rule.denied_name_patterns {
                Pattern::new(pattern).map_err(|e| {
                    format!("invalid denied pattern '{}' for tier {}: {}", pattern, rule.tier, e)
                })?;
            }
        }
        Ok(())
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::standard()
    }
}

/// One failed policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub rule_id: String,
    pub offending_ref: String,
}

/// Policy outcome for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "violations", rename_all = "snake_case")]
pub enum ComplianceVerdict {
    Compliant,
    NonCompliant(Vec<ComplianceViolation>),
}

impl ComplianceVerdict {
    pub fn is_compliant(&self) -> bool {
        matches!(self, ComplianceVerdict::Compliant)
    }

    pub fn violations(&self) -> &[ComplianceViolation] {
        match self {
            ComplianceVerdict::Compliant => &[],
            ComplianceVerdict::NonCompliant(v) => v,
        }
    }

    pub fn into_issues(self, unit: &str) -> Vec<ValidationIssue> {
        match self {
            ComplianceVerdict::Compliant => Vec::new(),
            ComplianceVerdict::NonCompliant(violations) => violations
                .into_iter()
                .map(|v| ValidationIssue::ComplianceViolation {
                    unit: unit.to_string(),
                    rule_id: v.rule_id,
                    offending_ref: v.offending_ref,
                })
                .collect(),
        }
    }
}

const PATTERN_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Evaluate `unit`'s base images and name against `policy`.
pub fn evaluate(policy: &PolicySet, unit: &BuildUnit, descriptor: &Descriptor) -> ComplianceVerdict {
    let Some(rule) = policy.rule_for(unit.tier()) else {
        return ComplianceVerdict::NonCompliant(vec![ComplianceViolation {
            rule_id: "unknown-tier".to_string(),
            offending_ref: unit.tier().to_string(),
        }]);
    };

    let mut violations = Vec::new();

    for from in descriptor.froms() {
        if from.refers_to_stage {
            continue;
        }
        if rule.allow_scratch && from.image_ref.eq_ignore_ascii_case("scratch") {
            continue;
        }
        if from.has_variable {
            violations.push(ComplianceViolation {
                rule_id: rule.rule_id("unresolved-base-image"),
                offending_ref: from.image_ref.clone(),
            });
        } else if !rule.allows_image(&from.image_ref) {
            violations.push(ComplianceViolation {
                rule_id: rule.rule_id("allowed-image-prefix"),
                offending_ref: from.image_ref.clone(),
            });
        }
    }

    let file_name = unit.descriptor_file_name();
    for raw in &rule.denied_name_patterns {
        let Ok(pattern) = Pattern::new(raw) else {
            continue;
        };
        for candidate in [unit.name(), file_name.as_str()] {
            if pattern.matches_with(candidate, PATTERN_OPTIONS) {
                violations.push(ComplianceViolation {
                    rule_id: rule.rule_id("denied-name"),
                    offending_ref: format!("{} (matches '{}')", candidate, raw),
                });
                break;
            }
        }
    }

    if violations.is_empty() {
        ComplianceVerdict::Compliant
    } else {
        ComplianceVerdict::NonCompliant(violations)
    }
}

/// Non-blocking findings for `unit`, e.g. a final stage running as root.
pub fn advisories(policy: &PolicySet, unit: &BuildUnit, descriptor: &Descriptor) -> Vec<ValidationIssue> {
    let Some(rule) = policy.rule_for(unit.tier()) else {
        return Vec::new();
    };
    if !rule.require_nonroot_user || runs_as_nonroot(descriptor) {
        return Vec::new();
    }
    vec![ValidationIssue::Advisory {
        unit: unit.name().to_string(),
        code: "nonroot-user".to_string(),
        message: "final stage does not switch to a non-root USER".to_string(),
    }]
}

fn runs_as_nonroot(descriptor: &Descriptor) -> bool {
    if let Some(user) = descriptor.final_user() {
        let name = user.split(':').next().unwrap_or(user).trim();
        return !(name.eq_ignore_ascii_case("root") || name == "0");
    }
    // Distroless `:nonroot` variants already default to uid 65532.
    descriptor
        .froms()
        .last()
        .is_some_and(|f| f.image_ref.ends_with(":nonroot") || f.image_ref.contains(":nonroot-"))
}
