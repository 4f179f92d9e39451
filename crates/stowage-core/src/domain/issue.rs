//! Unit-scoped validation issues.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Coarse classification of a [`ValidationIssue`], used for grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ParseError,
    ComplianceViolation,
    MissingSource,
    Advisory,
}

impl IssueKind {
    /// Whether this kind blocks a unit from building under the enforcing policy.
    pub fn blocks_when_enforcing(&self) -> bool {
        !matches!(self, IssueKind::Advisory)
    }

    pub fn label(&self) -> &'static str {
        match self {
            IssueKind::ParseError => "parse error",
            IssueKind::ComplianceViolation => "compliance violation",
            IssueKind::MissingSource => "missing source",
            IssueKind::Advisory => "advisory",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A problem found for one unit before anything is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingSource {
        unit: String,
        /// Source operand as written in the descriptor.
        source: String,
        resolved: PathBuf,
        line: usize,
    },
    ParseError {
        unit: String,
        line: Option<usize>,
        reason: String,
    },
    ComplianceViolation {
        unit: String,
        rule_id: String,
        offending_ref: String,
    },
    Advisory {
        unit: String,
        code: String,
        message: String,
    },
}

impl ValidationIssue {
    pub fn unit(&self) -> &str {
        match self {
            ValidationIssue::MissingSource { unit, .. }
            | ValidationIssue::ParseError { unit, .. }
            | ValidationIssue::ComplianceViolation { unit, .. }
            | ValidationIssue::Advisory { unit, .. } => unit,
        }
    }

    pub fn kind(&self) -> IssueKind {
        match self {
            ValidationIssue::MissingSource { .. } => IssueKind::MissingSource,
            ValidationIssue::ParseError { .. } => IssueKind::ParseError,
            ValidationIssue::ComplianceViolation { .. } => IssueKind::ComplianceViolation,
            ValidationIssue::Advisory { .. } => IssueKind::Advisory,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingSource {
                source,
                resolved,
                line,
                ..
            } => write!(
                f,
                "line {}: source '{}' not found at {}",
                line,
                source,
                resolved.display()
            ),
            ValidationIssue::ParseError { line, reason, .. } => match line {
                Some(line) => write!(f, "line {}: {}", line, reason),
                None => f.write_str(reason),
            },
            ValidationIssue::ComplianceViolation {
                rule_id,
                offending_ref,
                ..
            } => write!(f, "[{}] {}", rule_id, offending_ref),
            ValidationIssue::Advisory { code, message, .. } => write!(f, "[{}] {}", code, message),
        }
    }
}
