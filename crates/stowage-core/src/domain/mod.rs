//! Domain model shared by every stage of a stowage run.

pub mod instruction;
pub mod issue;
pub mod result;
pub mod unit;

pub use instruction::{CopyInstruction, CopyKind, CopySource, FromInstruction, Instruction, StageRef};
pub use issue::{IssueKind, ValidationIssue};
pub use result::{BuildResult, BuildStatus, SkipReason, Verification};
pub use unit::{BuildUnit, Tier};
