//! Structured form of the descriptor instructions stowage cares about.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A parsed descriptor instruction, in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    From(FromInstruction),
    Copy(CopyInstruction),
    User { user: String, line: usize },
}

impl Instruction {
    /// 1-based line number where the instruction starts.
    pub fn line(&self) -> usize {
        match self {
            Instruction::From(f) => f.line,
            Instruction::Copy(c) => c.line,
            Instruction::User { line, .. } => *line,
        }
    }
}

/// `FROM image [AS alias]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromInstruction {
    /// Image reference exactly as written.
    pub image_ref: String,
    pub stage_alias: Option<String>,
    pub platform: Option<String>,
    /// The image reference contains an unresolved variable.
    pub has_variable: bool,
    /// The image reference names an alias introduced by an earlier `FROM`.
    pub refers_to_stage: bool,
    pub line: usize,
}

/// Whether a copy came from `COPY` or `ADD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyKind {
    Copy,
    Add,
}

impl CopyKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            CopyKind::Copy => "COPY",
            CopyKind::Add => "ADD",
        }
    }
}

/// Target of a `--from=` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum StageRef {
    /// An alias (or numeric index) of an earlier stage in the same descriptor.
    Alias(String),
    /// An external image; the source lives inside that image.
    Image(String),
}

impl StageRef {
    pub fn name(&self) -> &str {
        match self {
            StageRef::Alias(n) | StageRef::Image(n) => n,
        }
    }
}

/// One source (or the destination) operand of a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySource {
    pub path: String,
    /// Contains `$VAR` or `${VAR}`; the concrete value is unknown statically.
    pub has_variable: bool,
}

/// `COPY`/`ADD [--flags] src... dest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyInstruction {
    pub kind: CopyKind,
    pub sources: Vec<CopySource>,
    pub dest: CopySource,
    pub from_stage: Option<StageRef>,
    /// Every `--flag[=value]` token as written, including ones stowage does not interpret.
    pub flags: BTreeSet<String>,
    pub line: usize,
}

impl CopyInstruction {
    pub fn is_stage_local(&self) -> bool {
        self.from_stage.is_some()
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.flags
            .iter()
            .any(|f| f == name || f.strip_prefix(name).is_some_and(|rest| rest.starts_with('=')))
    }
}
