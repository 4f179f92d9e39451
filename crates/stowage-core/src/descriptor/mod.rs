//! Build descriptor parsing.
//!
//! The descriptor language is line oriented: `FROM`, `COPY` and `ADD` are
//! interpreted, `USER` is recorded, everything else is accepted and ignored.
//! Parsing runs in three explicit steps (see [`lexer`]):
//! - continuation lines are joined into logical lines
//! - each logical line is tokenized
//! - tokens become an [`Instruction`]
//!
//! Stage aliases are scoped to one descriptor and must be introduced before
//! any `COPY --from=` that names them.

pub mod lexer;
mod parser;

use std::path::Path;

use crate::domain::{CopyInstruction, FromInstruction, Instruction};

pub use parser::contains_variable;

/// A descriptor that failed to parse. Names the offending line when known.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{}", line_prefix(.line), .reason)]
pub struct ParseError {
    pub line: Option<usize>,
    pub reason: String,
}

fn line_prefix(line: &Option<usize>) -> String {
    line.map(|l| format!("line {}: ", l)).unwrap_or_default()
}

impl ParseError {
    pub fn new(line: Option<usize>, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// The parsed instruction list of one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    instructions: Vec<Instruction>,
    escape: char,
}

impl Descriptor {
    /// Parse descriptor text.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let (instructions, escape) = parser::parse_instructions(text)?;
        Ok(Self {
            instructions,
            escape,
        })
    }

    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self, ParseError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ParseError::new(None, format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn escape(&self) -> char {
        self.escape
    }

    pub fn froms(&self) -> impl Iterator<Item = &FromInstruction> {
        self.instructions.iter().filter_map(|i| match i {
            Instruction::From(f) => Some(f),
            _ => None,
        })
    }

    pub fn copies(&self) -> impl Iterator<Item = &CopyInstruction> {
        self.instructions.iter().filter_map(|i| match i {
            Instruction::Copy(c) => Some(c),
            _ => None,
        })
    }

    /// Stage aliases in declaration order.
    pub fn stage_aliases(&self) -> Vec<&str> {
        self.froms()
            .filter_map(|f| f.stage_alias.as_deref())
            .collect()
    }

    /// The user the final stage runs as, if any `USER` follows its `FROM`.
    pub fn final_user(&self) -> Option<&str> {
        let mut user = None;
        for instruction in &self.instructions {
            match instruction {
                Instruction::From(_) => user = None,
                Instruction::User { user: u, .. } => user = Some(u.as_str()),
                Instruction::Copy(_) => {}
            }
        }
        user
    }
}

/// Image reference of the first `FROM`.
///
/// Discovery uses this as its content predicate. Only the lines up to the
/// first `FROM` are looked at, so a descriptor that breaks further down is
/// still discovered and its parse error reported by validation.
pub fn first_base_image(text: &str) -> Option<String> {
    let escape = lexer::escape_directive(text);
    lexer::logical_lines(text, escape).into_iter().find_map(|logical| {
        let text = logical.text.trim();
        let (keyword, rest) = text.split_once(char::is_whitespace)?;
        if !keyword.eq_ignore_ascii_case("FROM") {
            return None;
        }
        let tokens = lexer::tokenize(rest.trim(), escape).ok()?;
        tokens.into_iter().find(|t| !t.starts_with("--"))
    })
}
