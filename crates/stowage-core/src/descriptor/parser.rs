//! Logical lines → [`Instruction`]s.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

use super::lexer::{escape_directive, logical_lines, tokenize, LogicalLine};
use super::ParseError;
use crate::domain::{
    CopyInstruction, CopyKind, CopySource, FromInstruction, Instruction, StageRef,
};

/// Returns `true` when `value` contains an unescaped `$NAME` or `${...}` reference.
pub fn contains_variable(value: &str) -> bool {
    static VARIABLE: OnceLock<Regex> = OnceLock::new();
    let re = VARIABLE.get_or_init(|| {
        Regex::new(r"(^|[^\\])\$(\{[^}]*\}|[A-Za-z_][A-Za-z0-9_]*)").expect("valid variable regex")
    });
    re.is_match(value)
}

fn is_valid_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Parser state carried across the instructions of one descriptor.
#[derive(Default)]
struct ParseState {
    instructions: Vec<Instruction>,
    /// Lower-cased alias → line it was introduced on.
    aliases: HashMap<String, usize>,
    stage_count: usize,
    /// `--from` targets not known at the time they were seen: (name, line).
    unresolved_from: Vec<(String, usize)>,
}

pub(super) fn parse_instructions(text: &str) -> Result<(Vec<Instruction>, char), ParseError> {
    let escape = escape_directive(text);
    let mut state = ParseState::default();

    for logical in logical_lines(text, escape) {
        parse_line(&mut state, &logical, escape)?;
    }

    if state.stage_count == 0 {
        return Err(ParseError::new(None, "descriptor contains no FROM instruction"));
    }

    // A --from that names an alias only introduced later breaks stage ordering.
    for (name, line) in &state.unresolved_from {
        if let Some(alias_line) = state.aliases.get(name) {
            return Err(ParseError::new(
                Some(*line),
                format!(
                    "stage '{}' is referenced before it is defined on line {}",
                    name, alias_line
                ),
            ));
        }
    }

    Ok((state.instructions, escape))
}

fn parse_line(state: &mut ParseState, logical: &LogicalLine, escape: char) -> Result<(), ParseError> {
    let text = logical.text.trim();
    let (keyword, rest) = match text.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (text, ""),
    };
    let line = logical.line;

    trace!(line, keyword, "parsing instruction");

    match keyword.to_ascii_uppercase().as_str() {
        "FROM" => {
            let from = parse_from(state, rest, line, escape)?;
            state.stage_count += 1;
            state.instructions.push(Instruction::From(from));
        }
        "COPY" | "ADD" => {
            if state.stage_count == 0 {
                return Err(ParseError::new(
                    Some(line),
                    format!("{} appears before the first FROM", keyword.to_ascii_uppercase()),
                ));
            }
            let kind = if keyword.eq_ignore_ascii_case("ADD") {
                CopyKind::Add
            } else {
                CopyKind::Copy
            };
            let copy = parse_copy(state, kind, rest, line, escape)?;
            state.instructions.push(Instruction::Copy(copy));
        }
        "USER" => {
            if rest.is_empty() {
                return Err(ParseError::new(Some(line), "USER requires a value"));
            }
            state.instructions.push(Instruction::User {
                user: rest.to_string(),
                line,
            });
        }
        // Other verbs carry nothing stowage validates.
        _ => {}
    }

    Ok(())
}

fn parse_from(
    state: &mut ParseState,
    rest: &str,
    line: usize,
    escape: char,
) -> Result<FromInstruction, ParseError> {
    let tokens = tokenize(rest, escape).map_err(|e| ParseError::new(Some(line), e))?;

    let mut platform = None;
    let mut positional = Vec::new();
    for token in tokens {
        if let Some(flag) = token.strip_prefix("--") {
            if let Some(value) = flag.strip_prefix("platform=") {
                platform = Some(value.to_string());
            }
        } else {
            positional.push(token);
        }
    }

    let (image_ref, stage_alias) = match positional.as_slice() {
        [] => return Err(ParseError::new(Some(line), "FROM requires an image reference")),
        [image] => (image.clone(), None),
        [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("as") => {
            if !is_valid_alias(alias) {
                return Err(ParseError::new(
                    Some(line),
                    format!("invalid stage alias '{}'", alias),
                ));
            }
            (image.clone(), Some(alias.clone()))
        }
        [_, as_kw] if as_kw.eq_ignore_ascii_case("as") => {
            return Err(ParseError::new(Some(line), "FROM ... AS requires a stage alias"))
        }
        _ => {
            return Err(ParseError::new(
                Some(line),
                format!("unexpected tokens in FROM: '{}'", rest),
            ))
        }
    };

    let refers_to_stage = state.aliases.contains_key(&image_ref.to_ascii_lowercase());

    if let Some(alias) = &stage_alias {
        let key = alias.to_ascii_lowercase();
        if let Some(first) = state.aliases.get(&key) {
            return Err(ParseError::new(
                Some(line),
                format!("duplicate stage alias '{}' (first defined on line {})", alias, first),
            ));
        }
        state.aliases.insert(key, line);
    }

    Ok(FromInstruction {
        has_variable: contains_variable(&image_ref),
        image_ref,
        stage_alias,
        platform,
        refers_to_stage,
        line,
    })
}

fn parse_copy(
    state: &mut ParseState,
    kind: CopyKind,
    rest: &str,
    line: usize,
    escape: char,
) -> Result<CopyInstruction, ParseError> {
    let mut flags = BTreeSet::new();

    // Leading flags are consumed from the raw text so a JSON array that
    // follows them can be parsed intact.
    let mut remaining = rest.trim_start();
    while remaining.starts_with("--") {
        let end = remaining
            .find(char::is_whitespace)
            .unwrap_or(remaining.len());
        flags.insert(remaining[..end].to_string());
        remaining = remaining[end..].trim_start();
    }

    let json_form = if remaining.starts_with('[') {
        serde_json::from_str::<Vec<String>>(remaining).ok()
    } else {
        None
    };

    let positional: Vec<String> = match json_form {
        Some(items) => items,
        None => tokenize(remaining, escape)
            .map_err(|e| ParseError::new(Some(line), e))?
            .into_iter()
            .filter(|token| {
                if token.starts_with("--") {
                    flags.insert(token.clone());
                    false
                } else {
                    true
                }
            })
            .collect(),
    };

    if positional.len() < 2 {
        return Err(ParseError::new(
            Some(line),
            format!(
                "{} requires at least one source and a destination",
                kind.keyword()
            ),
        ));
    }

    let from_stage = match flags.iter().find(|f| *f == "--from" || f.starts_with("--from=")) {
        None => None,
        Some(flag) => {
            let target = flag.strip_prefix("--from=").unwrap_or_default();
            if target.is_empty() {
                return Err(ParseError::new(Some(line), "--from requires a stage or image"));
            }
            Some(resolve_stage_ref(state, target, line))
        }
    };

    let mut operands: Vec<CopySource> = positional
        .into_iter()
        .map(|path| CopySource {
            has_variable: contains_variable(&path),
            path,
        })
        .collect();
    let dest = operands.pop().ok_or_else(|| {
        ParseError::new(Some(line), format!("{} is missing a destination", kind.keyword()))
    })?;

    Ok(CopyInstruction {
        kind,
        sources: operands,
        dest,
        from_stage,
        flags,
        line,
    })
}

fn resolve_stage_ref(state: &mut ParseState, target: &str, line: usize) -> StageRef {
    let key = target.to_ascii_lowercase();
    if state.aliases.contains_key(&key) {
        return StageRef::Alias(target.to_string());
    }
    if let Ok(index) = target.parse::<usize>() {
        if index < state.stage_count {
            return StageRef::Alias(target.to_string());
        }
    }
    state.unresolved_from.push((key, line));
    StageRef::Image(target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_variable() {
        assert!(contains_variable("$APP_DIR/bin"));
        assert!(contains_variable("/opt/${VERSION}/lib"));
        assert!(contains_variable("prefix-$name"));
        assert!(!contains_variable("/plain/path"));
        assert!(!contains_variable(r"cost\$5"));
        assert!(!contains_variable("$5"));
    }

    #[test]
    fn test_valid_alias() {
        assert!(is_valid_alias("build"));
        assert!(is_valid_alias("build-stage.1"));
        assert!(!is_valid_alias("1build"));
        assert!(!is_valid_alias(""));
    }
}
