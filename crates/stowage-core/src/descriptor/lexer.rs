//! Physical lines → logical lines → tokens.
//!
//! Line continuation is resolved before any tokenizing so that a `COPY`
//! spread over several lines is seen as one instruction.

/// Default escape character.
pub const DEFAULT_ESCAPE: char = '\\';

/// One instruction's worth of text after continuations are joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based physical line the instruction starts on.
    pub line: usize,
    pub text: String,
}

/// Read the `# escape=` parser directive, if present.
///
/// Directives are only honored in the leading run of `# key=value` comments.
pub fn escape_directive(text: &str) -> char {
    for raw in text.lines() {
        let trimmed = raw.trim();
        let Some(body) = trimmed.strip_prefix('#') else {
            break;
        };
        let Some((key, value)) = body.split_once('=') else {
            break;
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            break;
        }
        if key.eq_ignore_ascii_case("escape") {
            match value.trim() {
                "`" => return '`',
                "\\" => return '\\',
                _ => return DEFAULT_ESCAPE,
            }
        }
    }
    DEFAULT_ESCAPE
}

/// Join continued lines and drop blanks and comments.
pub fn logical_lines(text: &str, escape: char) -> Vec<LogicalLine> {
    let mut out = Vec::new();
    let mut pending: Option<LogicalLine> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            // Comments and blank lines inside a continuation are dropped too.
            continue;
        }

        let content = raw.trim_end();
        let (body, continues) = match content.strip_suffix(escape) {
            Some(body) => (body, true),
            None => (content, false),
        };

        let current = pending.get_or_insert_with(|| LogicalLine {
            line: line_no,
            text: String::new(),
        });
        if current.text.is_empty() {
            current.text.push_str(body.trim_start());
        } else {
            current.text.push_str(body);
        }

        if !continues {
            if let Some(done) = pending.take() {
                out.push(done);
            }
        }
    }

    if let Some(done) = pending {
        if !done.text.trim().is_empty() {
            out.push(done);
        }
    }

    out
}

/// Split an argument string on whitespace, honoring quotes and the escape char.
///
/// Quotes are removed. An escaped `$` keeps its escape so that later variable
/// detection can tell it apart from a real reference.
pub fn tokenize(input: &str, escape: char) -> Result<Vec<String>, String> {
    #[derive(PartialEq)]
    enum State {
        Between,
        Word,
        Single,
        Double,
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = State::Between;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Between | State::Word => {
                if c.is_whitespace() {
                    if state == State::Word {
                        tokens.push(std::mem::take(&mut current));
                        state = State::Between;
                    }
                } else if c == escape {
                    state = State::Word;
                    match chars.next() {
                        Some('$') => {
                            current.push(escape);
                            current.push('$');
                        }
                        Some(next) => current.push(next),
                        None => current.push(escape),
                    }
                } else if c == '\'' {
                    state = State::Single;
                } else if c == '"' {
                    state = State::Double;
                } else {
                    state = State::Word;
                    current.push(c);
                }
            }
            State::Single => {
                if c == '\'' {
                    state = State::Word;
                } else {
                    current.push(c);
                }
            }
            State::Double => {
                if c == '"' {
                    state = State::Word;
                } else if c == escape {
                    match chars.next() {
                        Some('$') => {
                            current.push(escape);
                            current.push('$');
                        }
                        Some(next) => current.push(next),
                        None => return Err("unterminated escape in quoted string".to_string()),
                    }
                } else {
                    current.push(c);
                }
            }
        }
    }

    match state {
        State::Single | State::Double => Err("unterminated quoted string".to_string()),
        State::Word => {
            tokens.push(current);
            Ok(tokens)
        }
        State::Between => Ok(tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_joins_lines() {
        let text = "FROM alpine\nCOPY a \\\n     b \\\n     /dest/\n";
        let lines = logical_lines(text, DEFAULT_ESCAPE);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, 2);
        assert_eq!(tokenize(&lines[1].text, '\\').unwrap(), vec!["COPY", "a", "b", "/dest/"]);
    }

    #[test]
    fn test_comments_inside_continuation_are_dropped() {
        let text = "COPY a \\\n# explain b\n  b /dest\n";
        let lines = logical_lines(text, DEFAULT_ESCAPE);
        assert_eq!(lines.len(), 1);
        assert_eq!(tokenize(&lines[0].text, '\\').unwrap(), vec!["COPY", "a", "b", "/dest"]);
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        let text = "\n# header\n\nFROM alpine\n   \n";
        let lines = logical_lines(text, DEFAULT_ESCAPE);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line, 4);
    }

    #[test]
    fn test_trailing_continuation_at_eof() {
        let lines = logical_lines("COPY a /b \\", DEFAULT_ESCAPE);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text.trim(), "COPY a /b");
    }

    #[test]
    fn test_escape_directive() {
        assert_eq!(escape_directive("# escape=`\nFROM x"), '`');
        assert_eq!(escape_directive("# syntax=docker/dockerfile:1\n# escape=`\n"), '`');
        assert_eq!(escape_directive("FROM x\n# escape=`\n"), '\\');
        assert_eq!(escape_directive("# a comment\n# escape=`\n"), '\\');
    }

    #[test]
    fn test_backtick_continuation() {
        let lines = logical_lines("COPY a `\n  C:\\app\\", '`');
        assert_eq!(lines.len(), 1);
        assert_eq!(tokenize(&lines[0].text, '`').unwrap(), vec!["COPY", "a", "C:\\app\\"]);
    }

    #[test]
    fn test_tokenize_quotes() {
        let tokens = tokenize(r#"COPY "my file.txt" 'other file' /dst"#, '\\').unwrap();
        assert_eq!(tokens, vec!["COPY", "my file.txt", "other file", "/dst"]);
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert!(tokenize(r#"COPY "oops /dst"#, '\\').is_err());
    }

    #[test]
    fn test_tokenize_keeps_escaped_dollar() {
        let tokens = tokenize(r"a\$HOME b", '\\').unwrap();
        assert_eq!(tokens, vec![r"a\$HOME", "b"]);
    }
}
