//! Script line parser
//!
//! Grammar per line:
//!
//! ```text
//! [cond arg]... [!cond arg]... [!] command arg 'quoted arg' "quoted arg" [&]
//! ```
//!
//! Blank lines and `#` comments are skipped. Condition guards come first; a
//! bare `!` token negates the command (it must fail); a trailing `&` runs the
//! command in the background until `wait`.

use crate::{EngineError, Result};

/// One executable script line
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// 1-based line number in the script source
    pub number: usize,
    /// Raw text, for error reporting
    pub text: String,
    /// Condition guards; all must hold or the line is skipped
    pub guards: Vec<Guard>,
    /// `!` prefix: the command is expected to fail
    pub negated: bool,
    /// `&` suffix: run in the background
    pub background: bool,
    /// Command name followed by its arguments
    pub args: Vec<String>,
}

/// A `[cond args]` or `[!cond args]` guard
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub negated: bool,
    pub name: String,
    pub args: Vec<String>,
}

/// Parse a whole script into executable lines
pub fn parse_script(src: &str) -> Result<Vec<ParsedLine>> {
    let mut lines = Vec::new();
    for (idx, raw) in src.lines().enumerate() {
        let number = idx + 1;
        if let Some(line) = parse_line(number, raw)
            .map_err(|e| EngineError::at(number, raw.trim(), e))?
        {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Parse a single line; None for blanks and comments
pub fn parse_line(number: usize, raw: &str) -> Result<Option<ParsedLine>> {
    let mut rest = raw.trim();
    if rest.is_empty() || rest.starts_with('#') {
        return Ok(None);
    }
    let text = rest.to_string();

    let mut guards = Vec::new();
    while rest.starts_with('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| EngineError::Parse("unterminated condition".to_string()))?;
        let body = rest[1..close].trim();
        if body.is_empty() {
            return Err(EngineError::Parse("empty condition".to_string()));
        }
        let (negated, body) = match body.strip_prefix('!') {
            Some(stripped) => (true, stripped.trim_start()),
            None => (false, body),
        };
        let mut parts = body.split_whitespace().map(|s| s.to_string());
        let name = parts
            .next()
            .ok_or_else(|| EngineError::Parse("empty condition".to_string()))?;
        guards.push(Guard {
            negated,
            name,
            args: parts.collect(),
        });
        rest = rest[close + 1..].trim_start();
    }

    let mut args = split_tokens(rest)?;
    if args.is_empty() {
        return Err(EngineError::Parse(
            "missing command after condition".to_string(),
        ));
    }

    let negated = args[0] == "!";
    if negated {
        args.remove(0);
        if args.is_empty() {
            return Err(EngineError::Parse("missing command after !".to_string()));
        }
    }

    let background = args.last().map(|a| a == "&").unwrap_or(false);
    if background {
        args.pop();
        if args.is_empty() {
            return Err(EngineError::Parse("missing command before &".to_string()));
        }
    }

    Ok(Some(ParsedLine {
        number,
        text,
        guards,
        negated,
        background,
        args,
    }))
}

/// Split a command string into tokens honoring single and double quotes.
/// Inside double quotes, `\"` and `\\` escapes are recognized; single quotes
/// are literal through to the closing quote. A `#` at the start of a token
/// begins a comment.
fn split_tokens(s: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '#' if !in_token => break,
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => {
                            return Err(EngineError::Parse(
                                "unterminated single quote".to_string(),
                            ))
                        }
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(EngineError::Parse(
                                    "unterminated double quote".to_string(),
                                ))
                            }
                        },
                        Some(c) => current.push(c),
                        None => {
                            return Err(EngineError::Parse(
                                "unterminated double quote".to_string(),
                            ))
                        }
                    }
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}
