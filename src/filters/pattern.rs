//! Shell-style wildcard patterns matched against whole word tokens.
//!
//! Supported syntax: `*` (any run), `?` (one char), `[seq]` and `[!seq]`
//! (character sets). An unclosed `[` is taken literally. Everything else
//! matches itself, case-sensitively; callers that want case-insensitive
//! matching lower-case the tokens before matching.

use regex::Regex;

use crate::error::FilterError;

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    source: String,
    regex: Regex,
}

impl WildcardPattern {
    /// Compile a wildcard pattern.
    pub fn new(pattern: &str) -> Result<Self, FilterError> {
        let regex = Regex::new(&translate(pattern)).map_err(|e| FilterError::MalformedExpression {
            term: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the whole token matches.
    pub fn is_match(&self, token: &str) -> bool {
        self.regex.is_match(token)
    }

    /// Whether any of the tokens matches.
    pub fn matches_any<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        tokens.iter().any(|t| self.is_match(t.as_ref()))
    }
}

/// Translate a wildcard pattern into an anchored regex.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("^(?s:");

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                // Collapse runs of stars.
                while i < chars.len() && chars[i] == '*' {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                } else {
                    out.push_str(&translate_set(&chars[i..j]));
                    i = j + 1;
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push_str(")$");
    out
}

/// Translate the inside of a `[...]` set.
fn translate_set(set: &[char]) -> String {
    let (negated, body) = match set.split_first() {
        Some(('!', rest)) => (true, rest),
        _ => (false, set),
    };

    let mut out = String::from("[");
    if negated {
        out.push('^');
    }
    for (idx, c) in body.iter().enumerate() {
        let is_range_dash = *c == '-' && idx > 0 && idx + 1 < body.len();
        if is_range_dash {
            out.push('-');
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    out.push(']');
    out
}
