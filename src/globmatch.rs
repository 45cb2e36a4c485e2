// src/globmatch.rs
//
// Shell-style wildcard matching over object keys. `**` crosses slashes, `*`
// and `?` do not, and `[...]` classes match a single character. Patterns are
// compiled to anchored regular expressions once and reused across a listing.

use regex::Regex;

use crate::error::{MscError, Result};

/// A compiled glob pattern.
pub struct GlobPattern {
    regex: Regex,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&translate(pattern)).map_err(|err| {
            MscError::invalid_argument(format!("invalid glob pattern \"{pattern}\": {err}"))
        })?;
        Ok(Self { regex })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

/// Translate a glob pattern into an anchored regex.
///
/// `**/` at a path boundary matches zero or more whole components, so
/// `**/*.tar` also matches a top-level `a.tar`.
fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    if chars.get(i + 2) == Some(&'/') {
                        out.push_str("(?:[^/]*/)*");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                } else {
                    out.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => {
                // Find the closing bracket; a ']' directly after '[' or '[!'
                // is part of the class.
                let mut j = i + 1;
                if chars.get(j) == Some(&'!') {
                    j += 1;
                }
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    // Unterminated class: treat '[' literally.
                    out.push_str("\\[");
                    i += 1;
                } else {
                    let inner: String = chars[i + 1..j].iter().collect();
                    out.push('[');
                    if let Some(rest) = inner.strip_prefix('!') {
                        out.push('^');
                        out.push_str(&escape_class(rest));
                    } else {
                        out.push_str(&escape_class(&inner));
                    }
                    out.push(']');
                    i = j + 1;
                }
            }
            c => {
                if regex_special(c) {
                    out.push('\\');
                }
                out.push(c);
                i += 1;
            }
        }
    }

    out.push('$');
    out
}

fn regex_special(c: char) -> bool {
    matches!(
        c,
        '.' | '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' | '\\'
    )
}

fn escape_class(inner: &str) -> String {
    // Inside a class only '\\', '^' and ']' need care; ']' placement is
    // handled by the scanner above.
    inner.replace('\\', "\\\\").replace('^', "\\^")
}

/// Filter keys by a glob pattern, preserving input order.
pub fn match_keys<'a, I>(keys: I, pattern: &str) -> Result<Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let compiled = GlobPattern::compile(pattern)?;
    Ok(keys
        .into_iter()
        .filter(|key| compiled.matches(key))
        .map(|key| key.to_string())
        .collect())
}

/// Longest literal prefix of a glob pattern, used to narrow the backing
/// listing before in-memory filtering.
pub fn extract_prefix_from_glob(pattern: &str) -> String {
    let mut prefix_parts = Vec::new();
    for part in pattern.split('/') {
        if part.contains(&['*', '?', '[', ']', '{', '}'][..]) {
            break;
        }
        prefix_parts.push(part);
    }
    prefix_parts.join("/")
}
