//! Common OSGi header grammar
//!
//! ```text
//! header    ::= clause ( ',' clause )*
//! clause    ::= path ( ';' path )* ( ';' parameter )*
//! parameter ::= key ':=' argument | key [ ':' type ] '=' argument
//! ```
//!
//! Arguments may be quoted; separators inside quotes are literal.

use crate::errors::{FrameworkError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    pub paths: Vec<String>,
    pub attributes: Vec<(String, String)>,
    pub directives: Vec<(String, String)>,
    /// Clause text as written, used in error messages
    pub text: String,
}

impl Clause {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn error(&self, header: &str, message: impl Into<String>) -> FrameworkError {
        FrameworkError::Manifest {
            header: header.to_string(),
            clause: self.text.clone(),
            message: message.into(),
        }
    }

    /// Reject directives outside `allowed`
    pub(crate) fn check_directives(&self, header: &str, allowed: &[&str]) -> Result<()> {
        for (key, _) in &self.directives {
            if !allowed.contains(&key.as_str()) {
                return Err(self.error(header, format!("unknown directive '{}:='", key)));
            }
        }
        Ok(())
    }
}

/// Split on `sep` outside double quotes
fn split_outside_quotes(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn unquote(header: &str, clause: &str, raw: &str) -> Result<String> {
    let raw = raw.trim();
    if !raw.starts_with('"') {
        return Ok(raw.to_string());
    }
    if raw.len() < 2 || !raw.ends_with('"') {
        return Err(FrameworkError::Manifest {
            header: header.to_string(),
            clause: clause.to_string(),
            message: format!("unterminated quoted string {}", raw),
        });
    }
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn has_unbalanced_quotes(text: &str) -> bool {
    let mut in_quotes = false;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            _ => {}
        }
    }
    in_quotes
}

/// Parse a header value into clauses
pub fn parse_clauses(header: &str, value: &str) -> Result<Vec<Clause>> {
    if has_unbalanced_quotes(value) {
        return Err(FrameworkError::Manifest {
            header: header.to_string(),
            clause: value.to_string(),
            message: "unbalanced quotes".to_string(),
        });
    }

    let mut clauses = Vec::new();
    for raw_clause in split_outside_quotes(value, ',') {
        let text = raw_clause.trim();
        if text.is_empty() {
            return Err(FrameworkError::Manifest {
                header: header.to_string(),
                clause: value.to_string(),
                message: "empty clause".to_string(),
            });
        }

        let mut clause = Clause {
            text: text.to_string(),
            ..Clause::default()
        };

        for part in split_outside_quotes(text, ';') {
            let part = part.trim();
            if part.is_empty() {
                return Err(clause.error(header, "empty path or parameter"));
            }

            let eq = split_outside_quotes(part, '=');
            if eq.len() == 1 {
                if !clause.attributes.is_empty() || !clause.directives.is_empty() {
                    return Err(clause.error(header, format!("path '{}' after parameters", part)));
                }
                clause.paths.push(part.to_string());
                continue;
            }

            let eq_pos = eq[0].len();
            let key_part = &part[..eq_pos];
            let argument = unquote(header, text, &part[eq_pos + 1..])?;

            if let Some(key) = key_part.strip_suffix(':') {
                let key = key.trim();
                if key.is_empty() {
                    return Err(clause.error(header, "missing directive name"));
                }
                if clause.directive(key).is_some() {
                    return Err(clause.error(header, format!("duplicate directive '{}'", key)));
                }
                clause.directives.push((key.to_string(), argument));
            } else {
                // typed attributes (`key:Version=...`) keep only the key
                let key = key_part.split(':').next().unwrap_or("").trim();
                if key.is_empty() {
                    return Err(clause.error(header, "missing attribute name"));
                }
                if clause.attribute(key).is_some() {
                    return Err(clause.error(header, format!("duplicate attribute '{}'", key)));
                }
                clause.attributes.push((key.to_string(), argument));
            }
        }

        if clause.paths.is_empty() {
            return Err(clause.error(header, "clause has no path"));
        }
        clauses.push(clause);
    }
    Ok(clauses)
}

/// Split a comma separated directive value (`uses:="a,b"`)
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
