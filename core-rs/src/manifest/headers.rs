//! Raw manifest headers
//!
//! Reads the main section of a `META-INF/MANIFEST.MF` file: `Name: value`
//! lines, where a line starting with a single space continues the previous
//! value. Parsing stops at the first empty line.

use crate::errors::{FrameworkError, Result};
use std::fmt;

/// Path of the manifest inside bundle content
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

const MAX_LINE: usize = 72;

/// Ordered header dictionary with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut headers = Headers::new();
        let mut current: Option<(String, String)> = None;

        for (line_no, raw) in text.split('\n').enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);

            if let Some(cont) = line.strip_prefix(' ') {
                match current.as_mut() {
                    Some((_, value)) => value.push_str(cont),
                    None => {
                        return Err(FrameworkError::Manifest {
                            header: "<manifest>".to_string(),
                            clause: line.to_string(),
                            message: format!("line {}: continuation without a header", line_no + 1),
                        })
                    }
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.insert(&name, &value);
            }

            if line.is_empty() {
                break;
            }

            let (name, value) = line.split_once(':').ok_or_else(|| FrameworkError::Manifest {
                header: "<manifest>".to_string(),
                clause: line.to_string(),
                message: format!("line {}: expected 'Name: value'", line_no + 1),
            })?;

            let valid_name = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid_name {
                return Err(FrameworkError::Manifest {
                    header: name.to_string(),
                    clause: line.to_string(),
                    message: format!("line {}: invalid header name", line_no + 1),
                });
            }

            let value = value.strip_prefix(' ').unwrap_or(value);
            current = Some((name.to_string(), value.to_string()));
        }

        if let Some((name, value)) = current.take() {
            headers.insert(&name, &value);
        }

        Ok(headers)
    }

    /// Insert or replace (case-insensitive) a header
    pub fn insert(&mut self, name: &str, value: &str) {
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as manifest text, wrapping long lines
    pub fn to_manifest_string(&self) -> String {
        let mut out = String::from("Manifest-Version: 1.0\n");
        for (name, value) in &self.entries {
            if name.eq_ignore_ascii_case("Manifest-Version") {
                continue;
            }
            let line = format!("{}: {}", name, value);
            let mut width = 0;
            for c in line.chars() {
                if width + c.len_utf8() > MAX_LINE {
                    out.push_str("\n ");
                    width = 1;
                }
                out.push(c);
                width += c.len_utf8();
            }
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k.as_ref(), v.as_ref());
        }
        headers
    }
}
