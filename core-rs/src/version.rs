//! Bundle and package versions
//!
//! Versions are `major.minor.micro[.qualifier]`; missing numeric parts
//! default to zero. Ranges use interval notation (`[1.0,2.0)`) or a bare
//! version meaning "at least".

use crate::errors::{FrameworkError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

static QUALIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]*$").expect("static pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: String,
}

impl Version {
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Version {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// `0.0.0`, the default when no version is declared
    pub const fn empty() -> Self {
        Version::new(0, 0, 0)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Version::empty());
        }

        let mut parts = text.splitn(4, '.');
        let mut numbers = [0u32; 3];
        for (i, slot) in numbers.iter_mut().enumerate() {
            match parts.next() {
                Some(part) => {
                    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(FrameworkError::InvalidVersion(format!(
                            "\"{}\": component {} is not a non-negative integer",
                            text,
                            i + 1
                        )));
                    }
                    *slot = part.parse().map_err(|_| {
                        FrameworkError::InvalidVersion(format!("\"{}\": component {} out of range", text, i + 1))
                    })?;
                }
                None => break,
            }
        }

        let qualifier = parts.next().unwrap_or("").to_string();
        if !QUALIFIER.is_match(&qualifier) {
            return Err(FrameworkError::InvalidVersion(format!(
                "\"{}\": invalid qualifier \"{}\"",
                text, qualifier
            )));
        }

        Ok(Version {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier,
        })
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::empty()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.micro.cmp(&other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = FrameworkError;

    fn try_from(value: String) -> Result<Self> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

/// Interval of versions with inclusive/exclusive bounds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub floor: Version,
    pub floor_inclusive: bool,
    /// `None` means unbounded
    pub ceiling: Option<Version>,
    pub ceiling_inclusive: bool,
}

impl VersionRange {
    /// `[0.0.0, infinity)`
    pub fn any() -> Self {
        VersionRange::at_least(Version::empty())
    }

    pub fn at_least(floor: Version) -> Self {
        VersionRange {
            floor,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// `[v, v]`
    pub fn exactly(v: Version) -> Self {
        VersionRange {
            floor: v.clone(),
            floor_inclusive: true,
            ceiling: Some(v),
            ceiling_inclusive: true,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let first = match text.chars().next() {
            Some(c) => c,
            None => return Ok(VersionRange::any()),
        };

        if first != '[' && first != '(' {
            return Ok(VersionRange::at_least(Version::parse(text)?));
        }

        let last = text.chars().last().unwrap_or(first);
        if text.len() < 2 || (last != ']' && last != ')') {
            return Err(FrameworkError::InvalidVersion(format!(
                "\"{}\": range must end with ']' or ')'",
                text
            )));
        }

        let body = &text[1..text.len() - 1];
        let (floor, ceiling) = body.split_once(',').ok_or_else(|| {
            FrameworkError::InvalidVersion(format!("\"{}\": range needs floor and ceiling", text))
        })?;
        if ceiling.contains(',') {
            return Err(FrameworkError::InvalidVersion(format!(
                "\"{}\": too many range components",
                text
            )));
        }

        let range = VersionRange {
            floor: Version::parse(floor)?,
            floor_inclusive: first == '[',
            ceiling: Some(Version::parse(ceiling)?),
            ceiling_inclusive: last == ']',
        };

        if range.is_empty() {
            return Err(FrameworkError::InvalidVersion(format!("\"{}\": empty range", text)));
        }
        Ok(range)
    }

    pub fn includes(&self, v: &Version) -> bool {
        let above_floor = if self.floor_inclusive {
            *v >= self.floor
        } else {
            *v > self.floor
        };
        if !above_floor {
            return false;
        }
        match &self.ceiling {
            None => true,
            Some(c) if self.ceiling_inclusive => v <= c,
            Some(c) => v < c,
        }
    }

    fn is_empty(&self) -> bool {
        match &self.ceiling {
            None => false,
            Some(c) => match self.floor.cmp(c) {
                Ordering::Greater => true,
                Ordering::Equal => !(self.floor_inclusive && self.ceiling_inclusive),
                Ordering::Less => false,
            },
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        VersionRange::any()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None => write!(f, "{}", self.floor),
            Some(c) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                c,
                if self.ceiling_inclusive { ']' } else { ')' }
            ),
        }
    }
}

impl FromStr for VersionRange {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        VersionRange::parse(s)
    }
}
