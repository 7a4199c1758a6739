//! LDAP filters over typed property dictionaries

mod parser;
pub mod properties;

pub use parser::{CompareOp, FilterNode};
pub use properties::{Properties, PropertyValue};

use crate::errors::Result;
use crate::version::Version;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    root: FilterNode,
}

impl Filter {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Filter {
            root: parser::parse(text)?,
        })
    }

    pub fn root(&self) -> &FilterNode {
        &self.root
    }

    pub fn matches(&self, props: &Properties) -> bool {
        eval(&self.root, props)
    }
}

impl FromStr for Filter {
    type Err = crate::errors::FrameworkError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(&self.root, f)
    }
}

fn eval(node: &FilterNode, props: &Properties) -> bool {
    match node {
        FilterNode::And(items) => items.iter().all(|n| eval(n, props)),
        FilterNode::Or(items) => items.iter().any(|n| eval(n, props)),
        FilterNode::Not(inner) => !eval(inner, props),
        FilterNode::Present { attr } => props.contains_key(attr),
        FilterNode::Compare { attr, op, value } => match props.get(attr) {
            Some(prop) => compare(prop, *op, value),
            None => false,
        },
        FilterNode::Substring {
            attr,
            initial,
            any,
            last,
        } => match props.get(attr) {
            Some(prop) => prop
                .string_values()
                .into_iter()
                .any(|s| substring_match(s, initial.as_deref(), any, last.as_deref())),
            None => false,
        },
    }
}

fn compare(prop: &PropertyValue, op: CompareOp, literal: &str) -> bool {
    match prop {
        PropertyValue::String(s) => match op {
            CompareOp::Equal => s == literal,
            CompareOp::Approx => normalize_approx(s) == normalize_approx(literal),
            CompareOp::GreaterEq => s.as_str() >= literal,
            CompareOp::LessEq => s.as_str() <= literal,
        },
        PropertyValue::Long(n) => match literal.trim().parse::<i64>() {
            Ok(other) => ordered(n.cmp(&other), op),
            Err(_) => false,
        },
        PropertyValue::Double(d) => match literal.trim().parse::<f64>() {
            Ok(other) => match d.partial_cmp(&other) {
                Some(ord) => ordered(ord, op),
                None => false,
            },
            Err(_) => false,
        },
        PropertyValue::Bool(b) => match op {
            CompareOp::Equal | CompareOp::Approx => literal.trim().eq_ignore_ascii_case("true") == *b,
            _ => false,
        },
        PropertyValue::Version(v) => match Version::parse(literal) {
            Ok(other) => ordered(v.cmp(&other), op),
            Err(_) => false,
        },
        PropertyValue::List(items) => items.iter().any(|item| compare(item, op, literal)),
    }
}

fn ordered(ord: Ordering, op: CompareOp) -> bool {
    match op {
        CompareOp::Equal | CompareOp::Approx => ord == Ordering::Equal,
        CompareOp::GreaterEq => ord != Ordering::Less,
        CompareOp::LessEq => ord != Ordering::Greater,
    }
}

fn normalize_approx(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn substring_match(s: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = s;
    if let Some(prefix) = initial {
        match rest.strip_prefix(prefix) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for piece in any {
        match rest.find(piece.as_str()) {
            Some(idx) => rest = &rest[idx + piece.len()..],
            None => return false,
        }
    }
    match last {
        Some(suffix) => rest.ends_with(suffix),
        None => true,
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '(' | ')' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn write_node(node: &FilterNode, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match node {
        FilterNode::And(items) | FilterNode::Or(items) => {
            let op = if matches!(node, FilterNode::And(_)) { '&' } else { '|' };
            write!(f, "({}", op)?;
            for item in items {
                write_node(item, f)?;
            }
            write!(f, ")")
        }
        FilterNode::Not(inner) => {
            write!(f, "(!")?;
            write_node(inner, f)?;
            write!(f, ")")
        }
        FilterNode::Present { attr } => write!(f, "({}=*)", attr),
        FilterNode::Compare { attr, op, value } => {
            let op = match op {
                CompareOp::Equal => "=",
                CompareOp::Approx => "~=",
                CompareOp::GreaterEq => ">=",
                CompareOp::LessEq => "<=",
            };
            write!(f, "({}{}{})", attr, op, escape(value))
        }
        FilterNode::Substring {
            attr,
            initial,
            any,
            last,
        } => {
            write!(f, "({}=", attr)?;
            if let Some(i) = initial {
                write!(f, "{}", escape(i))?;
            }
            write!(f, "*")?;
            for piece in any {
                write!(f, "{}*", escape(piece))?;
            }
            if let Some(l) = last {
                write!(f, "{}", escape(l))?;
            }
            write!(f, ")")
        }
    }
}
