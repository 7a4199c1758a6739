//! LDAP-style filter parsing
//!
//! Grammar (RFC 1960 as used by OSGi):
//!
//! ```text
//! filter     ::= '(' filtercomp ')'
//! filtercomp ::= '&' filter+ | '|' filter+ | '!' filter | item
//! item       ::= attr ( '=' | '~=' | '>=' | '<=' ) value
//! ```
//!
//! `attr=*` is a presence test and unescaped `*` in an `=` value makes a
//! substring match. `\` escapes the next character.

use crate::errors::{FrameworkError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Compare {
        attr: String,
        op: CompareOp,
        value: String,
    },
    Present {
        attr: String,
    },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

pub(crate) fn parse(text: &str) -> Result<FilterNode> {
    let mut parser = Parser {
        text,
        chars: text.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    let node = parser.parse_filter()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected characters after filter"));
    }
    Ok(node)
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

/// One value character, remembering whether it was escaped
#[derive(Clone, Copy)]
struct ValueChar {
    c: char,
    escaped: bool,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> FrameworkError {
        let rest: String = self.chars.iter().skip(self.pos).take(16).collect();
        let near = if rest.is_empty() {
            "end of filter".to_string()
        } else {
            format!("\"{}\"", rest)
        };
        FrameworkError::InvalidSyntax {
            filter: self.text.to_string(),
            position: self.pos,
            message: format!("{} near {}", message, near),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected)))
        }
    }

    fn parse_filter(&mut self) -> Result<FilterNode> {
        self.expect('(')?;
        self.skip_ws();
        let node = match self.peek() {
            Some('&') => {
                self.pos += 1;
                FilterNode::And(self.parse_list('&')?)
            }
            Some('|') => {
                self.pos += 1;
                FilterNode::Or(self.parse_list('|')?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_ws();
                FilterNode::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unterminated filter")),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(node)
    }

    fn parse_list(&mut self, op: char) -> Result<Vec<FilterNode>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('(') {
                break;
            }
            nodes.push(self.parse_filter()?);
        }
        if nodes.is_empty() {
            return Err(self.error(&format!("missing operand for '{}'", op)));
        }
        Ok(nodes)
    }

    fn parse_item(&mut self) -> Result<FilterNode> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect::<String>().trim().to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                CompareOp::Equal
            }
            Some(c @ ('~' | '>' | '<')) => {
                self.pos += 1;
                if self.peek() != Some('=') {
                    self.pos -= 1;
                    return Err(self.error(&format!("unknown operator '{}'", c)));
                }
                self.pos += 1;
                match c {
                    '~' => CompareOp::Approx,
                    '>' => CompareOp::GreaterEq,
                    _ => CompareOp::LessEq,
                }
            }
            _ => return Err(self.error("missing operator")),
        };

        let value = self.parse_value()?;

        if op != CompareOp::Equal {
            return Ok(FilterNode::Compare {
                attr,
                op,
                value: value.iter().map(|vc| vc.c).collect(),
            });
        }

        let has_wildcard = value.iter().any(|vc| vc.c == '*' && !vc.escaped);
        if !has_wildcard {
            return Ok(FilterNode::Compare {
                attr,
                op,
                value: value.iter().map(|vc| vc.c).collect(),
            });
        }
        if value.len() == 1 {
            return Ok(FilterNode::Present { attr });
        }

        let mut pieces: Vec<String> = vec![String::new()];
        for vc in &value {
            if vc.c == '*' && !vc.escaped {
                pieces.push(String::new());
            } else if let Some(last) = pieces.last_mut() {
                last.push(vc.c);
            }
        }
        let last = pieces.pop().filter(|s| !s.is_empty());
        let mut iter = pieces.into_iter();
        let initial = iter.next().filter(|s| !s.is_empty());
        let any = iter.filter(|s| !s.is_empty()).collect();

        Ok(FilterNode::Substring {
            attr,
            initial,
            any,
            last,
        })
    }

    fn parse_value(&mut self) -> Result<Vec<ValueChar>> {
        let mut value = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('\\') => {
                    self.pos += 1;
                    let c = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    value.push(ValueChar { c, escaped: true });
                    self.pos += 1;
                }
                Some(c) => {
                    value.push(ValueChar { c, escaped: false });
                    self.pos += 1;
                }
            }
        }
        Ok(value)
    }
}
