//! Parsing of override addresses.
//!
//! Supported forms: `$`, `.name`, `['name']`, `[N]`, `[*]`, `.*`, and
//! equality filters `[?(@.a.b == literal)]` / `!=`, where the literal is a
//! quoted string, a number, `true`, `false`, or `null`.

use std::{fmt, str::FromStr};

use serde_json::Value;

use super::OverrideError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
    Filter(Filter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparison {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Filter {
    pub field: Vec<String>,
    pub comparison: Comparison,
    pub literal: Value,
}

impl Filter {
    /// A candidate without the field never matches, whichever the operator.
    pub fn matches(&self, candidate: &Value) -> bool {
        let Some(actual) = self
            .field
            .iter()
            .try_fold(candidate, |node, key| node.get(key.as_str()))
        else {
            return false;
        };
        let equal = literal_eq(actual, &self.literal);
        match self.comparison {
            Comparison::Eq => equal,
            Comparison::Ne => !equal,
        }
    }
}

fn literal_eq(actual: &Value, literal: &Value) -> bool {
    match (actual, literal) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == literal,
    }
}

/// A parsed location expression over a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    raw: String,
    pub(crate) segments: Vec<Segment>,
}

impl Address {
    pub fn parse(raw: &str) -> Result<Self, OverrideError> {
        Parser::new(raw).parse()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True for `$`, which addresses the whole document.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromStr for Address {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

struct Parser<'a> {
    raw: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(raw: &'a str) -> Self {
        Self { raw, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> OverrideError {
        OverrideError::Parse {
            address: self.raw.to_string(),
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.raw[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), OverrideError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse(mut self) -> Result<Address, OverrideError> {
        let raw = self.raw.trim();
        self.raw = raw;
        self.expect('$')?;

        let mut segments = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.bump();
                    if self.peek() == Some('.') {
                        return Err(self.error("recursive descent is not supported"));
                    }
                    if self.eat('*') {
                        segments.push(Segment::Wildcard);
                    } else {
                        segments.push(Segment::Key(self.name()?));
                    }
                }
                '[' => {
                    self.bump();
                    segments.push(self.bracket()?);
                }
                other => {
                    return Err(self.error(format!("unexpected character '{other}'")));
                }
            }
        }

        Ok(Address {
            raw: raw.to_string(),
            segments,
        })
    }

    fn name(&mut self) -> Result<String, OverrideError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '.' | '[' | ']' | '(' | ')' | '=' | '!') || c.is_whitespace() {
                break;
            }
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected a member name"));
        }
        Ok(self.raw[start..self.pos].to_string())
    }

    fn bracket(&mut self) -> Result<Segment, OverrideError> {
        self.skip_whitespace();
        let segment = match self.peek() {
            Some('*') => {
                self.bump();
                Segment::Wildcard
            }
            Some('\'' | '"') => Segment::Key(self.quoted()?),
            Some(c) if c.is_ascii_digit() => Segment::Index(self.index()?),
            Some('?') => {
                self.bump();
                Segment::Filter(self.filter()?)
            }
            Some('-') => return Err(self.error("negative indices are not supported")),
            _ => return Err(self.error("expected '*', a quoted name, an index, or a filter")),
        };
        self.skip_whitespace();
        self.expect(']')?;
        Ok(segment)
    }

    fn quoted(&mut self) -> Result<String, OverrideError> {
        let Some(quote) = self.bump() else {
            return Err(self.error("expected a quote"));
        };
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => match self.bump() {
                    Some(escaped) => text.push(escaped),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(text),
                Some(c) => text.push(c),
            }
        }
    }

    fn index(&mut self) -> Result<usize, OverrideError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        self.raw[start..self.pos]
            .parse()
            .map_err(|_| self.error("index out of range"))
    }

    fn filter(&mut self) -> Result<Filter, OverrideError> {
        self.expect('(')?;
        self.skip_whitespace();
        self.expect('@')?;

        let mut field = Vec::new();
        while self.eat('.') {
            field.push(self.name()?);
        }
        if field.is_empty() {
            return Err(self.error("filter must name a field of '@'"));
        }

        self.skip_whitespace();
        let comparison = if self.raw[self.pos..].starts_with("==") {
            Comparison::Eq
        } else if self.raw[self.pos..].starts_with("!=") {
            Comparison::Ne
        } else {
            return Err(self.error("expected '==' or '!='"));
        };
        self.pos += 2;
        self.skip_whitespace();

        let literal = self.literal()?;
        self.skip_whitespace();
        self.expect(')')?;

        Ok(Filter {
            field,
            comparison,
            literal,
        })
    }

    fn literal(&mut self) -> Result<Value, OverrideError> {
        if matches!(self.peek(), Some('\'' | '"')) {
            return Ok(Value::String(self.quoted()?));
        }

        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !c.is_whitespace() && c != ')')
        {
            self.bump();
        }
        let token = &self.raw[start..self.pos];
        match token {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" => Ok(Value::Null),
            _ => serde_json::from_str::<serde_json::Number>(token)
                .map(Value::Number)
                .map_err(|_| self.error(format!("invalid literal '{token}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn segments(raw: &str) -> Vec<Segment> {
        Address::parse(raw).expect("valid address").segments
    }

    #[test]
    fn parses_member_index_and_wildcard_forms() {
        assert!(Address::parse("$").expect("root").is_root());
        assert_eq!(
            segments("$.nodes[2]['display name'].*"),
            vec![
                Segment::Key("nodes".into()),
                Segment::Index(2),
                Segment::Key("display name".into()),
                Segment::Wildcard,
            ]
        );
        assert_eq!(segments("$.a[*]"), vec![Segment::Key("a".into()), Segment::Wildcard]);
    }

    #[test]
    fn parses_filters_with_each_literal_kind() {
        let cases = [
            ("$.n[?(@.label == 'Country')]", json!("Country"), Comparison::Eq),
            ("$.n[?(@.meta.rank != 3)]", json!(3), Comparison::Ne),
            ("$.n[?(@.enabled == true)]", json!(true), Comparison::Eq),
            ("$.n[?( @.x == \"q\" )]", json!("q"), Comparison::Eq),
        ];
        for (raw, literal, comparison) in cases {
            let segs = segments(raw);
            let Segment::Filter(filter) = &segs[1] else {
                panic!("expected filter in {raw}");
            };
            assert_eq!(filter.literal, literal, "{raw}");
            assert_eq!(filter.comparison, comparison, "{raw}");
        }
    }

    #[test]
    fn reports_position_of_syntax_errors() {
        let err = Address::parse("$.a[?(@.b = 1)]").expect_err("single '='");
        let OverrideError::Parse { position, .. } = err;
        assert_eq!(position, 10);

        for bad in ["a.b", "$.a[", "$..a", "$.a['x]", "$.a[-1]", "$.", "$[?(@ == 1)]"] {
            assert!(Address::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn filter_compares_numbers_by_value() {
        let filter = Filter {
            field: vec!["n".into()],
            comparison: Comparison::Eq,
            literal: json!(3),
        };
        assert!(filter.matches(&json!({"n": 3.0})));
        assert!(!filter.matches(&json!({"m": 3})));
    }
}
