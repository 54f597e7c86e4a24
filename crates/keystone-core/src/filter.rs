// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! LDAP-style service filters.
//!
//! Filters select services, resources and bundles by their properties, using
//! the usual prefix syntax: `(&(objectClass=Store)(|(region=eu)(!(tier=*))))`.
//! Supported operators are `=`, `~=`, `>=`, `<=`, presence (`attr=*`) and
//! substrings (`attr=pre*mid*post`).

use crate::error::FilterError;
use crate::properties::{Properties, PropertyValue, OBJECT_CLASS};
use std::fmt;
use std::str::FromStr;

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every sub-filter must match.
    And(Vec<Filter>),
    /// At least one sub-filter must match.
    Or(Vec<Filter>),
    /// The sub-filter must not match.
    Not(Box<Filter>),
    /// `attr=value`
    Equal {
        /// Attribute name.
        attr: String,
        /// Expected value.
        value: String,
    },
    /// `attr~=value`: case and whitespace insensitive equality.
    Approx {
        /// Attribute name.
        attr: String,
        /// Expected value.
        value: String,
    },
    /// `attr>=value`
    GreaterOrEqual {
        /// Attribute name.
        attr: String,
        /// Lower bound.
        value: String,
    },
    /// `attr<=value`
    LessOrEqual {
        /// Attribute name.
        attr: String,
        /// Upper bound.
        value: String,
    },
    /// `attr=*`
    Present {
        /// Attribute name.
        attr: String,
    },
    /// `attr=a*b*c`; `parts` are the literal pieces between the stars.
    Substring {
        /// Attribute name.
        attr: String,
        /// Literal pieces; the first and last are empty for leading and trailing stars.
        parts: Vec<String>,
    },
}

impl Filter {
    /// A filter selecting services registered under `name`.
    pub fn object_class(name: &str) -> Filter {
        Filter::Equal {
            attr: OBJECT_CLASS.to_string(),
            value: name.to_string(),
        }
    }

    /// Conjunction of the given filters, collapsing the single-element case.
    pub fn all(mut filters: Vec<Filter>) -> Filter {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::And(filters)
        }
    }

    /// Evaluates this filter against a property set.
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(props)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(props)),
            Filter::Not(filter) => !filter.matches(props),
            Filter::Present { attr } => props.contains_key(attr),
            Filter::Equal { attr, value } => props
                .get(attr)
                .is_some_and(|pv| compare(pv, value, |o| o.is_eq())),
            Filter::GreaterOrEqual { attr, value } => props
                .get(attr)
                .is_some_and(|pv| compare(pv, value, |o| o.is_ge())),
            Filter::LessOrEqual { attr, value } => props
                .get(attr)
                .is_some_and(|pv| compare(pv, value, |o| o.is_le())),
            Filter::Approx { attr, value } => {
                let expected = normalize(value);
                props
                    .get(attr)
                    .is_some_and(|pv| pv.to_strings().iter().any(|s| normalize(s) == expected))
            }
            Filter::Substring { attr, parts } => props
                .get(attr)
                .is_some_and(|pv| pv.to_strings().iter().any(|s| substring_match(s, parts))),
        }
    }
}

fn compare(
    actual: &PropertyValue,
    expected: &str,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let expected_trimmed = expected.trim();
    match actual {
        PropertyValue::Int(i) => expected_trimmed
            .parse::<i64>()
            .is_ok_and(|e| accept(i.cmp(&e))),
        PropertyValue::Float(x) => expected_trimmed
            .parse::<f64>()
            .ok()
            .and_then(|e| x.partial_cmp(&e))
            .is_some_and(&accept),
        PropertyValue::Bool(b) => {
            accept(std::cmp::Ordering::Equal) && expected_trimmed.eq_ignore_ascii_case(&b.to_string())
        }
        PropertyValue::Str(s) => accept(s.as_str().cmp(expected)),
        PropertyValue::List(items) => items.iter().any(|s| accept(s.as_str().cmp(expected))),
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring_match(value: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for piece in middle {
        match remaining.find(piece.as_str()) {
            Some(index) => remaining = &remaining[index + piece.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser {
            chars: s.chars().collect(),
            pos: 0,
        };
        let filter = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(FilterError::new(parser.pos, "trailing characters"));
        }
        Ok(filter)
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(FilterError::new(
                self.pos,
                format!("expected '{expected}', found '{c}'"),
            )),
            None => Err(FilterError::new(
                self.pos,
                format!("expected '{expected}', found end of input"),
            )),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            _ => self.parse_item()?,
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut filters = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() != Some('(') {
                break;
            }
            filters.push(self.parse_filter()?);
        }
        if filters.is_empty() {
            return Err(FilterError::new(self.pos, "empty filter list"));
        }
        Ok(filters)
    }

    fn parse_item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect();
        let attr = attr.trim().to_string();
        if attr.is_empty() {
            return Err(FilterError::new(start, "missing attribute name"));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('~' | '<' | '>')) => {
                self.pos += 1;
                if self.peek() != Some('=') {
                    return Err(FilterError::new(self.pos, format!("expected '=' after '{c}'")));
                }
                self.pos += 1;
                c
            }
            _ => return Err(FilterError::new(self.pos, "missing operator")),
        };

        let parts = self.parse_value()?;
        match op {
            '=' if parts.len() == 2 && parts.iter().all(String::is_empty) => {
                Ok(Filter::Present { attr })
            }
            '=' if parts.len() > 1 => Ok(Filter::Substring { attr, parts }),
            _ => {
                if parts.len() > 1 {
                    return Err(FilterError::new(
                        self.pos,
                        "wildcards are only allowed with '='",
                    ));
                }
                let value = parts.into_iter().next().unwrap_or_default();
                Ok(match op {
                    '=' => Filter::Equal { attr, value },
                    '~' => Filter::Approx { attr, value },
                    '>' => Filter::GreaterOrEqual { attr, value },
                    _ => Filter::LessOrEqual { attr, value },
                })
            }
        }
    }

    /// Reads a value up to the closing parenthesis, split at unescaped stars.
    fn parse_value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(FilterError::new(self.pos, "unterminated value")),
                Some(')') => break,
                Some('(') => return Err(FilterError::new(self.pos, "unescaped '('")),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self
                        .peek()
                        .ok_or_else(|| FilterError::new(self.pos, "dangling escape"))?;
                    if let Some(current) = parts.last_mut() {
                        current.push(escaped);
                    }
                    self.pos += 1;
                }
                Some('*') => {
                    parts.push(String::new());
                    self.pos += 1;
                }
                Some(c) => {
                    if let Some(current) = parts.last_mut() {
                        current.push(c);
                    }
                    self.pos += 1;
                }
            }
        }
        Ok(parts)
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                let op = if matches!(self, Filter::And(_)) { '&' } else { '|' };
                write!(f, "({op}")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Not(filter) => write!(f, "(!{filter})"),
            Filter::Equal { attr, value } => write!(f, "({attr}={})", escape(value)),
            Filter::Approx { attr, value } => write!(f, "({attr}~={})", escape(value)),
            Filter::GreaterOrEqual { attr, value } => write!(f, "({attr}>={})", escape(value)),
            Filter::LessOrEqual { attr, value } => write!(f, "({attr}<={})", escape(value)),
            Filter::Present { attr } => write!(f, "({attr}=*)"),
            Filter::Substring { attr, parts } => {
                let pieces: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                write!(f, "({attr}={})", pieces.join("*"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Properties {
        Properties::new()
            .with(OBJECT_CLASS, vec!["Store", "Cache"])
            .with("region", "eu-west")
            .with("service.ranking", 5)
            .with("enabled", true)
    }

    fn parse(s: &str) -> Filter {
        s.parse().unwrap()
    }

    #[test]
    fn test_equality_against_list_values() {
        assert!(parse("(objectClass=Cache)").matches(&props()));
        assert!(!parse("(objectClass=Queue)").matches(&props()));
    }

    #[test]
    fn test_composite_filters() {
        let f = parse("(&(objectClass=Store)(|(region=us)(service.ranking>=3))(!(missing=*)))");
        assert!(f.matches(&props()));
        let f = parse("(&(objectClass=Store)(service.ranking<=4))");
        assert!(!f.matches(&props()));
    }

    #[test]
    fn test_presence_and_substring() {
        assert!(parse("(region=*)").matches(&props()));
        assert!(parse("(region=eu*)").matches(&props()));
        assert!(parse("(region=*west)").matches(&props()));
        assert!(parse("(region=e*-*t)").matches(&props()));
        assert!(!parse("(region=*east)").matches(&props()));
    }

    #[test]
    fn test_numeric_comparison_is_not_lexicographic() {
        let p = Properties::new().with("service.ranking", 10);
        assert!(parse("(service.ranking>=9)").matches(&p));
        assert!(!parse("(service.ranking<=9)").matches(&p));
    }

    #[test]
    fn test_approx_and_bool() {
        assert!(parse("(region~=EU-WEST)").matches(&props()));
        assert!(parse("(enabled=TRUE)").matches(&props()));
    }

    #[test]
    fn test_escaped_values_round_trip_through_display() {
        let f = parse(r"(name=a\*b\(c\))");
        assert_eq!(
            f,
            Filter::Equal {
                attr: "name".into(),
                value: "a*b(c)".into()
            }
        );
        assert_eq!(f.to_string(), r"(name=a\*b\(c\))");
    }

    #[test]
    fn test_parse_errors() {
        assert!("objectClass=Store".parse::<Filter>().is_err());
        assert!("(&)".parse::<Filter>().is_err());
        assert!("(=x)".parse::<Filter>().is_err());
        assert!("(a>x)".parse::<Filter>().is_err());
        assert!("(a=b))".parse::<Filter>().is_err());
    }
}
