use std::fmt::{self, Display, Formatter, Write};

use derive_more::From;
use indexmap::IndexMap;

/// A keyed mapping of declaration values. Keys keep their insertion order so that output is
/// deterministic, but equality between two mappings does not depend on it.
pub type Mapping = IndexMap<String, Value>;

/// One node of a parsed unit description.
#[derive(Clone, Debug, PartialEq, Eq, From)]
pub enum Value {
    String(String),
    Integer(i64),
    Boolean(bool),
    Sequence(Vec<Value>),
    Mapping(Mapping),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Vec<&str>> for Value {
    fn from(value: Vec<&str>) -> Self {
        Value::Sequence(value.into_iter().map(Value::from).collect())
    }
}

impl Value {
    /// Human readable name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::String(_) | Value::Integer(_) | Value::Boolean(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Textual rendering of a scalar, as used when a value is substituted into a string.
    /// Sequences and mappings have no textual form and yield `None`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Boolean(true) => Some(String::from("True")),
            Value::Boolean(false) => Some(String::from("False")),
            Value::Sequence(_) | Value::Mapping(_) => None,
        }
    }

    /// Truthiness: empty strings, zero, `False` and empty containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(s) => !s.is_empty(),
            Value::Integer(i) => *i != 0,
            Value::Boolean(b) => *b,
            Value::Sequence(s) => !s.is_empty(),
            Value::Mapping(m) => !m.is_empty(),
        }
    }
}

fn write_quoted(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('\'')?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            _ => f.write_char(c)?,
        }
    }
    f.write_char('\'')
}

/// Renders the value back in unit syntax, so that the output can be parsed again.
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write_quoted(f, s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Boolean(b) => f.write_str(if *b { "True" } else { "False" }),
            Value::Sequence(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char(']')
            }
            Value::Mapping(map) => {
                f.write_char('{')?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, key)?;
                    write!(f, ": {value}")?;
                }
                f.write_char('}')
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::parse_value_from_str;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_parses_back() {
        let mut map = Mapping::new();
        map.insert("name".into(), Value::from("it's"));
        map.insert("list".into(), Value::from(vec!["a", "b\\c"]));
        map.insert("n".into(), Value::Integer(-3));
        map.insert("flag".into(), Value::Boolean(true));
        let value = Value::Mapping(map);

        let rendered = value.to_string();
        assert_eq!(parse_value_from_str(&rendered).unwrap(), value);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(!Value::Sequence(vec![]).is_truthy());
    }

    #[test]
    fn mapping_equality_ignores_order() {
        let mut a = Mapping::new();
        a.insert("x".into(), Value::Integer(1));
        a.insert("y".into(), Value::Integer(2));
        let mut b = Mapping::new();
        b.insert("y".into(), Value::Integer(2));
        b.insert("x".into(), Value::Integer(1));
        assert_eq!(Value::Mapping(a), Value::Mapping(b));
    }
}
