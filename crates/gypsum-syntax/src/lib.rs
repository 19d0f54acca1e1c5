use thiserror::Error;

pub mod lexer;
pub mod parser;
pub mod value;

pub use parser::parse_value_from_str;
pub use value::{Mapping, Value};

#[derive(Error, Debug, Eq, PartialEq)]
#[error("{line}:{column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum ParseErrorKind {
    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: &'static str,
    },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid escape sequence {0:?}")]
    InvalidEscape(String),
    #[error("integer {0} does not fit in 64 bits")]
    IntegerOutOfRange(String),
    #[error("key {0:?} appears more than once in the same mapping")]
    DuplicateKey(String),
    #[error("mapping keys must be strings")]
    NonStringKey,
    #[error("unexpected character {0:?}")]
    UnexpectedCharacter(char),
    #[error("unexpected identifier {0:?}")]
    UnexpectedIdentifier(String),
    #[error("unexpected input after the end of the value")]
    TrailingInput,
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,
}

pub type ParserResult<T> = Result<T, ParseError>;
