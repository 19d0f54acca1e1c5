//! POSIX shell quoting and word splitting.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static NEEDS_QUOTING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\t\n #$%&'()*;<=>?\[{|}~]|^$"#).unwrap());

static NEEDS_ESCAPE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(["\\`])"#).unwrap());

#[derive(Error, Debug, Eq, PartialEq)]
pub enum ShellSplitError {
    #[error("no closing quotation in {0:?}")]
    UnterminatedQuote(String),
    #[error("no escaped character at end of {0:?}")]
    TrailingBackslash(String),
}

/// Encode a single argument so a POSIX shell reads it back as one word.
///
/// Arguments containing shell metacharacters are wrapped in double quotes. `$` is deliberately
/// left unescaped inside the quotes so that variable references still expand.
pub fn encode_posix_shell_argument(argument: &str) -> String {
    let quote = if NEEDS_QUOTING_REGEX.is_match(argument) {
        "\""
    } else {
        ""
    };

    let escaped = NEEDS_ESCAPE_REGEX.replace_all(argument, r"\$1");
    format!("{quote}{escaped}{quote}")
}

pub fn encode_posix_shell_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| encode_posix_shell_argument(item.as_ref()))
        .join(" ")
}

/// Split `input` into words the way a POSIX shell would, without any expansion.
pub fn split_posix_shell_words(input: &str) -> Result<Vec<String>, ShellSplitError> {
    #[derive(PartialEq)]
    enum State {
        Between,
        Word,
        Single,
        Double,
    }

    let mut words = vec![];
    let mut current = String::new();
    let mut state = State::Between;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Between | State::Word => match c {
                c if c.is_whitespace() => {
                    if state == State::Word {
                        words.push(std::mem::take(&mut current));
                        state = State::Between;
                    }
                }
                '\'' => state = State::Single,
                '"' => state = State::Double,
                '\\' => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| ShellSplitError::TrailingBackslash(input.to_string()))?;
                    current.push(escaped);
                    state = State::Word;
                }
                _ => {
                    current.push(c);
                    state = State::Word;
                }
            },
            State::Single => match c {
                '\'' => state = State::Word,
                _ => current.push(c),
            },
            State::Double => match c {
                '"' => state = State::Word,
                '\\' => match chars.next() {
                    Some(escaped @ ('\\' | '"' | '$' | '`')) => current.push(escaped),
                    Some(other) => {
                        current.push('\\');
                        current.push(other);
                    }
                    None => return Err(ShellSplitError::UnterminatedQuote(input.to_string())),
                },
                _ => current.push(c),
            },
        }
    }

    match state {
        State::Single | State::Double => Err(ShellSplitError::UnterminatedQuote(input.to_string())),
        State::Word => {
            words.push(current);
            Ok(words)
        }
        State::Between => Ok(words),
    }
}
