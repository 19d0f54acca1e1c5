use crate::lexer::{LexerError, Token, TokenKind, UnitLexer};
use crate::value::{Mapping, Value};
use crate::{ParseError, ParseErrorKind, ParserResult};

struct Parser<'input> {
    input: &'input str,
    lexer: UnitLexer<'input>,
    /// Byte offset of the current token
    pos: usize,
}

impl<'input> Parser<'input> {
    fn new(input: &'input str) -> Self {
        let mut parser = Parser {
            input,
            lexer: UnitLexer::new(input),
            pos: 0,
        };
        parser.skip_trivia();
        parser
    }

    fn token(&self) -> Token {
        self.lexer.token()
    }

    fn kind(&self) -> TokenKind {
        self.token().kind
    }

    fn text(&self) -> &'input str {
        &self.input[self.pos..self.pos + self.token().len]
    }

    fn skip_trivia(&mut self) {
        while self.kind().is_trivia() {
            self.pos += self.token().len;
            self.lexer.advance();
        }
    }

    /// Move past the current token and any trivia after it.
    fn bump(&mut self) {
        self.pos += self.token().len;
        self.lexer.advance();
        self.skip_trivia();
    }

    fn error_at(&self, offset: usize, kind: ParseErrorKind) -> ParseError {
        let before = &self.input[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let column = before[line_start..].chars().count() + 1;
        ParseError { line, column, kind }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        self.error_at(self.pos, kind)
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        match self.kind() {
            TokenKind::EndOfInput => self.error(ParseErrorKind::UnexpectedEndOfInput),
            TokenKind::Error(LexerError::UnterminatedString) => {
                self.error(ParseErrorKind::UnterminatedString)
            }
            TokenKind::Error(LexerError::UnexpectedCharacter) => self.error(
                ParseErrorKind::UnexpectedCharacter(self.text().chars().next().unwrap_or('\0')),
            ),
            TokenKind::Identifier => {
                self.error(ParseErrorKind::UnexpectedIdentifier(self.text().to_string()))
            }
            found => self.error(ParseErrorKind::UnexpectedToken {
                expected,
                found: found.describe(),
            }),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParserResult<()> {
        if self.kind() != kind {
            return Err(self.unexpected(kind.describe()));
        }
        self.bump();
        Ok(())
    }

    fn parse_value(&mut self) -> ParserResult<Value> {
        match self.kind() {
            TokenKind::OpenBrace => self.parse_mapping().map(Value::Mapping),
            TokenKind::OpenBracket => {
                self.bump();
                self.parse_items(TokenKind::CloseBracket).map(Value::Sequence)
            }
            TokenKind::OpenParenthesis => self.parse_parenthesized(),
            TokenKind::QuotedString => self.parse_strings().map(Value::String),
            TokenKind::Integer => {
                let text = self.text();
                let value = text
                    .trim_start_matches('+')
                    .parse::<i64>()
                    .map_err(|_| self.error(ParseErrorKind::IntegerOutOfRange(text.to_string())))?;
                self.bump();
                Ok(Value::Integer(value))
            }
            TokenKind::True => {
                self.bump();
                Ok(Value::Boolean(true))
            }
            TokenKind::False => {
                self.bump();
                Ok(Value::Boolean(false))
            }
            _ => Err(self.unexpected("a value")),
        }
    }

    /// Comma separated values up to `close`, which is consumed. A trailing comma is allowed.
    fn parse_items(&mut self, close: TokenKind) -> ParserResult<Vec<Value>> {
        let mut items = vec![];
        loop {
            if self.kind() == close {
                self.bump();
                return Ok(items);
            }
            items.push(self.parse_value()?);
            match self.kind() {
                TokenKind::Comma => self.bump(),
                k if k == close => {}
                _ => return Err(self.unexpected(close.describe())),
            }
        }
    }

    /// `(x)` is just `x`; `()`, `(x,)` and `(x, y)` are sequences.
    fn parse_parenthesized(&mut self) -> ParserResult<Value> {
        self.expect(TokenKind::OpenParenthesis)?;
        if self.kind() == TokenKind::CloseParenthesis {
            self.bump();
            return Ok(Value::Sequence(vec![]));
        }

        let first = self.parse_value()?;
        match self.kind() {
            TokenKind::CloseParenthesis => {
                self.bump();
                Ok(first)
            }
            TokenKind::Comma => {
                self.bump();
                let mut items = vec![first];
                items.extend(self.parse_items(TokenKind::CloseParenthesis)?);
                Ok(Value::Sequence(items))
            }
            _ => Err(self.unexpected("')'")),
        }
    }

    fn parse_mapping(&mut self) -> ParserResult<Mapping> {
        self.expect(TokenKind::OpenBrace)?;
        let mut map = Mapping::new();
        loop {
            match self.kind() {
                TokenKind::CloseBrace => {
                    self.bump();
                    return Ok(map);
                }
                TokenKind::QuotedString => {}
                TokenKind::Integer | TokenKind::True | TokenKind::False => {
                    return Err(self.error(ParseErrorKind::NonStringKey));
                }
                _ => return Err(self.unexpected("a string key")),
            }

            let key_pos = self.pos;
            let key = self.parse_strings()?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_value()?;
            if map.contains_key(&key) {
                return Err(self.error_at(key_pos, ParseErrorKind::DuplicateKey(key)));
            }
            map.insert(key, value);

            match self.kind() {
                TokenKind::Comma => self.bump(),
                TokenKind::CloseBrace => {}
                _ => return Err(self.unexpected("'}'")),
            }
        }
    }

    /// One or more adjacent string literals, concatenated.
    fn parse_strings(&mut self) -> ParserResult<String> {
        let mut out = String::new();
        while self.kind() == TokenKind::QuotedString {
            decode_string_literal(self.text(), &mut out)
                .map_err(|kind| self.error(kind))?;
            self.bump();
        }
        Ok(out)
    }
}

/// Decode a quoted literal (with its quotes and optional `r` prefix) onto `out`.
fn decode_string_literal(literal: &str, out: &mut String) -> Result<(), ParseErrorKind> {
    let raw = literal.starts_with(['r', 'R']);
    let body = if raw { &literal[1..] } else { literal };
    // Quotes are ASCII, so slicing one byte off each end is safe
    let inner = &body[1..body.len() - 1];

    if raw {
        out.push_str(inner);
        return Ok(());
    }

    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('\n') => {}
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some(kind @ ('x' | 'u')) => {
                let width = if kind == 'x' { 2 } else { 4 };
                let digits: String = chars.by_ref().take(width).collect();
                let decoded = (digits.len() == width)
                    .then(|| u32::from_str_radix(&digits, 16).ok())
                    .flatten()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ParseErrorKind::InvalidEscape(format!("\\{kind}{digits}")))?;
                out.push(decoded);
            }
            // Unknown escapes are kept verbatim
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return Err(ParseErrorKind::InvalidEscape(String::from("\\"))),
        }
    }

    Ok(())
}

/// Parse a complete unit description (or any single value) from text.
pub fn parse_value_from_str(input: &str) -> ParserResult<Value> {
    let mut parser = Parser::new(input);
    let value = parser.parse_value()?;
    if parser.kind() != TokenKind::EndOfInput {
        return Err(parser.error(ParseErrorKind::TrailingInput));
    }
    Ok(value)
}
