use muncher::Muncher;
use phf::phf_map;
use thiserror::Error;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte length of token
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Error(LexerError),

    CloseBrace,
    CloseBracket,
    CloseParenthesis,
    Colon,
    Comma,
    Comment,
    EndOfInput,
    False,
    Identifier,
    Integer,
    Newline,
    OpenBrace,
    OpenBracket,
    OpenParenthesis,
    QuotedString,
    True,
    Whitespace,
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LexerError {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected character")]
    UnexpectedCharacter,
}

impl TokenKind {
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::Newline | TokenKind::Comment
        )
    }

    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Error(_) => "invalid input",
            TokenKind::CloseBrace => "'}'",
            TokenKind::CloseBracket => "']'",
            TokenKind::CloseParenthesis => "')'",
            TokenKind::Colon => "':'",
            TokenKind::Comma => "','",
            TokenKind::Comment => "comment",
            TokenKind::EndOfInput => "end of input",
            TokenKind::False => "False",
            TokenKind::Identifier => "identifier",
            TokenKind::Integer => "integer",
            TokenKind::Newline => "newline",
            TokenKind::OpenBrace => "'{'",
            TokenKind::OpenBracket => "'['",
            TokenKind::OpenParenthesis => "'('",
            TokenKind::QuotedString => "string",
            TokenKind::True => "True",
            TokenKind::Whitespace => "whitespace",
        }
    }
}

static LITERAL_KEYWORDS: phf::Map<&'static str, TokenKind> = phf_map! {
    "True" => TokenKind::True,
    "False" => TokenKind::False,
};

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Next char without consuming it.
#[inline]
fn peek_char(m: &mut Muncher) -> Option<char> {
    let c = m.peek().copied();
    m.reset_peek();
    c
}

/// Eat chars while `f` holds. Returns the byte length eaten.
fn eat_while(m: &mut Muncher, f: impl Fn(char) -> bool) -> usize {
    let mut len = 0;
    while let Some(c) = peek_char(m) {
        if !f(c) {
            break;
        }
        m.eat();
        len += c.len_utf8();
    }
    len
}

#[inline]
fn scan_comment(m: &mut Muncher) -> Token {
    Token {
        kind: TokenKind::Comment,
        len: 1 + eat_while(m, |c| c != '\n'),
    }
}

fn scan_identifier(first_char: char, m: &mut Muncher) -> Token {
    let mut word = String::from(first_char);
    while let Some(c) = peek_char(m) {
        if !is_identifier_char(c) {
            break;
        }
        m.eat();
        word.push(c);
    }

    Token {
        kind: LITERAL_KEYWORDS
            .get(word.as_str())
            .copied()
            .unwrap_or(TokenKind::Identifier),
        len: word.len(),
    }
}

/// Scan the rest of a quoted string whose opening quote (and raw prefix, if any) have been
/// eaten; `prefix_len` is their byte length. The token covers the prefix and both quotes. An
/// unescaped newline ends an unterminated string without being eaten.
fn scan_quoted(m: &mut Muncher, quote_char: char, prefix_len: usize) -> Token {
    let mut len = prefix_len;
    let mut escaped = false;

    while let Some(c) = peek_char(m) {
        if c == '\n' && !escaped {
            break;
        }
        m.eat();
        len += c.len_utf8();

        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == quote_char => {
                return Token {
                    kind: TokenKind::QuotedString,
                    len,
                };
            }
            _ => {}
        }
    }

    Token {
        kind: TokenKind::Error(LexerError::UnterminatedString),
        len,
    }
}

/// Lexer for unit description text. Produces one token at a time; callers read [`Self::token`]
/// and call [`Self::advance`].
pub struct UnitLexer<'input> {
    muncher: Muncher<'input>,
    token: Token,
}

impl<'input> UnitLexer<'input> {
    pub fn new(input: &'input str) -> UnitLexer<'input> {
        let mut ret = UnitLexer {
            muncher: Muncher::new(input),
            token: Token {
                kind: TokenKind::EndOfInput,
                len: 0,
            },
        };
        ret.advance();
        ret
    }

    pub fn token(&self) -> Token {
        self.token
    }

    fn single_char_token(kind: TokenKind, c: char) -> Token {
        Token {
            kind,
            len: c.len_utf8(),
        }
    }

    pub fn advance(&mut self) {
        let m = &mut self.muncher;
        let Some(c) = m.eat() else {
            self.token = Token {
                kind: TokenKind::EndOfInput,
                len: 0,
            };
            return;
        };

        self.token = match c {
            '\n' => Self::single_char_token(TokenKind::Newline, c),
            c if c.is_whitespace() => Token {
                kind: TokenKind::Whitespace,
                len: c.len_utf8() + eat_while(m, |c| c.is_whitespace() && c != '\n'),
            },
            '#' => scan_comment(m),
            '{' => Self::single_char_token(TokenKind::OpenBrace, c),
            '}' => Self::single_char_token(TokenKind::CloseBrace, c),
            '[' => Self::single_char_token(TokenKind::OpenBracket, c),
            ']' => Self::single_char_token(TokenKind::CloseBracket, c),
            '(' => Self::single_char_token(TokenKind::OpenParenthesis, c),
            ')' => Self::single_char_token(TokenKind::CloseParenthesis, c),
            ':' => Self::single_char_token(TokenKind::Colon, c),
            ',' => Self::single_char_token(TokenKind::Comma, c),
            '\'' | '"' => scan_quoted(m, c, 1),
            'r' | 'R' => match peek_char(m) {
                Some(quote @ ('\'' | '"')) => {
                    m.eat();
                    scan_quoted(m, quote, 2)
                }
                _ => scan_identifier(c, m),
            },
            '-' | '+' if peek_char(m).is_some_and(|d| d.is_ascii_digit()) => Token {
                kind: TokenKind::Integer,
                len: 1 + eat_while(m, |c| c.is_ascii_digit()),
            },
            c if c.is_ascii_digit() => Token {
                kind: TokenKind::Integer,
                len: 1 + eat_while(m, |c| c.is_ascii_digit()),
            },
            c if is_identifier_char(c) => scan_identifier(c, m),
            _ => Self::single_char_token(TokenKind::Error(LexerError::UnexpectedCharacter), c),
        };
    }
}

pub fn tokenize(data: &str) -> Vec<Token> {
    let mut lexer = UnitLexer::new(data);

    let mut ret = vec![];

    while lexer.token().kind != TokenKind::EndOfInput {
        ret.push(lexer.token());
        lexer.advance();
    }

    ret
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| !k.is_trivia())
            .collect()
    }

    #[test]
    fn punctuation_and_literals() {
        assert_eq!(
            kinds("{'a': [1, -2, True], # note\n \"b\": r'x\\y'}"),
            vec![
                TokenKind::OpenBrace,
                TokenKind::QuotedString,
                TokenKind::Colon,
                TokenKind::OpenBracket,
                TokenKind::Integer,
                TokenKind::Comma,
                TokenKind::Integer,
                TokenKind::Comma,
                TokenKind::True,
                TokenKind::CloseBracket,
                TokenKind::Comma,
                TokenKind::QuotedString,
                TokenKind::Colon,
                TokenKind::QuotedString,
                TokenKind::CloseBrace,
            ]
        );
    }

    #[test]
    fn token_lengths_cover_input() {
        let input = "{ 'key' : \"v\\\"q\", 'é': r'ü' }\n";
        let total: usize = tokenize(input).iter().map(|t| t.len).sum();
        assert_eq!(total, input.len());
    }

    #[test]
    fn unterminated() {
        assert_eq!(
            kinds("'abc\n"),
            vec![TokenKind::Error(LexerError::UnterminatedString)]
        );
    }

    #[test]
    fn identifiers() {
        assert_eq!(kinds("None"), vec![TokenKind::Identifier]);
        assert_eq!(kinds("False"), vec![TokenKind::False]);
    }
}
