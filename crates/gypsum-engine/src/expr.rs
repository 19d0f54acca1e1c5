//! The boolean expression language used by `conditions` and `target_conditions`.
//!
//! ```text
//! expr       := or
//! or         := and ('or' and)*
//! and        := not ('and' not)*
//! not        := 'not' not | comparison
//! comparison := primary (op primary)*
//! op         := '==' | '!=' | '<' | '<=' | '>' | '>=' | 'in' | 'not' 'in'
//! primary    := STRING | INTEGER | 'True' | 'False' | NAME
//!             | '(' expr ')' | '(' [expr (',' expr)*] [','] ')'
//!             | '[' [expr (',' expr)*] [','] ']'
//! ```
//!
//! Comparisons chain: `a < b < c` means `a < b and b < c`. Names are looked up in the variable
//! scope. Nothing else is accepted.

use std::cmp::Ordering;

use phf::phf_map;
use tracing::trace;

use gypsum_syntax::Value;

use crate::errors::{EngineError, EngineResult};
use crate::scope::VariableScope;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExprToken {
    String(String),
    Integer(i64),
    Name(String),
    And,
    Or,
    Not,
    In,
    True,
    False,
    Op(CompareOp),
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

static KEYWORDS: phf::Map<&'static str, ExprToken> = phf_map! {
    "and" => ExprToken::And,
    "or" => ExprToken::Or,
    "not" => ExprToken::Not,
    "in" => ExprToken::In,
    "True" => ExprToken::True,
    "False" => ExprToken::False,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
}

fn syntax_error(expression: &str, position: usize, message: impl Into<String>) -> anyhow::Error {
    EngineError::ConditionSyntax {
        expression: expression.to_string(),
        position,
        message: message.into(),
    }
    .into()
}

/// Split `text` into tokens, each paired with its byte offset.
fn tokenize(text: &str) -> EngineResult<Vec<(usize, ExprToken)>> {
    let mut tokens = vec![];
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' | ')' | '[' | ']' | ',' => {
                chars.next();
                match c {
                    '(' => ExprToken::OpenParen,
                    ')' => ExprToken::CloseParen,
                    '[' => ExprToken::OpenBracket,
                    ']' => ExprToken::CloseBracket,
                    _ => ExprToken::Comma,
                }
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.next_if(|&(_, c)| c == '=').is_some();
                let op = match (c, followed_by_eq) {
                    ('=', true) => CompareOp::Eq,
                    ('!', true) => CompareOp::Ne,
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    ('>', true) => CompareOp::Ge,
                    _ => return Err(syntax_error(text, start, format!("unexpected {c:?}"))),
                };
                ExprToken::Op(op)
            }
            '\'' | '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(syntax_error(text, start, "unterminated string"));
                }
                // Adjacent literals concatenate
                if let Some((_, ExprToken::String(previous))) = tokens.last_mut() {
                    previous.push_str(&value);
                    continue;
                }
                ExprToken::String(value)
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut literal = String::new();
                while let Some((_, d)) =
                    chars.next_if(|&(i, d)| d.is_ascii_digit() || (i == start && d == '-'))
                {
                    literal.push(d);
                }
                let value = literal
                    .parse::<i64>()
                    .map_err(|_| syntax_error(text, start, format!("invalid integer {literal:?}")))?;
                ExprToken::Integer(value)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some((_, d)) = chars.next_if(|&(_, d)| d.is_alphanumeric() || d == '_') {
                    word.push(d);
                }
                KEYWORDS
                    .get(word.as_str())
                    .cloned()
                    .unwrap_or(ExprToken::Name(word))
            }
            other => return Err(syntax_error(text, start, format!("unexpected {other:?}"))),
        };
        tokens.push((start, token));
    }

    tokens.push((text.len(), ExprToken::End));
    Ok(tokens)
}

struct ExprParser<'a> {
    text: &'a str,
    tokens: Vec<(usize, ExprToken)>,
    pos: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> &ExprToken {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn peek_second(&self) -> &ExprToken {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn next(&mut self) -> ExprToken {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> anyhow::Error {
        syntax_error(self.text, self.offset(), message)
    }

    fn expect(&mut self, token: ExprToken) -> EngineResult<()> {
        if *self.peek() != token {
            return Err(self.error(format!("expected {token:?}, found {:?}", self.peek())));
        }
        self.pos += 1;
        Ok(())
    }

    fn parse_or(&mut self) -> EngineResult<Expr> {
        let mut operands = vec![self.parse_and()?];
        while *self.peek() == ExprToken::Or {
            self.pos += 1;
            operands.push(self.parse_and()?);
        }
        Ok(match operands.len() {
            1 => operands.remove(0),
            _ => Expr::Or(operands),
        })
    }

    fn parse_and(&mut self) -> EngineResult<Expr> {
        let mut operands = vec![self.parse_not()?];
        while *self.peek() == ExprToken::And {
            self.pos += 1;
            operands.push(self.parse_not()?);
        }
        Ok(match operands.len() {
            1 => operands.remove(0),
            _ => Expr::And(operands),
        })
    }

    fn parse_not(&mut self) -> EngineResult<Expr> {
        if *self.peek() == ExprToken::Not {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let (op, width) = match (self.peek(), self.peek_second()) {
            (ExprToken::Op(op), _) => (*op, 1),
            (ExprToken::In, _) => (CompareOp::In, 1),
            (ExprToken::Not, ExprToken::In) => (CompareOp::NotIn, 2),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn parse_comparison(&mut self) -> EngineResult<Expr> {
        let first = self.parse_primary()?;
        let mut rest = vec![];
        while let Some(op) = self.compare_op() {
            rest.push((op, self.parse_primary()?));
        }
        Ok(if rest.is_empty() {
            first
        } else {
            Expr::Compare(Box::new(first), rest)
        })
    }

    /// Comma separated expressions up to `close`. Returns the items and whether a comma was
    /// seen.
    fn parse_list(&mut self, close: ExprToken) -> EngineResult<(Vec<Expr>, bool)> {
        let mut items = vec![];
        let mut saw_comma = false;
        while *self.peek() != close {
            items.push(self.parse_or()?);
            if *self.peek() == ExprToken::Comma {
                self.pos += 1;
                saw_comma = true;
            } else {
                break;
            }
        }
        self.expect(close)?;
        Ok((items, saw_comma))
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        let offset = self.offset();
        Ok(match self.next() {
            ExprToken::String(s) => Expr::Literal(Value::String(s)),
            ExprToken::Integer(i) => Expr::Literal(Value::Integer(i)),
            ExprToken::True => Expr::Literal(Value::Boolean(true)),
            ExprToken::False => Expr::Literal(Value::Boolean(false)),
            ExprToken::Name(name) => Expr::Name(name),
            ExprToken::OpenBracket => Expr::List(self.parse_list(ExprToken::CloseBracket)?.0),
            ExprToken::OpenParen => match self.parse_list(ExprToken::CloseParen)? {
                (mut items, false) if items.len() == 1 => items.remove(0),
                (items, _) => Expr::List(items),
            },
            other => {
                return Err(syntax_error(
                    self.text,
                    offset,
                    format!("unexpected {other:?}"),
                ));
            }
        })
    }
}

impl Expr {
    pub fn parse(text: &str) -> EngineResult<Expr> {
        let mut parser = ExprParser {
            text,
            tokens: tokenize(text)?,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if *parser.peek() != ExprToken::End {
            return Err(parser.error(format!("unexpected {:?}", parser.peek())));
        }
        Ok(expr)
    }

    pub fn evaluate(&self, scope: &VariableScope, unit: &str) -> EngineResult<Value> {
        Ok(match self {
            Expr::Literal(v) => v.clone(),
            Expr::Name(name) => scope.get(name).cloned().ok_or_else(|| {
                EngineError::MissingVariable {
                    name: name.clone(),
                    unit: unit.to_string(),
                }
            })?,
            Expr::List(items) => Value::Sequence(
                items
                    .iter()
                    .map(|e| e.evaluate(scope, unit))
                    .collect::<EngineResult<_>>()?,
            ),
            Expr::Not(inner) => Value::Boolean(!inner.evaluate(scope, unit)?.is_truthy()),
            Expr::And(operands) => {
                let mut last = Value::Boolean(true);
                for operand in operands {
                    last = operand.evaluate(scope, unit)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                last
            }
            Expr::Or(operands) => {
                let mut last = Value::Boolean(false);
                for operand in operands {
                    last = operand.evaluate(scope, unit)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                last
            }
            Expr::Compare(first, rest) => {
                let mut left = first.evaluate(scope, unit)?;
                for (op, right) in rest {
                    let right = right.evaluate(scope, unit)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Boolean(false));
                    }
                    left = right;
                }
                Value::Boolean(true)
            }
        })
    }
}

fn invalid(message: String) -> anyhow::Error {
    EngineError::InvalidCondition(message).into()
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> EngineResult<bool> {
    let ordering = || -> EngineResult<Ordering> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            _ => Err(invalid(format!(
                "cannot order {} and {}",
                left.kind_name(),
                right.kind_name()
            ))),
        }
    };
    let contains = || -> EngineResult<bool> {
        match (left, right) {
            (_, Value::Sequence(items)) => Ok(items.contains(left)),
            (Value::String(needle), Value::String(haystack)) => Ok(haystack.contains(needle)),
            _ => Err(invalid(format!(
                "cannot test {} for membership in {}",
                left.kind_name(),
                right.kind_name()
            ))),
        }
    };

    Ok(match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        CompareOp::Lt => ordering()?.is_lt(),
        CompareOp::Le => ordering()?.is_le(),
        CompareOp::Gt => ordering()?.is_gt(),
        CompareOp::Ge => ordering()?.is_ge(),
        CompareOp::In => contains()?,
        CompareOp::NotIn => !contains()?,
    })
}

/// Parse and evaluate `text`, returning its truthiness.
pub fn evaluate_condition(text: &str, scope: &VariableScope, unit: &str) -> EngineResult<bool> {
    let result = Expr::parse(text)?.evaluate(scope, unit)?.is_truthy();
    trace!(condition = text, result, "evaluated condition");
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scope() -> VariableScope {
        [
            ("OS", Value::from("linux")),
            ("target_arch", Value::from("x64")),
            ("level", Value::Integer(3)),
            ("features", Value::from(vec!["ssl", "zlib"])),
        ]
        .into_iter()
        .collect()
    }

    fn eval(text: &str) -> bool {
        evaluate_condition(text, &scope(), "u.gyp").unwrap()
    }

    #[test]
    fn comparisons() {
        assert!(eval("OS=='linux'"));
        assert!(!eval("OS!=\"linux\""));
        assert!(eval("OS=='linux' and target_arch=='x64'"));
        assert!(eval("OS=='win' or target_arch=='x64'"));
        assert!(eval("not OS=='win'"));
        assert!(eval("level >= 2 and level < 10"));
        assert!(eval("1 < level < 5"));
        assert!(!eval("1 < level < 2"));
        assert!(eval("-1 < 0"));
    }

    #[test]
    fn membership() {
        assert!(eval("OS in ('linux', 'freebsd')"));
        assert!(eval("OS in ['linux']"));
        assert!(eval("'ssl' in features"));
        assert!(eval("'zstd' not in features"));
        assert!(eval("'nux' in OS"));
        assert!(!eval("OS in ('win',)"));
    }

    #[test]
    fn grouping_and_literals() {
        assert!(eval("(OS=='win' or OS=='linux') and True"));
        assert!(!eval("False"));
        assert!(eval("'a' 'b' == 'ab'"));
        assert!(!eval("()"));
    }

    #[test]
    fn precedence() {
        assert_eq!(
            Expr::parse("a or b and not c").unwrap(),
            Expr::Or(vec![
                Expr::Name(String::from("a")),
                Expr::And(vec![
                    Expr::Name(String::from("b")),
                    Expr::Not(Box::new(Expr::Name(String::from("c")))),
                ]),
            ])
        );
    }

    #[test]
    fn missing_variable() {
        let err = evaluate_condition("nope==1", &scope(), "u.gyp").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::MissingVariable { name, .. }) if name == "nope"
        ));
    }

    #[test]
    fn rejects_anything_else() {
        for text in [
            "__import__('os')",
            "OS.upper()",
            "OS = 'x'",
            "OS==",
            "'unterminated",
            "a + b",
            "lambda: 1",
        ] {
            let err = evaluate_condition(text, &scope(), "u.gyp").unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<EngineError>(),
                    Some(EngineError::ConditionSyntax { .. })
                ),
                "{text}: {err}"
            );
        }
    }

    #[test]
    fn ordering_types() {
        let err = evaluate_condition("level < 'x'", &scope(), "u.gyp").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidCondition(_))
        ));
    }
}
