//! Constrained arithmetic evaluator backing the `calculate` tool.
//!
//! Grammar (whitespace ignored):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | '(' expr ')'
//! ```
//!
//! `^` is right-associative and binds tighter than unary minus, so `-2^2`
//! evaluates to `-4`. Anything outside the grammar is rejected.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::{Tool, required_arg, single_string_schema};
use crate::error::ToolError;
use crate::state::ToolArgs;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { found: String, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
    #[error("expression nested too deeply")]
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(value) => format!("number {value}"),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Caret => "'^'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        let token = match ch {
            c if c.is_whitespace() => {
                pos += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                let literal: String = chars[start..pos].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| CalcError::InvalidNumber(literal.clone()))?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if chars.get(pos + 1) == Some(&'*') => {
                tokens.push((Token::Caret, pos));
                pos += 2;
                continue;
            }
            '*' => Token::Star,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(CalcError::UnexpectedChar { ch: other, pos }),
        };
        tokens.push((token, pos));
        pos += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.cursor).map(|(token, _)| *token)
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let next = self.tokens.get(self.cursor).copied();
        if next.is_some() {
            self.cursor += 1;
        }
        next
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.cursor += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.cursor += 1;
            let rhs = self.unary()?;
            value = if op == Token::Star {
                value * rhs
            } else {
                if rhs == 0.0 {
                    return Err(CalcError::DivisionByZero);
                }
                value / rhs
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        self.descend()?;
        let value = match self.peek() {
            Some(Token::Minus) => {
                self.cursor += 1;
                -self.unary()?
            }
            Some(Token::Plus) => {
                self.cursor += 1;
                self.unary()?
            }
            _ => self.power()?,
        };
        self.depth -= 1;
        Ok(value)
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.primary()?;
        if self.peek() == Some(Token::Caret) {
            self.cursor += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.advance() {
            Some((Token::Number(value), _)) => Ok(value),
            Some((Token::LParen, _)) => {
                self.descend()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some((Token::RParen, _)) => Ok(value),
                    Some((token, pos)) => Err(CalcError::UnexpectedToken {
                        found: token.describe(),
                        pos,
                    }),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some((token, pos)) => Err(CalcError::UnexpectedToken {
                found: token.describe(),
                pos,
            }),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CalcError::Empty);
    }

    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };
    let value = parser.expr()?;

    if let Some((token, pos)) = parser.advance() {
        return Err(CalcError::UnexpectedToken {
            found: token.describe(),
            pos,
        });
    }
    if !value.is_finite() {
        return Err(CalcError::NonFinite);
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// The `calculate` tool.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Perform arithmetic calculations. Supports numbers, + - * / ^ and parentheses."
    }

    fn input_schema(&self) -> serde_json::Value {
        single_string_schema("expression", "Arithmetic expression, e.g. (2 + 3) * 4")
    }

    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let expression = required_arg(self.name(), args, "expression")?;
        debug!(%expression, "calculating");
        Ok(match evaluate(expression) {
            Ok(value) => format!("Result: {}", format_number(value)),
            Err(err) => format!("Calculation error: {err}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_precedence_and_associativity() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("-2 ^ 2").unwrap(), -4.0);
        assert_eq!(evaluate("2 ** -1").unwrap(), 0.5);
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(evaluate("1.5 * 4 / 3").unwrap(), 2.0);
    }

    #[test]
    fn rejects_code_and_garbage() {
        assert!(matches!(
            evaluate("__import__('os')"),
            Err(CalcError::UnexpectedChar { ch: '_', pos: 0 })
        ));
        assert!(matches!(
            evaluate("2 +"),
            Err(CalcError::UnexpectedEnd)
        ));
        assert!(matches!(
            evaluate("(1 + 2"),
            Err(CalcError::UnexpectedEnd)
        ));
        assert!(matches!(
            evaluate("1 2"),
            Err(CalcError::UnexpectedToken { .. })
        ));
        assert!(matches!(evaluate("1..2"), Err(CalcError::InvalidNumber(_))));
        assert_eq!(evaluate("   "), Err(CalcError::Empty));
    }

    #[test]
    fn reports_arithmetic_failures() {
        assert_eq!(evaluate("1 / (2 - 2)"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("10 ^ 400"), Err(CalcError::NonFinite));
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(evaluate(&deep), Err(CalcError::TooDeep));
    }

    #[tokio::test]
    async fn tool_encodes_errors_as_text() {
        let mut args = ToolArgs::new();
        args.insert("expression".into(), "6 * 7".into());
        assert_eq!(CalculatorTool.call(&args).await.unwrap(), "Result: 42");

        args.insert("expression".into(), "exec(1)".into());
        let text = CalculatorTool.call(&args).await.unwrap();
        assert!(text.starts_with("Calculation error:"), "unexpected: {text}");
    }
}
