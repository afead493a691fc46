//! Per-slot formulas.
//!
//! A formula is an arithmetic expression over one variable, `x`, bound to the
//! raw register value. Only numeric literals, `+ - * /`, unary sign and
//! parentheses are understood; there is nothing else an expression can reach.

use crate::error::EvaluationError;

/// Name of the variable bound to the raw register value (case-insensitive).
pub const VARIABLE: &str = "x";
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Variable,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Variable,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

/// A parsed formula. A blank source parses to the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Option<Expr>,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, EvaluationError> {
        if source.trim().is_empty() {
            return Ok(Self { expr: None });
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expression()?;
        if let Some((pos, _)) = parser.peek() {
            return Err(EvaluationError::UnexpectedToken(pos));
        }
        Ok(Self { expr: Some(expr) })
    }

    pub fn is_identity(&self) -> bool {
        self.expr.is_none()
    }

    pub fn eval(&self, x: f64) -> Result<f64, EvaluationError> {
        let value = match &self.expr {
            None => x,
            Some(expr) => eval(expr, x),
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvaluationError::NonFinite)
        }
    }
}

/// Evaluates `expression` with `x` bound to `raw_value`.
pub fn evaluate(expression: &str, raw_value: f64) -> Result<f64, EvaluationError> {
    Formula::parse(expression)?.eval(raw_value)
}

fn eval(expr: &Expr, x: f64) -> f64 {
    match expr {
        Expr::Number(n) => *n,
        Expr::Variable => x,
        Expr::Neg(inner) => -eval(inner, x),
        Expr::Add(a, b) => eval(a, x) + eval(b, x),
        Expr::Sub(a, b) => eval(a, x) - eval(b, x),
        Expr::Mul(a, b) => eval(a, x) * eval(b, x),
        Expr::Div(a, b) => eval(a, x) / eval(b, x),
    }
}

/// Tokens paired with their byte offset in the source.
fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, EvaluationError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        let token = match ch {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = pos;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &source[pos..end];
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| EvaluationError::InvalidNumber(literal.to_string()))?;
                tokens.push((pos, Token::Number(number)));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = pos;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let ident = &source[pos..end];
                if !ident.eq_ignore_ascii_case(VARIABLE) {
                    return Err(EvaluationError::UnknownIdentifier(ident.to_string()));
                }
                tokens.push((pos, Token::Variable));
                continue;
            }
            other => return Err(EvaluationError::UnexpectedChar { ch: other, pos }),
        };
        chars.next();
        tokens.push((pos, token));
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<(usize, &'a Token)> {
        self.tokens.get(self.pos).map(|(offset, token)| (*offset, token))
    }

    fn next(&mut self) -> Option<(usize, &'a Token)> {
        let token = self.tokens.get(self.pos).map(|(offset, token)| (*offset, token));
        self.pos += 1;
        token
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.term()?;
        loop {
            match self.peek() {
                Some((_, Token::Plus)) => {
                    self.pos += 1;
                    left = Expr::Add(Box::new(left), Box::new(self.term()?));
                }
                Some((_, Token::Minus)) => {
                    self.pos += 1;
                    left = Expr::Sub(Box::new(left), Box::new(self.term()?));
                }
                _ => return Ok(left),
            }
        }
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some((_, Token::Star)) => {
                    self.pos += 1;
                    left = Expr::Mul(Box::new(left), Box::new(self.unary()?));
                }
                Some((_, Token::Slash)) => {
                    self.pos += 1;
                    left = Expr::Div(Box::new(left), Box::new(self.unary()?));
                }
                _ => return Ok(left),
            }
        }
    }

    // unary := ('-' | '+') unary | primary
    fn unary(&mut self) -> Result<Expr, EvaluationError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvaluationError::TooDeep);
        }
        let expr = match self.peek() {
            Some((_, Token::Minus)) => {
                self.pos += 1;
                Expr::Neg(Box::new(self.unary()?))
            }
            Some((_, Token::Plus)) => {
                self.pos += 1;
                self.unary()?
            }
            _ => self.primary()?,
        };
        self.depth -= 1;
        Ok(expr)
    }

    // primary := number | variable | '(' expression ')'
    fn primary(&mut self) -> Result<Expr, EvaluationError> {
        match self.next() {
            Some((_, Token::Number(n))) => Ok(Expr::Number(*n)),
            Some((_, Token::Variable)) => Ok(Expr::Variable),
            Some((_, Token::LParen)) => {
                let inner = self.expression()?;
                match self.next() {
                    Some((_, Token::RParen)) => Ok(inner),
                    Some((pos, _)) => Err(EvaluationError::UnexpectedToken(pos)),
                    None => Err(EvaluationError::UnexpectedEnd),
                }
            }
            Some((pos, _)) => Err(EvaluationError::UnexpectedToken(pos)),
            None => Err(EvaluationError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_expression_is_identity() {
        for x in [0.0, 1.0, -42.5, 65535.0, 1e-9, f64::MAX] {
            assert_eq!(evaluate("", x), Ok(x));
            assert_eq!(evaluate("   ", x), Ok(x));
        }
        assert!(Formula::parse("\t").unwrap().is_identity());
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(evaluate("x*2", 20.0), Ok(40.0));
        assert_eq!(evaluate("x / 10", 2305.0), Ok(230.5));
        assert_eq!(evaluate("1 + 2 * 3", 0.0), Ok(7.0));
        assert_eq!(evaluate("(1 + 2) * 3", 0.0), Ok(9.0));
        assert_eq!(evaluate("10 - 4 - 3", 0.0), Ok(3.0));
        assert_eq!(evaluate("100 / 10 / 5", 0.0), Ok(2.0));
        assert_eq!(evaluate("-x + 5", 3.0), Ok(2.0));
        assert_eq!(evaluate("--x", 3.0), Ok(3.0));
        assert_eq!(evaluate("X * .5", 8.0), Ok(4.0));
        assert_eq!(evaluate("(x - 32768) * 0.01", 32868.0), Ok(1.0));
    }

    #[test]
    fn test_non_finite_results_fail() {
        assert_eq!(evaluate("x / 0", 1.0), Err(EvaluationError::NonFinite));
        assert_eq!(evaluate("x / 0", 0.0), Err(EvaluationError::NonFinite));
        assert_eq!(evaluate("", f64::NAN), Err(EvaluationError::NonFinite));
    }

    #[test]
    fn test_rejects_anything_but_arithmetic() {
        assert_eq!(
            evaluate("alert(1)", 1.0),
            Err(EvaluationError::UnknownIdentifier("alert".to_string()))
        );
        assert_eq!(
            evaluate("x; 1", 1.0),
            Err(EvaluationError::UnexpectedChar { ch: ';', pos: 1 })
        );
        assert_eq!(evaluate("x ** 2", 1.0), Err(EvaluationError::UnexpectedToken(3)));
        assert_eq!(evaluate("(x + 1", 1.0), Err(EvaluationError::UnexpectedEnd));
        assert_eq!(evaluate("x 2", 1.0), Err(EvaluationError::UnexpectedToken(2)));
        assert_eq!(
            evaluate("1.2.3", 1.0),
            Err(EvaluationError::InvalidNumber("1.2.3".to_string()))
        );
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}x{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(evaluate(&deep, 1.0), Err(EvaluationError::TooDeep));
        let shallow = format!("{}x{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(evaluate(&shallow, 1.0), Ok(1.0));
    }
}
