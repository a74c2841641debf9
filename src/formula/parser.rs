use std::fmt;

use super::lexer::{Lexer, Token, TokenKind};
use crate::error::EvaluationError;

/// Limit on expression tree depth. Parentheses, unary operators and every
/// folded binary operator each add a level.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Pow => lhs.powf(rhs),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
        }
    }
}

/// Expression tree. These four node kinds are everything a formula can express.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Band(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Band(name) => f.write_str(name),
            Expr::Neg(inner) => write!(f, "(-{inner})"),
            Expr::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}

pub(crate) fn parse(input: &str) -> Result<Expr, EvaluationError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };

    if parser.peek().kind == TokenKind::Eof {
        return Err(parser.error("formula is empty"));
    }

    let expr = parser.expr()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(match &trailing.kind {
            TokenKind::Symbol(c) => parser.unexpected_symbol(*c),
            other => parser.error(format!("unexpected {} after expression", describe(other))),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The token list always ends with Eof and `pos` never moves past it
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_next(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error(&self, msg: impl Into<String>) -> EvaluationError {
        EvaluationError::Syntax {
            column: self.peek().column,
            message: msg.into(),
        }
    }

    fn unexpected_symbol(&self, c: char) -> EvaluationError {
        self.error(format!("unexpected character '{c}'"))
    }

    fn enter(&mut self) -> Result<(), EvaluationError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("expression nested deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, EvaluationError> {
        let mut lhs = self.term()?;
        let mut folds = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            self.enter()?;
            folds += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= folds;
        Ok(lhs)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<Expr, EvaluationError> {
        let mut lhs = self.unary()?;
        let mut folds = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            self.bump();
            self.enter()?;
            folds += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= folds;
        Ok(lhs)
    }

    // unary := ('+' | '-') unary | power
    fn unary(&mut self) -> Result<Expr, EvaluationError> {
        match self.peek().kind {
            TokenKind::Plus | TokenKind::Minus => {
                let negate = self.bump().kind == TokenKind::Minus;
                self.enter()?;
                let inner = self.unary()?;
                self.leave();
                Ok(if negate { Expr::Neg(Box::new(inner)) } else { inner })
            }
            _ => self.power(),
        }
    }

    // power := atom ('**' unary)?
    fn power(&mut self) -> Result<Expr, EvaluationError> {
        let base = self.atom()?;
        if self.peek().kind != TokenKind::StarStar {
            return Ok(base);
        }
        self.bump();
        self.enter()?;
        let exponent = self.unary()?;
        self.leave();
        Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)))
    }

    // atom := number | identifier | '(' expr ')'
    fn atom(&mut self) -> Result<Expr, EvaluationError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.bump();
                Ok(Expr::Number(n))
            }
            TokenKind::Ident(name) => {
                let construct = match self.peek_next().kind {
                    TokenKind::LParen => Some("function call"),
                    TokenKind::Symbol('.') => Some("attribute access"),
                    TokenKind::Symbol('[') => Some("subscript"),
                    _ => None,
                };
                if let Some(construct) = construct {
                    return Err(EvaluationError::Disallowed {
                        column: token.column,
                        construct: format!("{construct} on '{name}'"),
                    });
                }
                self.bump();
                Ok(Expr::Band(name))
            }
            TokenKind::LParen => {
                self.bump();
                self.enter()?;
                let inner = self.expr()?;
                self.leave();
                if self.peek().kind != TokenKind::RParen {
                    return Err(match self.peek().kind {
                        TokenKind::Symbol(c) => self.unexpected_symbol(c),
                        TokenKind::Eof => self.error("missing closing parenthesis"),
                        ref other => self.error(format!("expected ')', found {}", describe(other))),
                    });
                }
                self.bump();
                Ok(inner)
            }
            TokenKind::Symbol(c) => Err(self.unexpected_symbol(c)),
            TokenKind::Eof => Err(self.error("unexpected end of formula")),
            ref other => Err(self.error(format!("expected a value, found {}", describe(other)))),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => format!("number {n}"),
        TokenKind::Ident(name) => format!("identifier '{name}'"),
        TokenKind::Plus => "'+'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::Star => "'*'".to_string(),
        TokenKind::StarStar => "'**'".to_string(),
        TokenKind::Slash => "'/'".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Symbol(c) => format!("'{c}'"),
        TokenKind::Eof => "end of formula".to_string(),
    }
}
