//! A small pratt-style recursive-descent parser over a fixed grammar.
//!
//! Grammar (low to high precedence):
//!
//! ```text
//! or_expr    := and_expr ( "||" and_expr )*
//! and_expr   := in_expr ( "&&" in_expr )*
//! in_expr    := equality ( "in" equality )?
//! equality   := relational ( ("==" | "!=") relational )?
//! relational := additive ( ("<" | "<=" | ">" | ">=") additive )?
//! additive   := term ( ("+" | "-") term )*
//! term       := unary ( ("*" | "/") unary )*
//! unary      := "!" unary | "-" unary | postfix
//! postfix    := primary ( "|" transform )*
//! transform  := ident "(" args? ")"
//! primary    := literal | member | call | "(" or_expr ")" | array
//! ```
//!
//! There is no loop/iteration construct in the grammar itself — parsing one
//! expression recurses at most as deep as the token count, bounding the
//! work a single expression can demand.

use thiserror::Error;

use super::ast::{BinOp, Expr, Func, Literal, Transform, UnaryOp};
use super::lexer::{LexError, Lexer, Token};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unexpected token {0:?}")]
    UnexpectedToken(Token),
    #[error("unknown function {0:?}")]
    UnknownFunction(String),
    #[error("unknown transform {0:?}")]
    UnknownTransform(String),
    #[error("expected more input")]
    UnexpectedEof,
    #[error("trailing tokens after expression")]
    TrailingInput,
}

pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        _ => Err(ParseError::TrailingInput),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: &Token) -> Result<(), ParseError> {
        if self.peek() == want {
            self.bump();
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken(self.peek().clone()))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Token::OrOr {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_in()?;
        while *self.peek() == Token::AndAnd {
            self.bump();
            let rhs = self.parse_in()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_in(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_equality()?;
        if *self.peek() == Token::In {
            self.bump();
            let rhs = self.parse_equality()?;
            return Ok(Expr::In(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_relational()?;
        let op = match self.peek() {
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::NotEq,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.parse_relational()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Token::Lt => BinOp::Lt,
            Token::LtEq => BinOp::LtEq,
            Token::Gt => BinOp::Gt,
            Token::GtEq => BinOp::GtEq,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Bang => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Token::Minus => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while *self.peek() == Token::Pipe {
            self.bump();
            let name = match self.bump() {
                Token::Ident(name) => name,
                other => return Err(ParseError::UnexpectedToken(other)),
            };
            self.expect(&Token::LParen)?;
            let args = self.parse_args()?;
            self.expect(&Token::RParen)?;
            let transform = match name.as_str() {
                "split" => Transform::Split,
                "lower" => Transform::Lower,
                "upper" => Transform::Upper,
                other => return Err(ParseError::UnknownTransform(other.to_string())),
            };
            expr = Expr::Transform(Box::new(expr), transform, args);
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if *self.peek() == Token::RParen {
            return Ok(args);
        }
        args.push(self.parse_or()?);
        while *self.peek() == Token::Comma {
            self.bump();
            args.push(self.parse_or()?);
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.bump() {
            Token::Null => Ok(Expr::Literal(Literal::Null)),
            Token::True => Ok(Expr::Literal(Literal::Bool(true))),
            Token::False => Ok(Expr::Literal(Literal::Bool(false))),
            Token::Number(n) => Ok(Expr::Literal(Literal::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            Token::LBracket => {
                let mut items = Vec::new();
                if *self.peek() != Token::RBracket {
                    items.push(self.parse_or()?);
                    while *self.peek() == Token::Comma {
                        self.bump();
                        items.push(self.parse_or()?);
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::Literal(Literal::Array(items)))
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.bump();
                    let args = self.parse_args()?;
                    self.expect(&Token::RParen)?;
                    let func = match name.as_str() {
                        "ts" => Func::Ts,
                        "now" => Func::Now,
                        other => return Err(ParseError::UnknownFunction(other.to_string())),
                    };
                    return Ok(Expr::Call(func, args));
                }
                let mut path = vec![name];
                while *self.peek() == Token::Dot {
                    self.bump();
                    match self.bump() {
                        Token::Ident(part) => path.push(part),
                        other => return Err(ParseError::UnexpectedToken(other)),
                    }
                }
                Ok(Expr::Member(path))
            }
            Token::Eof => Err(ParseError::UnexpectedEof),
            other => Err(ParseError::UnexpectedToken(other)),
        }
    }
}
