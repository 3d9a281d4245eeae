//! Recursive-descent parser over the token stream from [`super::lexer`].
//!
//! Precedence (high to low, spec.md §4.1): unary, `* / %`, `+ -`,
//! `< <= > >=`, `== !=`, `&&`, `||`. A leading comparison/equality operator
//! with no left-hand side is treated as comparing against `input`, the
//! documented backward-compatible `>0`-style shorthand.

use super::ast::{BinOp, Expr, UnOp};
use super::lexer::{lex, Tok, Token};
use super::ExprError;
use crate::value::Value;

pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = lex(source)?;
    let mut p = Parser { tokens, pos: 0 };
    let expr = p.parse_or()?;
    p.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Tok {
        let t = self.tokens[self.pos].tok.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_eof(&self) -> Result<(), ExprError> {
        if matches!(self.peek(), Tok::Eof) {
            Ok(())
        } else {
            Err(ExprError::new(self.peek_pos(), "trailing input after expression"))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Tok::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), Tok::AndAnd) {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinOp::Eq,
                Tok::Ne => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        // Backward-compatible shorthand: an expression that *starts* with a
        // comparison/equality operator implicitly compares `input`.
        if let Some(op) = comparison_op(self.peek()) {
            self.advance();
            let rhs = self.parse_additive()?;
            let mut lhs = Expr::Binary(op, Box::new(Expr::Input), Box::new(rhs));
            loop {
                let Some(op) = comparison_op(self.peek()) else { break };
                self.advance();
                let rhs = self.parse_additive()?;
                lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
            }
            return Ok(lhs);
        }

        let mut lhs = self.parse_additive()?;
        loop {
            let Some(op) = comparison_op(self.peek()) else { break };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Tok::Bang => {
                self.advance();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            Tok::Minus => {
                self.advance();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let name = match self.advance() {
                        Tok::Ident(n) => n,
                        _ => return Err(ExprError::new(self.peek_pos(), "expected field name after '.'")),
                    };
                    if matches!(self.peek(), Tok::LParen) {
                        self.advance();
                        let args = self.parse_args()?;
                        expr = Expr::MethodCall(Box::new(expr), name, args);
                    } else {
                        expr = Expr::Field(Box::new(expr), name);
                    }
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.parse_or()?;
                    self.expect(Tok::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Tok::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.peek() {
                Tok::Comma => {
                    self.advance();
                }
                Tok::RParen => {
                    self.advance();
                    break;
                }
                _ => return Err(ExprError::new(self.peek_pos(), "expected ',' or ')' in argument list")),
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let pos = self.peek_pos();
        match self.advance() {
            Tok::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::True => Ok(Expr::Literal(Value::Bool(true))),
            Tok::False => Ok(Expr::Literal(Value::Bool(false))),
            Tok::Null => Ok(Expr::Literal(Value::Null)),
            Tok::LParen => {
                let inner = self.parse_or()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::Ident(name) => self.parse_ident_root(name, pos),
            other => Err(ExprError::new(pos, format!("unexpected token {other:?}"))),
        }
    }

    fn parse_ident_root(&mut self, name: String, pos: usize) -> Result<Expr, ExprError> {
        match name.as_str() {
            "item" => Ok(Expr::Item),
            "acc" => Ok(Expr::Acc),
            "input" => Ok(Expr::Input),
            "node" => {
                self.expect(Tok::Dot)?;
                let id = self.expect_ident()?;
                Ok(Expr::NodeRef(id))
            }
            "variables" => {
                self.expect(Tok::Dot)?;
                let n = self.expect_ident()?;
                Ok(Expr::VariableRef(n))
            }
            "context" => {
                self.expect(Tok::Dot)?;
                let n = self.expect_ident()?;
                Ok(Expr::ContextRef(n))
            }
            _ if matches!(self.peek(), Tok::LParen) => {
                self.advance();
                let args = self.parse_args()?;
                Ok(Expr::Call(name, args))
            }
            _ => {
                let _ = pos;
                Ok(Expr::NodeRef(name))
            }
        }
    }

    fn expect(&mut self, expected: Tok) -> Result<(), ExprError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(ExprError::new(
                self.peek_pos(),
                format!("expected {expected:?}, found {:?}", self.peek()),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ExprError> {
        match self.advance() {
            Tok::Ident(n) => Ok(n),
            other => Err(ExprError::new(self.peek_pos(), format!("expected identifier, found {other:?}"))),
        }
    }
}

fn comparison_op(tok: &Tok) -> Option<BinOp> {
    match tok {
        Tok::Lt => Some(BinOp::Lt),
        Tok::Le => Some(BinOp::Le),
        Tok::Gt => Some(BinOp::Gt),
        Tok::Ge => Some(BinOp::Ge),
        _ => None,
    }
}
