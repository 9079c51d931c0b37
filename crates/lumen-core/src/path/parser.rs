use super::ast::{BinaryOp, Expr, Literal};
use super::lexer::{Token, tokenize};
use crate::error::{CoreError, Result};

/// Recursive-descent parser over the token stream.
///
/// Grammar (loosest binding first):
/// or → and (`or` and)* ; and → eq (`and` eq)* ; eq → rel ((`=`|`!=`) rel)* ;
/// rel → postfix ((`<`|`<=`|`>`|`>=`) postfix)* ;
/// postfix → primary (`.` ident [`(` args `)`] | `[` index `]`)* ;
/// primary → literal | variable | ident [`(` args `)`] | `(` expr `)`.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

pub fn parse(text: &str) -> Result<Expr> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(CoreError::path_expression("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(CoreError::path_expression(format!(
            "trailing tokens after expression in '{text}'"
        )));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(ref tok) if tok == expected => Ok(()),
            other => Err(CoreError::path_expression(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.equality_expr()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.equality_expr()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality_expr(&mut self) -> Result<Expr> {
        let mut left = self.relational_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.relational_expr()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn relational_expr(&mut self) -> Result<Expr> {
        let mut left = self.postfix_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                _ => break,
            };
            self.advance();
            let right = self.postfix_expr()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn postfix_expr(&mut self) -> Result<Expr> {
        let mut expr = self.primary_expr()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        other => {
                            return Err(CoreError::path_expression(format!(
                                "expected member name after '.', found {other:?}"
                            )));
                        }
                    };
                    if self.peek() == Some(&Token::LParen) {
                        self.advance();
                        let args = self.arguments()?;
                        expr = Expr::Function {
                            base: Some(Box::new(expr)),
                            name,
                            args,
                        };
                    } else {
                        expr = Expr::Member {
                            base: Some(Box::new(expr)),
                            name,
                        };
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = match self.advance() {
                        Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                        other => {
                            return Err(CoreError::path_expression(format!(
                                "expected integer index, found {other:?}"
                            )));
                        }
                    };
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index {
                        base: Box::new(expr),
                        index,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::String(s))),
            Some(Token::Number(n)) => Ok(Expr::Literal(Literal::Number(n))),
            Some(Token::True) => Ok(Expr::Literal(Literal::Boolean(true))),
            Some(Token::False) => Ok(Expr::Literal(Literal::Boolean(false))),
            Some(Token::Variable(name)) => Ok(Expr::Variable(name)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let args = self.arguments()?;
                    Ok(Expr::Function {
                        base: None,
                        name,
                        args,
                    })
                } else {
                    Ok(Expr::Member { base: None, name })
                }
            }
            Some(Token::LParen) => {
                let expr = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            other => Err(CoreError::path_expression(format!(
                "unexpected token {other:?}"
            ))),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.or_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(CoreError::path_expression(format!(
                        "expected ',' or ')' in argument list, found {other:?}"
                    )));
                }
            }
        }
        Ok(args)
    }
}
