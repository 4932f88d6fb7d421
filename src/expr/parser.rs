//! Pratt parser for the sandbox grammar.
//!
//! The grammar is deliberately small: literals, identifiers, calls on bare
//! identifiers, member/index access, arithmetic, comparison, and boolean
//! operators, plus object and array literals for data-returning tool
//! expressions. Embedding a general-purpose interpreter is exactly what
//! this module exists to avoid.

use serde_json::Value;

use super::lexer::{tokenize, Token};
use super::{BinaryOp, Expr, ExprError, UnaryOp};

/// A compiled expression, ready for repeated evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    source: String,
    pub(super) ast: Expr,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Compile an expression once; rules and states hold the result.
pub fn compile(source: &str) -> Result<Program, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expression(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::Parse("trailing input after expression".into()));
    }
    Ok(Program {
        source: source.to_string(),
        ast,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Binding powers, loosest to tightest.
const BP_OR: u8 = 1;
const BP_AND: u8 = 2;
const BP_CMP: u8 = 3;
const BP_ADD: u8 = 4;
const BP_MUL: u8 = 5;
const BP_UNARY: u8 = 6;
const BP_POSTFIX: u8 = 7;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ExprError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ExprError::Parse("unexpected end of expression".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ExprError> {
        if self.next()? == token {
            Ok(())
        } else {
            Err(ExprError::Parse(format!("expected {what}")))
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.prefix()?;

        loop {
            let (op, bp) = match self.peek() {
                Some(Token::Or) => (BinaryOp::Or, BP_OR),
                Some(Token::And) => (BinaryOp::And, BP_AND),
                Some(Token::EqEq) => (BinaryOp::Eq, BP_CMP),
                Some(Token::NotEq) => (BinaryOp::Ne, BP_CMP),
                Some(Token::Lt) => (BinaryOp::Lt, BP_CMP),
                Some(Token::Le) => (BinaryOp::Le, BP_CMP),
                Some(Token::Gt) => (BinaryOp::Gt, BP_CMP),
                Some(Token::Ge) => (BinaryOp::Ge, BP_CMP),
                Some(Token::Plus) => (BinaryOp::Add, BP_ADD),
                Some(Token::Minus) => (BinaryOp::Sub, BP_ADD),
                Some(Token::Star) => (BinaryOp::Mul, BP_MUL),
                Some(Token::Slash) => (BinaryOp::Div, BP_MUL),
                Some(Token::Percent) => (BinaryOp::Rem, BP_MUL),
                Some(Token::Dot) => {
                    if BP_POSTFIX < min_bp {
                        break;
                    }
                    self.pos += 1;
                    let field = match self.next()? {
                        Token::Ident(name) => name,
                        _ => return Err(ExprError::Parse("expected field name after '.'".into())),
                    };
                    lhs = Expr::Member(Box::new(lhs), field);
                    continue;
                }
                Some(Token::LBracket) => {
                    if BP_POSTFIX < min_bp {
                        break;
                    }
                    self.pos += 1;
                    let index = self.expression(0)?;
                    self.expect(Token::RBracket, "']'")?;
                    lhs = Expr::Index(Box::new(lhs), Box::new(index));
                    continue;
                }
                _ => break,
            };

            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ExprError> {
        match self.next()? {
            Token::Num(n) => Ok(Expr::Literal(number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Minus => {
                let operand = self.expression(BP_UNARY)?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)))
            }
            Token::Not => {
                let operand = self.expression(BP_UNARY)?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
            }
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.expression(0)?);
                        match self.peek() {
                            Some(Token::Comma) => self.pos += 1,
                            _ => break,
                        }
                    }
                }
                self.expect(Token::RBracket, "']'")?;
                Ok(Expr::Array(items))
            }
            Token::LBrace => {
                let mut fields = Vec::new();
                if self.peek() != Some(&Token::RBrace) {
                    loop {
                        let key = match self.next()? {
                            Token::Ident(name) => name,
                            Token::Str(s) => s,
                            _ => return Err(ExprError::Parse("expected object key".into())),
                        };
                        self.expect(Token::Colon, "':'")?;
                        fields.push((key, self.expression(0)?));
                        match self.peek() {
                            Some(Token::Comma) => self.pos += 1,
                            _ => break,
                        }
                    }
                }
                self.expect(Token::RBrace, "'}'")?;
                Ok(Expr::Object(fields))
            }
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expression(0)?);
                            match self.peek() {
                                Some(Token::Comma) => self.pos += 1,
                                _ => break,
                            }
                        }
                    }
                    self.expect(Token::RParen, "')'")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(ExprError::Parse(format!("unexpected token {other:?}"))),
        }
    }
}

/// Integral floats become JSON integers so stored values round-trip cleanly.
pub(super) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_guard_with_precedence() {
        let program = compile("getData('n') > 0 and getData('n') < 10 or true").unwrap();
        // (a and b) or true
        match &program.ast {
            Expr::Binary(BinaryOp::Or, lhs, _) => match lhs.as_ref() {
                Expr::Binary(BinaryOp::And, _, _) => {}
                other => panic!("expected and-node, got {other:?}"),
            },
            other => panic!("expected or-node, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let program = compile("1 + 2 * 3").unwrap();
        match &program.ast {
            Expr::Binary(BinaryOp::Add, _, rhs) => {
                assert!(matches!(rhs.as_ref(), Expr::Binary(BinaryOp::Mul, _, _)));
            }
            other => panic!("expected add at root, got {other:?}"),
        }
    }

    #[test]
    fn parses_member_and_index_chains() {
        assert!(compile("time.hour >= 22").is_ok());
        assert!(compile("getTime().minute").is_ok());
        assert!(compile("args['location']").is_ok());
    }

    #[test]
    fn parses_object_and_array_literals() {
        assert!(compile("{temp: 70, tags: ['a', 'b']}").is_ok());
        assert!(compile("{'quoted key': 1}").is_ok());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(compile("1 + 2 2").is_err());
        assert!(compile("(1").is_err());
    }

    #[test]
    fn integral_numbers_become_json_integers() {
        assert_eq!(number(4.0), Value::from(4));
        assert_eq!(number(2.5), serde_json::json!(2.5));
    }
}
