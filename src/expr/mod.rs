//! Sandboxed expression language for guards, actions, and colour math.
//!
//! Agent-authored expressions run against a fixed grammar and a fixed
//! binding set — no host capabilities leak in. Expressions are compiled once
//! at insertion (a small Pratt parser over a hand-rolled lexer) and
//! evaluated per event or per animation frame.
//!
//! Evaluation flavours and their fallbacks on error:
//! - guards return a boolean; failures evaluate to false,
//! - actions run for their `setData` side effects; failures are no-ops,
//! - colour expressions return a number clamped to [0,255]; failures keep
//!   the current channel value.

mod eval;
mod lexer;
mod parser;

pub use eval::{stringify, truthy, Channels, EvalContext, EvalMode};
pub use parser::{compile, Program};

/// Errors raised while compiling or evaluating a sandboxed expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("parse error: {0}")]
    Parse(String),

    /// The expression referenced an identifier or function outside the
    /// exposed binding set.
    #[error("forbidden identifier '{0}'")]
    Violation(String),

    #[error("type error: {0}")]
    Type(String),
}

/// Abstract syntax for a compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(serde_json::Value),
    Ident(String),
    /// `base.field`
    Member(Box<Expr>, String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// Calls are only legal on bare identifiers from the function set.
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}
