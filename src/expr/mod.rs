//! The read-only expression sub-language used by flag rules and segments.
//! Deliberately a small pratt-style parser over a fixed grammar rather than
//! an embedded scripting host: this bounds evaluation cost, prevents host
//! escape, and keeps transforms/functions a closed set.

mod ast;
mod eval;
mod lexer;
mod parser;
mod value;

pub use ast::{BinOp, Expr, Func, Literal, Transform, UnaryOp};
pub use eval::{EvalError, Now};
pub use lexer::LexError;
pub use parser::ParseError;
pub use value::Value;

use crate::context::EvalContext;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ExprError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Parses and evaluates `source` against `ctx`, coercing the result to a
/// rule boolean via JSON truthiness. Any parse or runtime failure is
/// reported as `Err` — it is the *caller's* responsibility (the decision
/// procedure) to contain that as a failed predicate rather than propagate it.
pub fn eval_rule(source: &str, ctx: &EvalContext, now: Now) -> Result<bool, ExprError> {
    let expr = parser::parse(source)?;
    let value = eval::eval(&expr, ctx, now)?;
    Ok(value.is_truthy())
}
