//! Evaluates a parsed [`Expr`] against an [`EvalContext`].
//!
//! Total over well-typed input: unknown members resolve to `Null`, mismatched
//! operand types resolve to `false`/`Null` rather than erroring. The only
//! failure modes are a malformed literal passed to `ts()` and division that
//! would otherwise produce `NaN`/`inf` silently — both surface as
//! [`EvalError`] so the caller (the decision procedure) can contain them as a
//! failed predicate.

use chrono::DateTime;
use thiserror::Error;

use crate::context::EvalContext;

use super::ast::{BinOp, Expr, Func, Literal, Transform, UnaryOp};
use super::value::Value;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("ts() argument is not a valid ISO-8601 timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("ts() requires exactly one string argument")]
    InvalidTsArgs,
    #[error("transform {0:?} requires exactly one string argument")]
    InvalidTransformArgs(&'static str),
}

/// Evaluation clock, fixed at decision entry so every rule/segment/rollout
/// step sub-evaluation within one decision observes the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Now(pub i64);

pub fn eval(expr: &Expr, ctx: &EvalContext, now: Now) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => eval_literal(lit, ctx, now),
        Expr::Member(path) => Ok(eval_member(path, ctx)),
        Expr::Unary(op, inner) => {
            let v = eval(inner, ctx, now)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!v.is_truthy()),
                UnaryOp::Neg => Value::Number(-v.as_f64().unwrap_or(0.0)),
            })
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            let l = eval(lhs, ctx, now)?;
            if !l.is_truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(rhs, ctx, now)?.is_truthy()))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            let l = eval(lhs, ctx, now)?;
            if l.is_truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(rhs, ctx, now)?.is_truthy()))
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, ctx, now)?;
            let r = eval(rhs, ctx, now)?;
            Ok(eval_binary(*op, &l, &r))
        }
        Expr::In(lhs, rhs) => {
            let l = eval(lhs, ctx, now)?;
            let r = eval(rhs, ctx, now)?;
            Ok(Value::Bool(eval_in(&l, &r)))
        }
        Expr::Transform(inner, transform, args) => {
            let v = eval(inner, ctx, now)?;
            eval_transform(*transform, v, args, ctx, now)
        }
        Expr::Call(func, args) => eval_call(*func, args, ctx, now),
    }
}

fn eval_literal(lit: &Literal, ctx: &EvalContext, now: Now) -> Result<Value, EvalError> {
    Ok(match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::Str(s.clone()),
        Literal::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, ctx, now)?);
            }
            Value::Array(values)
        }
    })
}

fn eval_member(path: &[String], ctx: &EvalContext) -> Value {
    let Some((root, rest)) = path.split_first() else {
        return Value::Null;
    };
    let Some(mut json) = ctx.root_field(root) else {
        return Value::Null;
    };
    for part in rest {
        json = match json.get(part) {
            Some(v) => v.clone(),
            None => return Value::Null,
        };
    }
    Value::from_json(&json)
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> Value {
    match op {
        BinOp::Eq => Value::Bool(values_equal(l, r)),
        BinOp::NotEq => Value::Bool(!values_equal(l, r)),
        BinOp::Lt => numeric_cmp(l, r, |a, b| a < b),
        BinOp::LtEq => numeric_cmp(l, r, |a, b| a <= b),
        BinOp::Gt => numeric_cmp(l, r, |a, b| a > b),
        BinOp::GtEq => numeric_cmp(l, r, |a, b| a >= b),
        BinOp::Add => arithmetic(l, r, |a, b| a + b),
        BinOp::Sub => arithmetic(l, r, |a, b| a - b),
        BinOp::Mul => arithmetic(l, r, |a, b| a * b),
        BinOp::Div => {
            let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                return Value::Null;
            };
            if b == 0.0 {
                Value::Null
            } else {
                Value::Number(a / b)
            }
        }
        // And/Or are short-circuited in `eval` and never reach here.
        BinOp::And | BinOp::Or => Value::Bool(l.is_truthy() && r.is_truthy()),
    }
}

fn arithmetic(l: &Value, r: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Value::Number(f(a, b)),
        _ => Value::Null,
    }
}

fn numeric_cmp(l: &Value, r: &Value, f: impl Fn(f64, f64) -> bool) -> Value {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Value::Bool(f(a, b)),
        _ => Value::Bool(false),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => (a - b).abs() < f64::EPSILON,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

fn eval_in(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Str(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        _ => false,
    }
}

fn eval_transform(
    transform: Transform,
    value: Value,
    args: &[Expr],
    ctx: &EvalContext,
    now: Now,
) -> Result<Value, EvalError> {
    match transform {
        Transform::Split => {
            let [sep_expr] = args else {
                return Err(EvalError::InvalidTransformArgs("split"));
            };
            let sep_value = eval(sep_expr, ctx, now)?;
            let (Some(s), Some(sep)) = (value.as_str(), sep_value.as_str()) else {
                return Err(EvalError::InvalidTransformArgs("split"));
            };
            Ok(Value::Array(
                s.split(sep).map(|p| Value::Str(p.to_string())).collect(),
            ))
        }
        Transform::Lower => match value.as_str() {
            Some(s) => Ok(Value::Str(s.to_lowercase())),
            None => Err(EvalError::InvalidTransformArgs("lower")),
        },
        Transform::Upper => match value.as_str() {
            Some(s) => Ok(Value::Str(s.to_uppercase())),
            None => Err(EvalError::InvalidTransformArgs("upper")),
        },
    }
}

fn eval_call(func: Func, args: &[Expr], ctx: &EvalContext, now: Now) -> Result<Value, EvalError> {
    match func {
        Func::Now => Ok(Value::Number(now.0 as f64)),
        Func::Ts => {
            let [arg] = args else {
                return Err(EvalError::InvalidTsArgs);
            };
            let v = eval(arg, ctx, now)?;
            let s = v.as_str().ok_or(EvalError::InvalidTsArgs)?;
            let parsed = DateTime::parse_from_rfc3339(s)
                .map_err(|_| EvalError::InvalidTimestamp(s.to_string()))?;
            Ok(Value::Number(parsed.timestamp_millis() as f64))
        }
    }
}
