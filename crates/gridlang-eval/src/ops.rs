//! Operator semantics on values.

use crate::error::{EvalError, EvalResult};
use crate::shape;
use crate::value::{Array, Value};
use gridlang_types::ast::{BinOp, UnaryOp};
use std::cmp::Ordering;

/// Apply a non-short-circuit binary operator.
pub fn binary(op: BinOp, left: &Value, right: &Value) -> EvalResult<Value> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow | BinOp::Mod
        | BinOp::IntDiv => elementwise(left, right, &|a, b| arithmetic(op, a, b)),
        BinOp::Concat => Ok(Value::Text(format!("{left}{right}"))),
        BinOp::Stack => stack_values(left, right),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = compare(left, right)?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ord == Some(Ordering::Less),
                BinOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                BinOp::Gt => ord == Some(Ordering::Greater),
                _ => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            }))
        }
        BinOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
        BinOp::NotEq => Ok(Value::Bool(!loose_eq(left, right))),
        BinOp::And => Ok(Value::Bool(left.truthy() && right.truthy())),
        BinOp::Or => Ok(Value::Bool(left.truthy() || right.truthy())),
        BinOp::In => Ok(Value::Bool(member_of(left, right))),
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> EvalResult<Value> {
    match op {
        UnaryOp::Neg => map_numbers(operand, &|n| -n),
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
    }
}

fn map_numbers(value: &Value, f: &dyn Fn(f64) -> f64) -> EvalResult<Value> {
    match value {
        Value::Array(a) => {
            let a = a.borrow();
            let items = a
                .items()
                .iter()
                .map(|v| map_numbers(v, f))
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Value::array(Array::from_parts(a.shape().to_vec(), items)))
        }
        other => Ok(Value::Number(f(number(other)?))),
    }
}

/// Arithmetic applies elementwise only between arrays of identical shape.
fn elementwise(
    left: &Value,
    right: &Value,
    f: &dyn Fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    match (left, right) {
        (Value::Array(a), Value::Array(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            if a.shape() != b.shape() {
                return Err(EvalError::ArityOrShapeMismatch(format!(
                    "operand shapes {:?} and {:?} differ",
                    a.shape(),
                    b.shape()
                )));
            }
            let items = a
                .items()
                .iter()
                .zip(b.items())
                .map(|(x, y)| elementwise(x, y, f))
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Value::array(Array::from_parts(a.shape().to_vec(), items)))
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => Err(EvalError::ArityOrShapeMismatch(
            "array and scalar operands".into(),
        )),
        (l, r) => Ok(Value::Number(f(number(l)?, number(r)?))),
    }
}

fn arithmetic(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Pow => a.powf(b),
        BinOp::Mod => {
            if b == 0.0 {
                f64::NAN
            } else {
                a - b * (a / b).floor()
            }
        }
        BinOp::IntDiv => (a / b).floor(),
        _ => f64::NAN,
    }
}

fn number(value: &Value) -> EvalResult<f64> {
    match value {
        Value::Text(s) => s.trim().parse().map_err(|_| {
            EvalError::TypeConstraintViolation(format!("`{s}` is not a number"))
        }),
        other => other.as_number().ok_or_else(|| {
            EvalError::TypeConstraintViolation(format!(
                "expected a number, got {}",
                other.type_name()
            ))
        }),
    }
}

fn stack_values(left: &Value, right: &Value) -> EvalResult<Value> {
    let as_array = |v: &Value| match v {
        Value::Array(a) => a.borrow().clone(),
        scalar => Array::list(vec![scalar.clone()]),
    };
    Ok(Value::array(shape::stack(&as_array(left), &as_array(right))?))
}

/// Ordering of two scalars; `None` when incomparable (NaN, mixed kinds).
pub fn compare(left: &Value, right: &Value) -> EvalResult<Option<Ordering>> {
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => Ok(Some(a.to_lowercase().cmp(&b.to_lowercase()))),
        (Value::Array(_), _) | (_, Value::Array(_)) => Err(EvalError::ArityOrShapeMismatch(
            "cannot order arrays".into(),
        )),
        (Value::Text(_), _) | (_, Value::Text(_)) => Ok(None),
        (a, b) => Ok(number(a)?.partial_cmp(&number(b)?)),
    }
}

/// `=`: numbers by value, text case-sensitively, composites structurally.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Unbound, Value::Number(n)) | (Value::Number(n), Value::Unbound) => *n == 0.0,
        (Value::Unbound, Value::Text(s)) | (Value::Text(s), Value::Unbound) => s.is_empty(),
        _ => left.structural_eq(right),
    }
}

/// `x in set`: membership in an array, or equality with a scalar.
pub fn member_of(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(a) => a.borrow().items().iter().any(|v| loose_eq(needle, v)),
        other => loose_eq(needle, other),
    }
}

/// Inclusive numeric bounds check used by `x in a to b`.
pub fn within(needle: &Value, from: f64, to: f64) -> bool {
    let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
    needle.as_number().is_some_and(|n| n >= lo && n <= hi)
}

/// `a to b [step s]`: inclusive, stepping toward `b`.
pub fn range(from: f64, to: f64, step: Option<f64>) -> EvalResult<Vec<f64>> {
    let step = step.unwrap_or(1.0);
    if step == 0.0 || !step.is_finite() || !from.is_finite() || !to.is_finite() {
        return Err(EvalError::InvalidRange(format!("{from} to {to} step {step}")));
    }
    let mut out = Vec::new();
    if (to - from) * step < 0.0 {
        return Ok(out);
    }
    let count = ((to - from) / step + 1e-9).floor() as usize;
    for i in 0..=count {
        out.push(from + step * i as f64);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    fn as_f64(v: EvalResult<Value>) -> f64 {
        v.unwrap().as_number().unwrap()
    }

    #[test]
    fn test_mod_and_int_div_floor() {
        assert_eq!(as_f64(binary(BinOp::Mod, &n(10.0), &n(3.0))), 1.0);
        assert_eq!(as_f64(binary(BinOp::Mod, &n(-1.0), &n(3.0))), 2.0);
        assert_eq!(as_f64(binary(BinOp::IntDiv, &n(10.0), &n(3.0))), 3.0);
        assert_eq!(as_f64(binary(BinOp::IntDiv, &n(-7.0), &n(2.0))), -4.0);
    }

    #[test]
    fn test_division_by_zero_is_ieee() {
        assert_eq!(as_f64(binary(BinOp::Div, &n(1.0), &n(0.0))), f64::INFINITY);
        assert!(as_f64(binary(BinOp::Mod, &n(1.0), &n(0.0))).is_nan());
    }

    #[test]
    fn test_array_scalar_arithmetic_rejected() {
        let arr = Value::list(vec![n(1.0), n(2.0)]);
        let err = binary(BinOp::Add, &arr, &n(1.0)).unwrap_err();
        assert!(matches!(err, EvalError::ArityOrShapeMismatch(_)));
    }

    #[test]
    fn test_range_steps() {
        assert_eq!(range(1.0, 6.0, Some(1.5)).unwrap(), vec![1.0, 2.5, 4.0, 5.5]);
        assert_eq!(range(4.0, 1.0, Some(-1.0)).unwrap(), vec![4.0, 3.0, 2.0, 1.0]);
        assert!(range(4.0, 1.0, None).unwrap().is_empty());
        assert!(matches!(
            range(1.0, 2.0, Some(0.0)),
            Err(EvalError::InvalidRange(_))
        ));
        assert!(matches!(
            range(1.0, f64::INFINITY, None),
            Err(EvalError::InvalidRange(_))
        ));
        assert!(matches!(
            range(f64::NAN, 3.0, None),
            Err(EvalError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_membership_and_comparison() {
        let set = Value::list(vec![Value::text("Oscar"), Value::text("Jane")]);
        assert!(member_of(&Value::text("Jane"), &set));
        assert!(!member_of(&Value::text("Liz"), &set));
        assert!(binary(BinOp::Lt, &Value::Unbound, &n(10.0)).unwrap().truthy());
        assert!(within(&n(99.0), 50.0, 100.0));
    }

    #[test]
    fn test_concat_formats_numbers() {
        let v = binary(BinOp::Concat, &Value::text("n="), &n(42.0)).unwrap();
        assert!(v.structural_eq(&Value::text("n=42")));
    }
}
