//! Built-in spreadsheet functions.
//!
//! Names resolve case-insensitively and only when no user callable of the
//! same name exists.

use crate::error::{EvalError, EvalResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Sqrt,
    Abs,
    Round,
    Sum,
    Average,
    Min,
    Max,
    Len,
    Mid,
    Left,
    Right,
    Upper,
    Lower,
    TextSplit,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            "round" => Self::Round,
            "sum" => Self::Sum,
            "average" => Self::Average,
            "min" => Self::Min,
            "max" => Self::Max,
            "len" => Self::Len,
            "mid" => Self::Mid,
            "left" => Self::Left,
            "right" => Self::Right,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "textsplit" => Self::TextSplit,
            _ => return None,
        })
    }

    pub fn call(self, args: &[Value]) -> EvalResult<Value> {
        match self {
            Self::Sqrt => unary(args, "SQRT", f64::sqrt),
            Self::Abs => unary(args, "ABS", f64::abs),
            Self::Round => {
                let x = num_arg(args, 0, "ROUND")?;
                let digits = match args.get(1) {
                    Some(v) => to_number(v, "ROUND")?,
                    None => 0.0,
                };
                let scale = 10f64.powi(digits as i32);
                Ok(Value::Number((x * scale).round() / scale))
            }
            Self::Sum => Ok(Value::Number(numbers(args)?.iter().sum())),
            Self::Average => {
                let ns = numbers(args)?;
                if ns.is_empty() {
                    return Ok(Value::Number(f64::NAN));
                }
                Ok(Value::Number(ns.iter().sum::<f64>() / ns.len() as f64))
            }
            Self::Min => Ok(Value::Number(
                numbers(args)?.into_iter().fold(f64::INFINITY, f64::min),
            )),
            Self::Max => Ok(Value::Number(
                numbers(args)?.into_iter().fold(f64::NEG_INFINITY, f64::max),
            )),
            Self::Len => match args {
                [Value::Array(a)] => Ok(Value::Number(a.borrow().len() as f64)),
                [v] => Ok(Value::Number(v.to_string().chars().count() as f64)),
                _ => Err(arity("LEN", 1, args.len())),
            },
            Self::Mid => {
                let s = text_arg(args, 0, "MID")?;
                let start = num_arg(args, 1, "MID")?.max(1.0) as usize - 1;
                let len = num_arg(args, 2, "MID")?.max(0.0) as usize;
                Ok(Value::Text(s.chars().skip(start).take(len).collect()))
            }
            Self::Left => {
                let s = text_arg(args, 0, "LEFT")?;
                let n = optional_count(args, "LEFT")?;
                Ok(Value::Text(s.chars().take(n).collect()))
            }
            Self::Right => {
                let s = text_arg(args, 0, "RIGHT")?;
                let n = optional_count(args, "RIGHT")?;
                let total = s.chars().count();
                Ok(Value::Text(s.chars().skip(total.saturating_sub(n)).collect()))
            }
            Self::Upper => Ok(Value::Text(text_arg(args, 0, "UPPER")?.to_uppercase())),
            Self::Lower => Ok(Value::Text(text_arg(args, 0, "LOWER")?.to_lowercase())),
            Self::TextSplit => {
                let s = text_arg(args, 0, "TEXTSPLIT")?;
                let delim = match args.get(1) {
                    Some(d) => d.to_string(),
                    None => " ".to_string(),
                };
                let parts: Vec<Value> = if delim.is_empty() {
                    vec![Value::Text(s)]
                } else {
                    s.split(delim.as_str())
                        .filter(|p| !p.is_empty())
                        .map(Value::text)
                        .collect()
                };
                Ok(Value::list(parts))
            }
        }
    }
}

fn arity(name: &str, expected: usize, got: usize) -> EvalError {
    EvalError::ArityOrShapeMismatch(format!("{name} expects {expected} argument(s), got {got}"))
}

fn unary(args: &[Value], name: &str, f: fn(f64) -> f64) -> EvalResult<Value> {
    if args.len() != 1 {
        return Err(arity(name, 1, args.len()));
    }
    Ok(Value::Number(f(num_arg(args, 0, name)?)))
}

fn to_number(v: &Value, name: &str) -> EvalResult<f64> {
    match v {
        Value::Text(s) => s.trim().parse().map_err(|_| {
            EvalError::TypeConstraintViolation(format!("{name}: `{s}` is not a number"))
        }),
        other => other.as_number().ok_or_else(|| {
            EvalError::TypeConstraintViolation(format!(
                "{name}: expected a number, got {}",
                other.type_name()
            ))
        }),
    }
}

fn num_arg(args: &[Value], i: usize, name: &str) -> EvalResult<f64> {
    let v = args.get(i).ok_or_else(|| arity(name, i + 1, args.len()))?;
    to_number(v, name)
}

fn text_arg(args: &[Value], i: usize, name: &str) -> EvalResult<String> {
    let v = args.get(i).ok_or_else(|| arity(name, i + 1, args.len()))?;
    Ok(v.to_string())
}

fn optional_count(args: &[Value], name: &str) -> EvalResult<usize> {
    match args.get(1) {
        Some(v) => Ok(to_number(v, name)?.max(0.0) as usize),
        None => Ok(1),
    }
}

/// Every number in the arguments, arrays flattened; blanks are skipped.
fn numbers(args: &[Value]) -> EvalResult<Vec<f64>> {
    let mut out = Vec::new();
    for arg in args {
        collect_numbers(arg, &mut out)?;
    }
    Ok(out)
}

fn collect_numbers(v: &Value, out: &mut Vec<f64>) -> EvalResult<()> {
    match v {
        Value::Array(a) => {
            for item in a.borrow().items() {
                collect_numbers(item, out)?;
            }
        }
        Value::Unbound => {}
        Value::Number(n) => out.push(*n),
        Value::Bool(b) => out.push(if *b { 1.0 } else { 0.0 }),
        other => {
            return Err(EvalError::TypeConstraintViolation(format!(
                "expected numbers, got {}",
                other.type_name()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Value {
        Builtin::from_name(name).unwrap().call(&args).unwrap()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(Builtin::from_name("SQRT"), Some(Builtin::Sqrt));
        assert_eq!(Builtin::from_name("TextSplit"), Some(Builtin::TextSplit));
        assert_eq!(Builtin::from_name("Reverse"), None);
    }

    #[test]
    fn test_sum_flattens_and_skips_blanks() {
        let v = call(
            "sum",
            vec![
                Value::list(vec![Value::Number(51.0), Value::Unbound]),
                Value::Number(0.055),
            ],
        );
        assert!((v.as_number().unwrap() - 51.055).abs() < 1e-9);
    }

    #[test]
    fn test_text_functions() {
        let word = Value::text("SINED");
        assert_eq!(
            call("mid", vec![word.clone(), Value::Number(2.0), Value::Number(1.0)]).to_string(),
            "I"
        );
        assert_eq!(call("len", vec![word.clone()]).as_number(), Some(5.0));
        assert_eq!(call("right", vec![word, Value::Number(2.0)]).to_string(), "ED");
        let parts = call("textsplit", vec![Value::text("Jane Doe"), Value::text(" ")]);
        assert_eq!(parts.shape(), vec![2]);
    }

    #[test]
    fn test_sqrt_arity() {
        let err = Builtin::Sqrt.call(&[]).unwrap_err();
        assert!(matches!(err, EvalError::ArityOrShapeMismatch(_)));
    }
}
