/// The fixed table of functions callable from a template expression.
/// Kept as plain function pointers, matched on by name at parse time,
/// mirroring `ir::expr::ExprFn`'s "small fixed table" design.
use crate::ir::expr::{EvalError, EvalResult, ExprFn, Value};

pub fn lookup(name: &str) -> Option<ExprFn> {
    match name {
        "min" => Some(min as ExprFn),
        "max" => Some(max as ExprFn),
        "abs" => Some(abs as ExprFn),
        _ => None,
    }
}

fn min(args: &[Value]) -> EvalResult<Value> {
    let (a, b) = two(args)?;
    Ok(Value::Int(a.min(b)))
}

fn max(args: &[Value]) -> EvalResult<Value> {
    let (a, b) = two(args)?;
    Ok(Value::Int(a.max(b)))
}

fn abs(args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::Int(a)] => Ok(Value::Int(a.abs())),
        _ => Err(EvalError::TypeMismatch),
    }
}

fn two(args: &[Value]) -> EvalResult<(i64, i64)> {
    match args {
        [Value::Int(a), Value::Int(b)] => Ok((*a, *b)),
        _ => Err(EvalError::TypeMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_abs() {
        assert_eq!(min(&[Value::Int(3), Value::Int(1)]).unwrap(), Value::Int(1));
        assert_eq!(max(&[Value::Int(3), Value::Int(1)]).unwrap(), Value::Int(3));
        assert_eq!(abs(&[Value::Int(-4)]).unwrap(), Value::Int(4));
    }

    #[test]
    fn lookup_rejects_unknown_names() {
        assert!(lookup("frobnicate").is_none());
    }
}
