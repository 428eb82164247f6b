//! Tree-walking evaluator for compiled formulas

use futures::future::{BoxFuture, FutureExt};
use std::cmp::Ordering;
use tokio_util::sync::CancellationToken;

use super::ast::{BinaryOp, Expression, UnaryOp};
use super::error::RuntimeError;
use super::functions::{CallContext, FunctionError, FunctionRegistry};
use super::value::Value;
use super::Context;

/// Everything a single evaluation reads
pub(crate) struct Scope<'a> {
    pub context: &'a Context,
    pub functions: &'a FunctionRegistry,
    pub cancel: &'a CancellationToken,
}

impl Scope<'_> {
    fn check_cancelled(&self) -> Result<(), RuntimeError> {
        if self.cancel.is_cancelled() {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub(crate) fn evaluate<'a>(
    expr: &'a Expression,
    scope: &'a Scope<'a>,
) -> BoxFuture<'a, Result<Value, RuntimeError>> {
    async move {
        match expr {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Variable(name) => scope
                .context
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::UnknownVariable(name.clone())),
            Expression::Unary { op, operand } => {
                let value = evaluate(operand, scope).await?;
                apply_unary(*op, value)
            }
            Expression::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                let short_circuit = *op == BinaryOp::Or;
                if logical_operand(*op, evaluate(left, scope).await?)? == short_circuit {
                    return Ok(Value::Bool(short_circuit));
                }
                logical_operand(*op, evaluate(right, scope).await?).map(Value::Bool)
            }
            Expression::Binary { op, left, right } => {
                let left = evaluate(left, scope).await?;
                let right = evaluate(right, scope).await?;
                apply_binary(*op, left, right)
            }
            Expression::Ternary {
                condition,
                then,
                otherwise,
            } => match evaluate(condition, scope).await? {
                Value::Bool(true) => evaluate(then, scope).await,
                Value::Bool(false) => evaluate(otherwise, scope).await,
                other => Err(RuntimeError::NonBooleanCondition(other.type_name())),
            },
            Expression::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(evaluate(arg, scope).await?);
                }
                scope.check_cancelled()?;

                let function = scope.functions.get(name).ok_or_else(|| RuntimeError::Function {
                    name: name.clone(),
                    source: FunctionError::Invalid("function is not registered".to_string()),
                })?;
                let ctx = CallContext::new(scope.cancel.clone());
                function
                    .call(values, &ctx)
                    .await
                    .map_err(|source| RuntimeError::Function {
                        name: name.clone(),
                        source,
                    })
            }
        }
    }
    .boxed()
}

fn logical_operand(op: BinaryOp, value: Value) -> Result<bool, RuntimeError> {
    value.as_bool().ok_or(RuntimeError::UnaryTypeMismatch {
        operator: op.symbol(),
        operand: value.type_name(),
    })
}

fn apply_unary(op: UnaryOp, value: Value) -> Result<Value, RuntimeError> {
    match (op, value) {
        (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, value) => Err(RuntimeError::UnaryTypeMismatch {
            operator: match op {
                UnaryOp::Negate => "-",
                UnaryOp::Not => "!",
            },
            operand: value.type_name(),
        }),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    let mismatch = |left: &Value, right: &Value| RuntimeError::TypeMismatch {
        operator: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    };

    match op {
        BinaryOp::Equal => Ok(Value::Bool(left == right)),
        BinaryOp::NotEqual => Ok(Value::Bool(left != right)),
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", left, right)))
            }
            _ => Err(mismatch(&left, &right)),
        },
        BinaryOp::Greater | BinaryOp::Less | BinaryOp::GreaterEqual | BinaryOp::LessEqual => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return Err(mismatch(&left, &right)),
            };
            // NaN compares false against everything.
            let result = ordering.is_some_and(|ordering| match op {
                BinaryOp::Greater => ordering == Ordering::Greater,
                BinaryOp::Less => ordering == Ordering::Less,
                BinaryOp::GreaterEqual => ordering != Ordering::Less,
                _ => ordering != Ordering::Greater,
            });
            Ok(Value::Bool(result))
        }
        BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Remainder
        | BinaryOp::Power => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(mismatch(&left, &right));
            };
            let n = match op {
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                BinaryOp::Remainder => a % b,
                _ => a.powf(*b),
            };
            Ok(Value::Number(n))
        }
        BinaryOp::And | BinaryOp::Or => {
            let a = logical_operand(op, left)?;
            let b = logical_operand(op, right)?;
            Ok(Value::Bool(if op == BinaryOp::And { a && b } else { a || b }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_concatenates_when_either_side_is_string() {
        let v = apply_binary(BinaryOp::Add, Value::from("n="), Value::Number(4.0)).unwrap();
        assert_eq!(v, Value::from("n=4"));
        let v = apply_binary(BinaryOp::Add, Value::Number(0.5), Value::from("s")).unwrap();
        assert_eq!(v, Value::from("0.5s"));
        let v = apply_binary(BinaryOp::Add, Value::Bool(true), Value::from("!")).unwrap();
        assert_eq!(v, Value::from("true!"));
    }

    #[test]
    fn test_arithmetic_requires_numbers() {
        let err = apply_binary(BinaryOp::Multiply, Value::from("a"), Value::Number(2.0)).unwrap_err();
        assert_eq!(err.to_string(), "cannot apply '*' to string and number");
        let err = apply_binary(BinaryOp::Add, Value::Bool(true), Value::Number(1.0)).unwrap_err();
        assert_eq!(err.to_string(), "cannot apply '+' to boolean and number");
    }

    #[test]
    fn test_division_and_remainder() {
        let v = apply_binary(BinaryOp::Divide, Value::Number(1.0), Value::Number(0.0)).unwrap();
        assert_eq!(v, Value::Number(f64::INFINITY));
        let v = apply_binary(BinaryOp::Remainder, Value::Number(-7.0), Value::Number(3.0)).unwrap();
        assert_eq!(v, Value::Number(-1.0));
    }

    #[test]
    fn test_comparisons() {
        let gt = |a: Value, b: Value| apply_binary(BinaryOp::Greater, a, b);
        assert_eq!(gt(Value::Number(2.0), Value::Number(1.0)).unwrap(), Value::Bool(true));
        assert_eq!(gt(Value::from("b"), Value::from("a")).unwrap(), Value::Bool(true));
        assert_eq!(gt(Value::Number(f64::NAN), Value::Number(1.0)).unwrap(), Value::Bool(false));
        assert!(gt(Value::from("2"), Value::Number(1.0)).is_err());

        let le = apply_binary(BinaryOp::LessEqual, Value::Number(1.0), Value::Number(1.0)).unwrap();
        assert_eq!(le, Value::Bool(true));
    }

    #[test]
    fn test_equality_across_types() {
        let eq = apply_binary(BinaryOp::Equal, Value::from("1"), Value::Number(1.0)).unwrap();
        assert_eq!(eq, Value::Bool(false));
        let ne = apply_binary(BinaryOp::NotEqual, Value::Bool(true), Value::Bool(false)).unwrap();
        assert_eq!(ne, Value::Bool(true));
    }

    #[test]
    fn test_unary() {
        assert_eq!(apply_unary(UnaryOp::Negate, Value::Number(2.0)).unwrap(), Value::Number(-2.0));
        assert_eq!(apply_unary(UnaryOp::Not, Value::Bool(false)).unwrap(), Value::Bool(true));
        assert!(apply_unary(UnaryOp::Not, Value::Number(0.0)).is_err());
    }
}
