//! Extension functions callable from formulas
//!
//! Functions are looked up in a [`FunctionRegistry`] that is built once and
//! handed to the evaluator, so the set of available functions is explicit per
//! evaluator rather than global.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::response_time::ResponseTime;
use super::value::Value;

/// Digits of the exact decimal expansion of any finite f64 fit in this many
/// fractional places.
const EXACT_FRACTION_DIGITS: usize = 1100;

/// Largest `digits` argument accepted by `trunc`
pub const MAX_TRUNC_DIGITS: usize = 1000;

/// Errors raised by extension functions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("expected {expected} argument(s), got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("argument {index} must be a {expected}, got {actual}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("cancelled")]
    Cancelled,
}

/// Per-call context handed to every extension function
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A named operation callable from a formula
#[async_trait]
pub trait ExtensionFunction: Send + Sync {
    async fn call(&self, args: Vec<Value>, ctx: &CallContext) -> Result<Value, FunctionError>;
}

/// Mapping from function name to implementation
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<dyn ExtensionFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set: `trunc`, `strlen` and `responseTime`
    pub fn standard(response_timeout: Duration) -> Self {
        Self::new()
            .with("trunc", Trunc)
            .with("strlen", Strlen)
            .with("responseTime", ResponseTime::new(response_timeout))
    }

    /// Add or replace a function
    pub fn with(mut self, name: impl Into<String>, function: impl ExtensionFunction + 'static) -> Self {
        self.register(name, Arc::new(function));
        self
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn ExtensionFunction>) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExtensionFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

pub fn expect_arity(args: &[Value], expected: usize) -> Result<(), FunctionError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(FunctionError::Arity {
            expected,
            actual: args.len(),
        })
    }
}

pub fn number_arg(args: &[Value], index: usize) -> Result<f64, FunctionError> {
    let value = &args[index];
    value.as_number().ok_or(FunctionError::ArgumentType {
        index: index + 1,
        expected: "number",
        actual: value.type_name(),
    })
}

pub fn string_arg(args: &[Value], index: usize) -> Result<&str, FunctionError> {
    let value = &args[index];
    value.as_str().ok_or(FunctionError::ArgumentType {
        index: index + 1,
        expected: "string",
        actual: value.type_name(),
    })
}

/// Render `x` with exactly `digits` fractional places.
///
/// Works on the exact decimal expansion of `x` and breaks ties away from
/// zero. Negative `digits` yields the shortest representation.
pub fn fixed_point(x: f64, digits: i64) -> Result<String, FunctionError> {
    if !x.is_finite() {
        return Err(FunctionError::Invalid(format!(
            "cannot truncate non-finite value {}",
            x
        )));
    }
    if digits < 0 {
        return Ok(x.to_string());
    }
    let digits = usize::try_from(digits)
        .ok()
        .filter(|d| *d <= MAX_TRUNC_DIGITS)
        .ok_or_else(|| {
            FunctionError::Invalid(format!(
                "digits must be at most {}, got {}",
                MAX_TRUNC_DIGITS, digits
            ))
        })?;

    let exact = format!("{:.*}", EXACT_FRACTION_DIGITS, x.abs());
    let (whole, fraction) = exact.split_once('.').unwrap_or((exact.as_str(), ""));

    let mut kept: Vec<u8> = whole
        .bytes()
        .chain(fraction.bytes().take(digits))
        .collect();
    let round_up = fraction.as_bytes().get(digits).is_some_and(|d| *d >= b'5');

    if round_up {
        let mut carry = true;
        for digit in kept.iter_mut().rev() {
            if *digit == b'9' {
                *digit = b'0';
            } else {
                *digit += 1;
                carry = false;
                break;
            }
        }
        if carry {
            kept.insert(0, b'1');
        }
    }

    let whole_len = kept.len() - digits;
    let mut out = String::with_capacity(kept.len() + 2);
    if x.is_sign_negative() {
        out.push('-');
    }
    out.extend(kept[..whole_len].iter().map(|&b| char::from(b)));
    if digits > 0 {
        out.push('.');
        out.extend(kept[whole_len..].iter().map(|&b| char::from(b)));
    }
    Ok(out)
}

/// `trunc(x, digits)`: fixed-point string of `x` with `digits` decimals
pub struct Trunc;

#[async_trait]
impl ExtensionFunction for Trunc {
    async fn call(&self, args: Vec<Value>, _ctx: &CallContext) -> Result<Value, FunctionError> {
        expect_arity(&args, 2)?;
        let x = number_arg(&args, 0)?;
        let digits = number_arg(&args, 1)?;
        if !digits.is_finite() {
            return Err(FunctionError::Invalid(format!(
                "digits must be finite, got {}",
                digits
            )));
        }
        // Fractional digit counts are truncated toward zero.
        let digits = digits.trunc() as i64;
        fixed_point(x, digits).map(Value::String)
    }
}

/// `strlen(s)`: number of characters in `s`
pub struct Strlen;

#[async_trait]
impl ExtensionFunction for Strlen {
    async fn call(&self, args: Vec<Value>, _ctx: &CallContext) -> Result<Value, FunctionError> {
        expect_arity(&args, 1)?;
        let s = string_arg(&args, 0)?;
        Ok(Value::Number(s.chars().count() as f64))
    }
}
