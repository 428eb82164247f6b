//! Formula evaluation engine
//!
//! Formulas are arithmetic, string and boolean expressions over named
//! parameters, with calls into a [`FunctionRegistry`] of extension functions:
//! - Arithmetic: `+ - * / % **`
//! - Comparison: `== != > < >= <=`
//! - Logical: `&& || !` and the ternary `cond ? a : b`
//! - String concatenation with `+`
//! - Variables as bare identifiers or `[bracketed names]`
//!
//! Compilation and evaluation are separate steps so a formula can be checked
//! for syntax (and unknown functions) before any parameter is resolved.

pub mod ast;
pub mod error;
mod evaluator;
pub mod functions;
pub mod parser;
pub mod response_time;
pub mod tokenizer;
pub mod value;

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use ast::{BinaryOp, Expression, UnaryOp};
pub use error::{EvalError, ParseError, RuntimeError};
pub use functions::{CallContext, ExtensionFunction, FunctionError, FunctionRegistry};
pub use parser::FormulaParser;
pub use response_time::ResponseTime;
pub use value::{format_number, Value};

/// Resolved parameters a formula is evaluated against
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = Context::new();
        for (name, value) in iter {
            context.insert(name, value);
        }
        context
    }
}

/// A parsed formula ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    source: String,
    expression: Expression,
}

impl CompiledFormula {
    /// The formula text as written
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Normalised rendering of the parsed formula
    pub fn canonical(&self) -> String {
        self.expression.to_string()
    }
}

/// Compiles and evaluates formulas against an injected function registry
#[derive(Debug, Clone)]
pub struct Evaluator {
    functions: Arc<FunctionRegistry>,
}

impl Evaluator {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Parse `formula`, rejecting syntax errors and unknown functions
    pub fn compile(&self, formula: &str) -> Result<CompiledFormula, EvalError> {
        let expression = FormulaParser::new(&self.functions).parse(formula)?;
        Ok(CompiledFormula {
            source: formula.to_string(),
            expression,
        })
    }

    /// Evaluate a compiled formula
    pub async fn evaluate(
        &self,
        formula: &CompiledFormula,
        context: &Context,
        cancel: &CancellationToken,
    ) -> Result<Value, EvalError> {
        if cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled.into());
        }

        let scope = evaluator::Scope {
            context,
            functions: &self.functions,
            cancel,
        };
        let value = evaluator::evaluate(&formula.expression, &scope).await?;
        debug!(formula = %formula.source, result = %value, "Evaluated formula");
        Ok(value)
    }

    /// Compile and evaluate in one step
    pub async fn evaluate_str(
        &self,
        formula: &str,
        context: &Context,
        cancel: &CancellationToken,
    ) -> Result<Value, EvalError> {
        let compiled = self.compile(formula)?;
        self.evaluate(&compiled, context, cancel).await
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(Arc::new(FunctionRegistry::standard(
            response_time::DEFAULT_TIMEOUT,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn eval(formula: &str, context: &Context) -> Result<Value, EvalError> {
        Evaluator::default()
            .evaluate_str(formula, context, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_two_plus_two_is_four() {
        let value = eval("2+2", &Context::new()).await.unwrap();
        assert_eq!(value.to_string(), "4");
    }

    #[tokio::test]
    async fn test_parameters_and_functions() {
        let context = Context::new().set("x", 10.0).set("name", "temp");
        let value = eval("trunc(x / 3, 2) + ' ' + name", &context).await.unwrap();
        assert_eq!(value, Value::from("3.33 temp"));

        let value = eval("strlen(name) * 2", &context).await.unwrap();
        assert_eq!(value, Value::Number(8.0));

        let value = eval("x > 5 ? 'high' : 'low'", &context).await.unwrap();
        assert_eq!(value, Value::from("high"));

        let value = eval("2 ** 3 ** 2", &context).await.unwrap();
        assert_eq!(value.to_string(), "512");

        let context = Context::new().set("user name", "ada");
        let value = eval("[user name] + '!'", &context).await.unwrap();
        assert_eq!(value, Value::from("ada!"));
    }

    #[tokio::test]
    async fn test_number_results_format_like_go() {
        assert_eq!(eval("10 / 4", &Context::new()).await.unwrap().to_string(), "2.5");
        assert_eq!(eval("0.1 + 0.2", &Context::new()).await.unwrap().to_string(), "0.30000000000000004");
        assert_eq!(eval("1e21 + 0", &Context::new()).await.unwrap().to_string(), "1e+21");
        assert_eq!(eval("1 / 0", &Context::new()).await.unwrap().to_string(), "+Inf");
    }

    #[tokio::test]
    async fn test_errors_carry_readable_messages() {
        let err = eval("2 +", &Context::new()).await.unwrap_err();
        assert!(err.is_parse());
        assert_eq!(err.to_string(), "unexpected end of formula at position 3");

        let err = eval("missing * 2", &Context::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "no parameter 'missing' found");

        let err = eval("unknown(1)", &Context::new()).await.unwrap_err();
        assert!(err.is_parse());

        let err = eval("1 ? 2 : 3", &Context::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "ternary condition must be a boolean, got number");

        let err = eval("trunc(1)", &Context::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "trunc(): expected 2 argument(s), got 1");
    }

    #[tokio::test]
    async fn test_logical_operators_short_circuit() {
        let context = Context::new().set("flag", true);
        // The right side would fail with an unknown variable if evaluated.
        assert_eq!(eval("flag || missing", &context).await.unwrap(), Value::Bool(true));
        assert_eq!(eval("!flag && missing", &context).await.unwrap(), Value::Bool(false));
        assert!(eval("flag && missing", &context).await.is_err());
        assert!(eval("1 && true", &context).await.is_err());
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl ExtensionFunction for Counting {
        async fn call(&self, _args: Vec<Value>, _ctx: &CallContext) -> Result<Value, FunctionError> {
            Ok(Value::Number(self.0.fetch_add(1, Ordering::SeqCst) as f64))
        }
    }

    #[tokio::test]
    async fn test_injected_registry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = FunctionRegistry::new().with("tick", Counting(calls.clone()));
        let evaluator = Evaluator::new(Arc::new(registry));

        let compiled = evaluator.compile("tick() + tick()").unwrap();
        assert_eq!(compiled.canonical(), "tick() + tick()");
        let value = evaluator
            .evaluate(&compiled, &Context::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, Value::Number(1.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Functions of the standard set are absent from a custom registry.
        assert!(evaluator.compile("trunc(1, 2)").unwrap_err().is_parse());
    }

    #[tokio::test]
    async fn test_cancelled_evaluation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Evaluator::default()
            .evaluate_str("strlen('abc')", &Context::new(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_canonical_text() {
        let compiled = Evaluator::default().compile("(a+b)*trunc( c,2 )").unwrap();
        assert_eq!(compiled.canonical(), "(a + b) * trunc(c, 2)");
        assert_eq!(compiled.source(), "(a+b)*trunc( c,2 )");
    }
}
