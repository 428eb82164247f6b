//! Parameter resolution
//!
//! Turns the typed parameters declared on a resource into the flat context a
//! formula is evaluated against. Literal parameters are parsed in place;
//! secret parameters are fetched from the [`SecretStore`] concurrently.

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::eval::{Context, Value};
use crate::resource::{Parameter, ParameterType, Parameters};
use crate::store::{SecretStore, StoreError};

/// Field of a secret that holds the parameter value
pub const SECRET_VALUE_KEY: &str = "value";

/// Why a single parameter could not be resolved
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("invalid secret reference {0:?}, expected <namespace>/<name>")]
    InvalidSecretReference(String),

    #[error("secret {reference} unavailable: {reason}")]
    SecretUnavailable { reference: String, reason: String },

    #[error("secret {0} has no 'value' field")]
    MissingSecretField(String),

    #[error("secret {0} is not valid UTF-8")]
    NonUtf8Secret(String),

    #[error("cancelled")]
    Cancelled,
}

/// Every parameter that failed to resolve, by name
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ParameterResolutionError {
    pub failures: Vec<(String, ParameterError)>,
}

impl ParameterResolutionError {
    pub fn is_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|(_, err)| matches!(err, ParameterError::Cancelled))
    }
}

impl fmt::Display for ParameterResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to resolve parameters: ")?;
        for (i, (name, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", name, err)?;
        }
        Ok(())
    }
}

/// How resolution failures are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// Collect every failure and refuse to evaluate
    #[default]
    Strict,
    /// Substitute `0` for bad numbers and `""` for unavailable secrets
    Lenient,
}

/// Resolves declared parameters into an evaluation context
#[derive(Clone)]
pub struct ParameterResolver {
    secrets: Arc<dyn SecretStore>,
    mode: ResolutionMode,
}

impl ParameterResolver {
    pub fn new(secrets: Arc<dyn SecretStore>, mode: ResolutionMode) -> Self {
        Self { secrets, mode }
    }

    /// Resolve every parameter.
    ///
    /// In strict mode any failure fails the whole resolution, listing all
    /// failing parameters. Cancellation fails resolution in either mode.
    pub async fn resolve(
        &self,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Context, ParameterResolutionError> {
        let lookups = parameters.iter().map(|(name, parameter)| async move {
            let resolved = self.resolve_one(parameter, cancel).await;
            (name.clone(), parameter, resolved)
        });

        let mut context = Context::new();
        let mut failures = Vec::new();

        for (name, parameter, resolved) in join_all(lookups).await {
            match resolved {
                Ok(value) => {
                    context.insert(name, value);
                }
                Err(ParameterError::Cancelled) => failures.push((name, ParameterError::Cancelled)),
                Err(err) if self.mode == ResolutionMode::Lenient => {
                    let fallback = fallback_value(&parameter.kind);
                    warn!(parameter = %name, error = %err, fallback = %fallback, "Using fallback for unresolved parameter");
                    context.insert(name, fallback);
                }
                Err(err) => failures.push((name, err)),
            }
        }

        if failures.is_empty() {
            debug!(count = context.len(), "Resolved parameters");
            Ok(context)
        } else {
            Err(ParameterResolutionError { failures })
        }
    }

    async fn resolve_one(
        &self,
        parameter: &Parameter,
        cancel: &CancellationToken,
    ) -> Result<Value, ParameterError> {
        match &parameter.kind {
            ParameterType::String => Ok(Value::String(parameter.value.clone())),
            ParameterType::Secret => self.resolve_secret(&parameter.value, cancel).await,
            ParameterType::Number | ParameterType::Other(_) => parse_number(&parameter.value),
        }
    }

    async fn resolve_secret(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, ParameterError> {
        let (namespace, name) = reference
            .split_once('/')
            .filter(|(namespace, name)| !namespace.is_empty() && !name.is_empty())
            .ok_or_else(|| ParameterError::InvalidSecretReference(reference.to_string()))?;

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ParameterError::Cancelled),
            fetched = self.secrets.get(namespace, name) => fetched,
        };

        let data = fetched.map_err(|err: StoreError| ParameterError::SecretUnavailable {
            reference: reference.to_string(),
            reason: err.to_string(),
        })?;
        let bytes = data
            .get(SECRET_VALUE_KEY)
            .ok_or_else(|| ParameterError::MissingSecretField(reference.to_string()))?;
        let value = String::from_utf8(bytes.clone())
            .map_err(|_| ParameterError::NonUtf8Secret(reference.to_string()))?;
        Ok(Value::String(value))
    }
}

fn parse_number(raw: &str) -> Result<Value, ParameterError> {
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(Value::Number)
        .ok_or_else(|| ParameterError::InvalidNumber(raw.to_string()))
}

fn fallback_value(kind: &ParameterType) -> Value {
    match kind {
        ParameterType::Secret | ParameterType::String => Value::String(String::new()),
        ParameterType::Number | ParameterType::Other(_) => Value::Number(0.0),
    }
}
