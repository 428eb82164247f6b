//! Error types for formula parsing and evaluation

use std::fmt;
use thiserror::Error;

use super::functions::FunctionError;

/// A formula could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset into the formula
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

/// Failures while evaluating a parsed formula
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("no parameter '{0}' found")]
    UnknownVariable(String),

    #[error("cannot apply '{operator}' to {left} and {right}")]
    TypeMismatch {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("cannot apply '{operator}' to {operand}")]
    UnaryTypeMismatch {
        operator: &'static str,
        operand: &'static str,
    },

    #[error("ternary condition must be a boolean, got {0}")]
    NonBooleanCondition(&'static str),

    #[error("{name}(): {source}")]
    Function {
        name: String,
        #[source]
        source: FunctionError,
    },

    #[error("evaluation cancelled")]
    Cancelled,
}

/// Error returned by the evaluator.
///
/// The display text is what gets published as the resource result, so it
/// carries no prefix beyond the underlying message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl EvalError {
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Runtime(RuntimeError::Cancelled)
                | Self::Runtime(RuntimeError::Function {
                    source: FunctionError::Cancelled,
                    ..
                })
        )
    }
}
