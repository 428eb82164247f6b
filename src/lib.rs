//! # Formula Controller
//!
//! Keeps computed-value resources up to date. Each resource declares a
//! formula, typed parameters (literals or references to stored secrets) and
//! an optional recalculation interval; the controller evaluates the formula
//! and publishes the result to the resource status.
//!
//! ## Usage
//!
//! ```bash
//! formulactl eval "trunc(a / 3, 2)" -p a=number:10
//! formulactl run --manifests resources.yaml --secrets secrets.yaml
//! ```
//!
//! ## Modules
//!
//! - `resource` - Resource data model, wire format and duration strings
//! - `decide` - Whether a resource needs recomputing, and when to look again
//! - `params` - Resolution of declared parameters into an evaluation context
//! - `eval` - Formula tokenizer, parser and evaluator with extension functions
//! - `controller` - Reconciliation of a single resource
//! - `runtime` - Work-queue driver running reconciliations concurrently
//! - `store` - Resource, secret and event collaborators with in-memory backends
//! - `config` - Controller configuration from YAML and environment
//! - `error` - Error types with stable error codes
pub mod config;
pub mod controller;
pub mod decide;
pub mod error;
pub mod eval;
pub mod params;
pub mod resource;
pub mod runtime;
pub mod store;

pub use config::ControllerConfig;
pub use controller::{ReconcileAction, Reconciler};
pub use decide::{decide, Decision};
pub use error::{ControllerError, Result};
pub use eval::{Evaluator, FunctionRegistry};
pub use params::{ParameterResolver, ResolutionMode};
pub use runtime::Controller;
