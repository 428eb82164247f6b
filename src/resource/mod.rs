//! Data model for computed-value control resources.
//!
//! A [`ControlResource`] declares a formula, typed parameters and an optional
//! recalculation interval in its spec; the controller owns the status
//! sub-document. Field names follow the wire schema (camelCase) so manifests
//! and stored objects round-trip through serde unchanged.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

mod duration;

pub use duration::{parse_duration, DurationParseError};

/// Identity of a resource: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Store-managed metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Bumped by the store on every spec change
    #[serde(default)]
    pub generation: i64,
    /// Bumped by the store on every write; used for optimistic concurrency
    #[serde(default)]
    pub resource_version: u64,
}

/// A computed-value resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResource {
    pub metadata: ObjectMeta,
    pub spec: ControlSpec,
    #[serde(default)]
    pub status: ControlStatus,
}

impl ControlResource {
    pub fn new(key: ObjectKey, spec: ControlSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                namespace: key.namespace,
                name: key.name,
                generation: 0,
                resource_version: 0,
            },
            spec,
            status: ControlStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }

    /// No interval and the current generation already evaluated: nothing to do
    /// until the spec changes.
    pub fn is_terminal(&self) -> bool {
        self.spec.interval().is_none()
            && self.status.observed_generation == self.metadata.generation
    }
}

/// Desired state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSpec {
    pub formula: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Recalculate::is_unset")]
    pub recalculate: Recalculate,
}

impl ControlSpec {
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, parameter: Parameter) -> Self {
        self.parameters.insert(name, parameter);
        self
    }

    pub fn recalculate_every(mut self, every: impl Into<String>) -> Self {
        self.recalculate.every = every.into();
        self
    }

    /// The recalculation interval, if one is set.
    pub fn interval(&self) -> Option<&str> {
        let every = self.recalculate.every.trim();
        (!every.is_empty()).then_some(every)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recalculate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub every: String,
}

impl Recalculate {
    fn is_unset(&self) -> bool {
        self.every.trim().is_empty()
    }
}

/// Kind of a declared parameter.
///
/// Unrecognized kinds are kept verbatim and resolve like numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParameterType {
    #[default]
    Number,
    String,
    Secret,
    Other(String),
}

impl ParameterType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Secret => "secret",
            Self::Other(kind) => kind,
        }
    }
}

impl From<String> for ParameterType {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "number" | "" => Self::Number,
            "string" => Self::String,
            "secret" => Self::Secret,
            _ => Self::Other(kind),
        }
    }
}

impl From<ParameterType> for String {
    fn from(kind: ParameterType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared parameter: raw value plus how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub value: String,
    #[serde(default, rename = "type")]
    pub kind: ParameterType,
}

impl Parameter {
    pub fn number(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: ParameterType::Number,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: ParameterType::String,
        }
    }

    /// A reference to a stored secret, written `<namespace>/<name>`
    pub fn secret(reference: impl Into<String>) -> Self {
        Self {
            value: reference.into(),
            kind: ParameterType::Secret,
        }
    }
}

/// Declared parameters keyed by name.
///
/// Ordered so that summaries and events are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, Parameter>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, parameter: Parameter) -> Option<Parameter> {
        self.0.insert(name.into(), parameter)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Parameter)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, Parameter)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Renders `[name(type):value, ...]`. Secret parameters show their reference,
/// never the secret contents.
impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (name, parameter)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}({}):{}", name, parameter.kind, parameter.value)?;
        }
        f.write_str("]")
    }
}

/// Observed state, written only by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlStatus {
    /// Stringified result, or the message of the last failure
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub observed_generation: i64,
    /// RFC3339 timestamp of the last successful evaluation
    #[serde(default)]
    pub observed_at: String,
}

impl ControlStatus {
    /// Parsed `observed_at`; `None` when empty or malformed.
    pub fn observed_at_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.observed_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Format a timestamp the way `observed_at` is stored (second precision, UTC).
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
