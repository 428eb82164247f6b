//! Collaborator interfaces consumed by the controller

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::StoreResult;
use crate::resource::{ControlResource, ObjectKey};

/// Fields of a stored secret.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Durable storage for control resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource; `Ok(None)` when it does not exist
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ControlResource>>;

    /// Replace the status sub-document.
    ///
    /// Optimistic: fails with `StoreError::Conflict` when the stored
    /// resource version differs from `resource.metadata.resource_version`.
    /// Either the whole status is written or nothing is.
    async fn update_status(&self, resource: &ControlResource) -> StoreResult<ControlResource>;
}

/// Storage for sensitive parameter values
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch all fields of the secret `namespace/name`
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<SecretData>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Warning => f.write_str("Warning"),
        }
    }
}

/// An observability event attached to a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub object: ObjectKey,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        object: ObjectKey,
        event_type: EventType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object,
            event_type,
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Fire-and-forget event sink; must not block the caller
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}
