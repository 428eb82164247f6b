//! In-memory store backends for testing and local runs

use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::{StoreError, StoreResult};
use super::traits::*;
use crate::resource::{ControlResource, ControlSpec, ObjectKey};

/// In-memory resource store with optimistic concurrency
#[derive(Clone, Default)]
pub struct MemoryResourceStore {
    resources: Arc<RwLock<HashMap<ObjectKey, ControlResource>>>,
    next_version: Arc<AtomicU64>,
    status_writes: Arc<AtomicUsize>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Create a resource or replace its spec. Re-applying an identical spec
    /// leaves the resource untouched, generation and version included.
    pub async fn apply(&self, key: ObjectKey, spec: ControlSpec) -> ControlResource {
        let mut resources = self.resources.write().await;
        let resource = match resources.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let existing = entry.into_mut();
                if existing.spec != spec {
                    existing.spec = spec;
                    existing.metadata.generation += 1;
                    existing.metadata.resource_version = self.bump_version();
                }
                existing
            }
            Entry::Vacant(entry) => {
                let mut created = ControlResource::new(key.clone(), spec);
                created.metadata.generation = 1;
                created.metadata.resource_version = self.bump_version();
                entry.insert(created)
            }
        };
        debug!(
            resource = %key,
            generation = resource.metadata.generation,
            "Applied resource spec"
        );
        resource.clone()
    }

    /// Store a resource exactly as given (status included), assigning a fresh
    /// resource version.
    pub async fn insert(&self, mut resource: ControlResource) -> ControlResource {
        resource.metadata.resource_version = self.bump_version();
        self.resources
            .write()
            .await
            .insert(resource.key(), resource.clone());
        resource
    }

    pub async fn delete(&self, key: &ObjectKey) -> Option<ControlResource> {
        self.resources.write().await.remove(key)
    }

    pub async fn keys(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<_> = self.resources.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of successful status writes since creation
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ControlResource>> {
        Ok(self.resources.read().await.get(key).cloned())
    }

    async fn update_status(&self, resource: &ControlResource) -> StoreResult<ControlResource> {
        let key = resource.key();
        let mut resources = self.resources.write().await;
        let stored = resources
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(&key))?;

        if stored.metadata.resource_version != resource.metadata.resource_version {
            return Err(StoreError::conflict(format!(
                "{} was modified (resource version {} != {})",
                key, stored.metadata.resource_version, resource.metadata.resource_version
            )));
        }

        stored.status = resource.status.clone();
        stored.metadata.resource_version = self.bump_version();
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}

/// In-memory secret store
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    secrets: Arc<RwLock<HashMap<(String, String), SecretData>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one field of a secret, creating the secret if needed
    pub async fn insert(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) {
        self.secrets
            .write()
            .await
            .entry((namespace.into(), name.into()))
            .or_default()
            .insert(field.into(), value.into());
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<SecretData> {
        self.secrets
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("secret {}/{}", namespace, name)))
    }
}

/// Event sink that keeps every event in memory
#[derive(Clone, Default)]
pub struct MemoryEventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Event sink that writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => info!(
                resource = %event.object,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => warn!(
                resource = %event.object,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}
