//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use formula_controller::eval::{Evaluator, FunctionRegistry};
use formula_controller::params::ParameterResolver;
use formula_controller::resource::{ControlResource, ControlSpec, ObjectKey};
use formula_controller::store::{
    MemoryEventRecorder, MemoryResourceStore, MemorySecretStore, ResourceStore, StoreResult,
};
use formula_controller::{ControllerConfig, Reconciler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A fixed point in time for deterministic reconciliation
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Stores and recorder shared by a reconciler under test
pub struct Harness {
    pub resources: MemoryResourceStore,
    pub secrets: MemorySecretStore,
    pub events: MemoryEventRecorder,
    pub config: ControllerConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            resources: MemoryResourceStore::new(),
            secrets: MemorySecretStore::new(),
            events: MemoryEventRecorder::new(),
            config: ControllerConfig {
                response_time_timeout: Duration::from_secs(2),
                ..ControllerConfig::default()
            },
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Reconciler over the harness stores
    pub fn reconciler(&self) -> Reconciler {
        self.reconciler_with_store(Arc::new(self.resources.clone()))
    }

    /// Reconciler over a custom resource store
    pub fn reconciler_with_store(&self, store: Arc<dyn ResourceStore>) -> Reconciler {
        let resolver =
            ParameterResolver::new(Arc::new(self.secrets.clone()), self.config.resolution_mode());
        let evaluator = Evaluator::new(Arc::new(FunctionRegistry::standard(
            self.config.response_time_timeout,
        )));
        Reconciler::new(
            store,
            Arc::new(self.events.clone()),
            resolver,
            evaluator,
            &self.config,
        )
    }

    pub async fn apply(&self, namespace: &str, name: &str, spec: ControlSpec) -> ObjectKey {
        let key = ObjectKey::new(namespace, name);
        self.resources.apply(key.clone(), spec).await;
        key
    }

    pub async fn stored(&self, key: &ObjectKey) -> ControlResource {
        self.resources
            .get(key)
            .await
            .unwrap()
            .expect("resource should exist")
    }
}

/// Resource store that changes the spec underneath the first status writes,
/// simulating a user editing the resource mid-reconciliation.
pub struct RacingStore {
    inner: MemoryResourceStore,
    races_left: AtomicUsize,
    edit: ControlSpec,
}

impl RacingStore {
    pub fn new(inner: MemoryResourceStore, races: usize, edit: ControlSpec) -> Self {
        Self {
            inner,
            races_left: AtomicUsize::new(races),
            edit,
        }
    }
}

#[async_trait]
impl ResourceStore for RacingStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ControlResource>> {
        self.inner.get(key).await
    }

    async fn update_status(&self, resource: &ControlResource) -> StoreResult<ControlResource> {
        let race = self
            .races_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if race {
            let edited = self.inner.apply(resource.key(), self.edit.clone()).await;
            // Repeated races re-apply the same spec; touch the object so the
            // version still moves under the in-flight write.
            self.inner.insert(edited).await;
        }
        self.inner.update_status(resource).await
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition().await
}
