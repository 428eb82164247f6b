//! Reconciliation of a single resource
//!
//! One invocation fetches the resource, decides whether its formula needs
//! evaluating, resolves parameters, evaluates, and publishes the outcome to
//! the resource status. The returned [`ReconcileAction`] tells the invoker
//! when to come back.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ControllerConfig;
use crate::decide::{decide, next_wakeup, Decision};
use crate::error::{ControllerError, Result};
use crate::eval::Evaluator;
use crate::params::ParameterResolver;
use crate::resource::{format_timestamp, ControlResource, ObjectKey};
use crate::store::{Event, EventRecorder, EventType, ResourceStore};

/// Reason of the event emitted after a successful evaluation
pub const REASON_CALCULATION: &str = "Calculation";
/// Reason of the event emitted when evaluation fails
pub const REASON_CALCULATION_FAILED: &str = "CalculationFailed";

/// What the invoker should do after an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileAction {
    pub requeue_after: Option<Duration>,
}

impl ReconcileAction {
    /// Nothing scheduled; wait for the resource to change
    pub fn await_change() -> Self {
        Self { requeue_after: None }
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

/// One pass over a resource; a conflict on publish asks for another.
enum Pass {
    Done(ReconcileAction),
    Conflict,
}

/// Drives resources toward an evaluated status
#[derive(Clone)]
pub struct Reconciler {
    resources: Arc<dyn ResourceStore>,
    recorder: Arc<dyn EventRecorder>,
    resolver: ParameterResolver,
    evaluator: Evaluator,
    error_backoff: Duration,
    max_conflict_retries: u32,
}

impl Reconciler {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        recorder: Arc<dyn EventRecorder>,
        resolver: ParameterResolver,
        evaluator: Evaluator,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            resources,
            recorder,
            resolver,
            evaluator,
            error_backoff: config.error_backoff,
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    /// Reconcile `key` against the current wall clock
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileAction> {
        self.reconcile_at(key, Utc::now(), cancel).await
    }

    /// Reconcile `key` as if the time were `now`.
    ///
    /// A conflicting status write re-runs the whole pass against a fresh copy
    /// of the resource, at most `max_conflict_retries` extra times.
    #[instrument(skip(self, key, cancel), fields(namespace = %key.namespace, name = %key.name))]
    pub async fn reconcile_at(
        &self,
        key: &ObjectKey,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileAction> {
        let attempts = self.max_conflict_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.pass(key, now, cancel).await? {
                Pass::Done(action) => return Ok(action),
                Pass::Conflict => {
                    debug!(attempt, "Status update conflicted, retrying with a fresh copy");
                }
            }
        }

        warn!(attempts, "Giving up after repeated status conflicts");
        Err(ControllerError::conflict(key.clone(), attempts))
    }

    async fn pass(
        &self,
        key: &ObjectKey,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Pass> {
        self.check_cancelled(key, cancel)?;
        let Some(mut resource) = self.resources.get(key).await? else {
            debug!("Resource is gone, nothing to do");
            return Ok(Pass::Done(ReconcileAction::await_change()));
        };

        let decision = decide(&resource, now);
        debug!(generation = resource.generation(), %decision, "Decided");
        match decision {
            Decision::Skip => return Ok(Pass::Done(ReconcileAction::await_change())),
            Decision::WaitUntil(wait) => return Ok(Pass::Done(ReconcileAction::requeue(wait))),
            Decision::RecomputeNow => {}
        }

        match self.calculate(&resource, cancel).await {
            Ok(outcome) => {
                // A bad interval is the invoker's problem; nothing is published.
                let wakeup = next_wakeup(&resource.spec).map_err(|err| {
                    ControllerError::schedule(resource.spec.recalculate.every.clone(), err)
                })?;

                resource.status.result = outcome.result.clone();
                resource.status.observed_at = format_timestamp(now);
                if resource.status.observed_generation != resource.generation() {
                    resource.status.observed_generation = resource.generation();
                }

                if !self.publish(&resource, cancel).await? {
                    return Ok(Pass::Conflict);
                }
                info!(result = %outcome.result, "Published result");
                self.recorder.record(Event::new(
                    resource.key(),
                    EventType::Normal,
                    REASON_CALCULATION,
                    format!(
                        "{} = {} | {}",
                        outcome.canonical, outcome.result, resource.spec.parameters
                    ),
                ));

                Ok(Pass::Done(match wakeup {
                    Some(interval) => ReconcileAction::requeue(interval),
                    None => ReconcileAction::await_change(),
                }))
            }
            Err(Failure::Cancelled) => Err(ControllerError::cancelled(key.clone())),
            Err(Failure::Message(message)) => {
                resource.status.result = message.clone();

                if !self.publish(&resource, cancel).await? {
                    return Ok(Pass::Conflict);
                }
                warn!(error = %message, backoff = ?self.error_backoff, "Calculation failed");
                self.recorder.record(Event::new(
                    resource.key(),
                    EventType::Warning,
                    REASON_CALCULATION_FAILED,
                    message,
                ));

                Ok(Pass::Done(ReconcileAction::requeue(self.error_backoff)))
            }
        }
    }

    /// Compile, resolve and evaluate.
    async fn calculate(
        &self,
        resource: &ControlResource,
        cancel: &CancellationToken,
    ) -> std::result::Result<Outcome, Failure> {
        let compiled = self
            .evaluator
            .compile(&resource.spec.formula)
            .map_err(|err| Failure::Message(err.to_string()))?;

        let context = self
            .resolver
            .resolve(&resource.spec.parameters, cancel)
            .await
            .map_err(|err| {
                if err.is_cancelled() {
                    Failure::Cancelled
                } else {
                    Failure::Message(err.to_string())
                }
            })?;

        let value = self
            .evaluator
            .evaluate(&compiled, &context, cancel)
            .await
            .map_err(|err| {
                if err.is_cancelled() {
                    Failure::Cancelled
                } else {
                    Failure::Message(err.to_string())
                }
            })?;

        Ok(Outcome {
            canonical: compiled.canonical(),
            result: value.to_string(),
        })
    }

    /// Write the status; `Ok(false)` when the stored copy changed or vanished
    /// and the pass has to start over.
    async fn publish(&self, resource: &ControlResource, cancel: &CancellationToken) -> Result<bool> {
        self.check_cancelled(&resource.key(), cancel)?;
        match self.resources.update_status(resource).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_conflict() || err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn check_cancelled(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(ControllerError::cancelled(key.clone()))
        } else {
            Ok(())
        }
    }
}

struct Outcome {
    canonical: String,
    result: String,
}

enum Failure {
    Cancelled,
    Message(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::FunctionRegistry;
    use crate::params::ResolutionMode;
    use crate::resource::{ControlSpec, Parameter};
    use crate::store::{MemoryEventRecorder, MemoryResourceStore, MemorySecretStore};
    use chrono::TimeZone;

    struct Fixture {
        store: MemoryResourceStore,
        events: MemoryEventRecorder,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let store = MemoryResourceStore::new();
        let events = MemoryEventRecorder::new();
        let resolver = ParameterResolver::new(Arc::new(MemorySecretStore::new()), ResolutionMode::Strict);
        let evaluator = Evaluator::new(Arc::new(FunctionRegistry::standard(Duration::from_secs(1))));
        let reconciler = Reconciler::new(
            Arc::new(store.clone()),
            Arc::new(events.clone()),
            resolver,
            evaluator,
            &ControllerConfig::default(),
        );
        Fixture {
            store,
            events,
            reconciler,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_an_error() {
        let f = fixture();
        let action = f
            .reconciler
            .reconcile_at(&ObjectKey::new("ns", "gone"), now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(action, ReconcileAction::await_change());
        assert_eq!(f.store.status_writes(), 0);
    }

    #[tokio::test]
    async fn test_success_publishes_and_records_event() {
        let f = fixture();
        let key = ObjectKey::new("ns", "sum");
        let spec = ControlSpec::new("a+b")
            .with_parameter("a", Parameter::number("2"))
            .with_parameter("b", Parameter::number("3"))
            .recalculate_every("1m");
        f.store.apply(key.clone(), spec).await;

        let action = f
            .reconciler
            .reconcile_at(&key, now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(action, ReconcileAction::requeue(Duration::from_secs(60)));

        let stored = f.store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.status.result, "5");
        assert_eq!(stored.status.observed_generation, 1);
        assert_eq!(stored.status.observed_at, "2024-05-01T12:00:00Z");

        let events = f.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Normal);
        assert_eq!(events[0].reason, REASON_CALCULATION);
        assert_eq!(events[0].message, "a + b = 5 | [a(number):2, b(number):3]");
    }

    #[tokio::test]
    async fn test_parse_error_is_published_with_backoff() {
        let f = fixture();
        let key = ObjectKey::new("ns", "broken");
        f.store.apply(key.clone(), ControlSpec::new("2 +")).await;

        let action = f
            .reconciler
            .reconcile_at(&key, now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(action, ReconcileAction::requeue(Duration::from_secs(3)));

        let stored = f.store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.status.result, "unexpected end of formula at position 3");
        assert_eq!(stored.status.observed_generation, 0);
        assert!(stored.status.observed_at.is_empty());

        let events = f.events.events();
        assert_eq!(events[0].event_type, EventType::Warning);
        assert_eq!(events[0].reason, REASON_CALCULATION_FAILED);
    }

    #[tokio::test]
    async fn test_bad_interval_surfaces_without_publishing() {
        let f = fixture();
        let key = ObjectKey::new("ns", "bad-interval");
        f.store
            .apply(key.clone(), ControlSpec::new("1").recalculate_every("often"))
            .await;

        let err = f
            .reconciler
            .reconcile_at(&key, now(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Schedule { .. }));
        assert_eq!(f.store.status_writes(), 0);
        assert!(f.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_invocation_never_writes() {
        let f = fixture();
        let key = ObjectKey::new("ns", "c");
        f.store.apply(key.clone(), ControlSpec::new("1")).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = f.reconciler.reconcile_at(&key, now(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(f.store.status_writes(), 0);
    }
}
