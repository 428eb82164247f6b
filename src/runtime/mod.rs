//! Reference invoker for the reconciler
//!
//! Each watched resource gets its own task, so at most one invocation per
//! resource is in flight. A shared semaphore bounds how many invocations run
//! at once across all resources. Requeue requests become timers; retryable
//! invocation errors back off exponentially, the rest wait the maximum delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::controller::Reconciler;
use crate::error::ControllerError;
use crate::resource::ObjectKey;

/// Capped exponential backoff for failed invocations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureBackoff {
    base: Duration,
    max: Duration,
}

impl FailureBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after `failures` consecutive failures (the first failure is 0)
    pub fn delay(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay before retrying after `err`. Errors that need a config or spec
    /// change get the maximum delay.
    pub fn delay_for(&self, err: &ControllerError, failures: u32) -> Duration {
        if err.is_retryable() {
            self.delay(failures)
        } else {
            self.max
        }
    }
}

struct KeyWorker {
    wake: Arc<Notify>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Drives a set of resources through the reconciler
pub struct Controller {
    reconciler: Arc<Reconciler>,
    permits: Arc<Semaphore>,
    backoff: FailureBackoff,
    shutdown: CancellationToken,
    workers: Mutex<HashMap<ObjectKey, KeyWorker>>,
}

impl Controller {
    pub fn new(reconciler: Reconciler, config: &ControllerConfig) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            permits: Arc::new(Semaphore::new(config.workers)),
            backoff: FailureBackoff::new(config.failure_backoff_base, config.failure_backoff_max),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start reconciling `key` if it is not watched yet
    pub async fn watch(&self, key: ObjectKey) {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&key) || self.shutdown.is_cancelled() {
            return;
        }
        let worker = self.spawn(key.clone());
        workers.insert(key, worker);
    }

    /// Reconcile `key` now instead of at its next scheduled time
    pub async fn notify(&self, key: &ObjectKey) {
        let workers = self.workers.lock().await;
        match workers.get(key) {
            Some(worker) => worker.wake.notify_one(),
            None => {
                drop(workers);
                self.watch(key.clone()).await;
            }
        }
    }

    /// Stop reconciling `key`, cancelling an in-flight invocation
    pub async fn forget(&self, key: &ObjectKey) {
        let worker = self.workers.lock().await.remove(key);
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(err) = worker.task.await {
                warn!(resource = %key, error = %err, "Resource worker ended abnormally");
            }
        }
    }

    pub async fn watched(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<_> = self.workers.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cancel every worker and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let workers: Vec<_> = self.workers.lock().await.drain().collect();
        info!(count = workers.len(), "Stopping resource workers");
        for (key, worker) in workers {
            if let Err(err) = worker.task.await {
                warn!(resource = %key, error = %err, "Resource worker ended abnormally");
            }
        }
    }

    fn spawn(&self, key: ObjectKey) -> KeyWorker {
        let wake = Arc::new(Notify::new());
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_key(
            key,
            self.reconciler.clone(),
            self.permits.clone(),
            self.backoff,
            wake.clone(),
            cancel.clone(),
        ));
        KeyWorker { wake, cancel, task }
    }
}

async fn run_key(
    key: ObjectKey,
    reconciler: Arc<Reconciler>,
    permits: Arc<Semaphore>,
    backoff: FailureBackoff,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    debug!(resource = %key, "Resource worker started");

    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let outcome = reconciler.reconcile(&key, &cancel).await;
        drop(permit);

        let wait = match outcome {
            Ok(action) => {
                failures = 0;
                action.requeue_after
            }
            Err(err) if err.is_cancelled() => break,
            Err(err) => {
                let delay = backoff.delay_for(&err, failures);
                failures = failures.saturating_add(1);
                if err.is_retryable() {
                    warn!(resource = %key, error = %err, retry_in = ?delay, "Reconciliation failed");
                } else {
                    error!(resource = %key, error = %err, retry_in = ?delay, "Reconciliation failed, resource needs attention");
                }
                Some(delay)
            }
        };

        debug!(resource = %key, requeue_after = ?wait, "Waiting for next invocation");
        let timer = async {
            match wait {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = wake.notified() => {}
            _ = timer => {}
        }
    }

    debug!(resource = %key, "Resource worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_backoff_doubles_until_capped() {
        let backoff = FailureBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(10));
        assert_eq!(backoff.delay(64), Duration::from_secs(10));
    }

    #[test]
    fn test_non_retryable_errors_wait_the_maximum() {
        let backoff = FailureBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let key = ObjectKey::new("ns", "r");
        let conflict = ControllerError::conflict(key, 3);
        assert_eq!(backoff.delay_for(&conflict, 0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(&conflict, 2), Duration::from_secs(4));

        let parse_err = crate::resource::parse_duration("often").unwrap_err();
        let schedule = ControllerError::schedule("often", parse_err);
        assert_eq!(backoff.delay_for(&schedule, 0), Duration::from_secs(10));
    }
}
