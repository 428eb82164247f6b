//! The work-queue driver running real reconciliations

mod common;

use common::{wait_for, Harness};
use formula_controller::resource::ControlSpec;
use formula_controller::{Controller, ControllerConfig};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> ControllerConfig {
    ControllerConfig {
        workers: 2,
        failure_backoff_base: Duration::from_millis(50),
        failure_backoff_max: Duration::from_millis(200),
        ..ControllerConfig::default()
    }
}

#[tokio::test]
async fn test_terminal_resource_is_evaluated_once() {
    let h = Harness::new().with_config(config());
    let key = h.apply("ns", "once", ControlSpec::new("6 * 7")).await;
    let controller = Controller::new(h.reconciler(), &h.config);

    controller.watch(key.clone()).await;
    let resources = h.resources.clone();
    let done = wait_for(TIMEOUT, || {
        let resources = resources.clone();
        async move { resources.status_writes() == 1 }
    })
    .await;
    assert!(done, "resource was never evaluated");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.resources.status_writes(), 1);
    assert_eq!(h.stored(&key).await.status.result, "42");

    controller.shutdown().await;
}

#[tokio::test]
async fn test_notify_picks_up_spec_change() {
    let h = Harness::new().with_config(config());
    let key = h.apply("ns", "r", ControlSpec::new("1")).await;
    let controller = Controller::new(h.reconciler(), &h.config);
    controller.watch(key.clone()).await;

    let resources = h.resources.clone();
    assert!(
        wait_for(TIMEOUT, || {
            let resources = resources.clone();
            async move { resources.status_writes() == 1 }
        })
        .await
    );

    h.apply("ns", "r", ControlSpec::new("'updated'")).await;
    controller.notify(&key).await;

    let resources = h.resources.clone();
    let watched = key.clone();
    let updated = wait_for(TIMEOUT, || {
        let resources = resources.clone();
        let key = watched.clone();
        async move {
            use formula_controller::store::ResourceStore;
            matches!(resources.get(&key).await, Ok(Some(r)) if r.status.result == "updated")
        }
    })
    .await;
    assert!(updated, "spec change was not reconciled");

    controller.shutdown().await;
}

#[tokio::test]
async fn test_recurring_resource_is_recomputed_until_shutdown() {
    let h = Harness::new().with_config(config());
    let key = h
        .apply("ns", "tick", ControlSpec::new("1 + 1").recalculate_every("50ms"))
        .await;
    let controller = Controller::new(h.reconciler(), &h.config);
    controller.watch(key.clone()).await;
    // Watching twice keeps a single worker.
    controller.watch(key.clone()).await;
    assert_eq!(controller.watched().await, vec![key.clone()]);

    let resources = h.resources.clone();
    let recomputed = wait_for(TIMEOUT, || {
        let resources = resources.clone();
        async move { resources.status_writes() >= 3 }
    })
    .await;
    assert!(recomputed, "interval did not trigger recomputation");

    controller.shutdown().await;
    let writes = h.resources.status_writes();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.resources.status_writes(), writes);
    assert!(controller.watched().await.is_empty());
}

#[tokio::test]
async fn test_forget_stops_one_resource() {
    let h = Harness::new().with_config(config());
    let a = h
        .apply("ns", "a", ControlSpec::new("1").recalculate_every("50ms"))
        .await;
    let b = h.apply("ns", "b", ControlSpec::new("2")).await;
    let controller = Controller::new(h.reconciler(), &h.config);
    controller.watch(a.clone()).await;
    controller.watch(b.clone()).await;

    controller.forget(&a).await;
    assert_eq!(controller.watched().await, vec![b]);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_invocation_errors_back_off_without_writing() {
    let h = Harness::new().with_config(config());
    let key = h
        .apply("ns", "bad", ControlSpec::new("1").recalculate_every("often"))
        .await;
    let controller = Controller::new(h.reconciler(), &h.config);
    controller.watch(key.clone()).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.resources.status_writes(), 0);
    assert_eq!(controller.watched().await, vec![key]);

    controller.shutdown().await;
}
