//! Scheduling integration tests.
//!
//! These tests verify dependency ordering, blocking-task exclusion and
//! failure propagation through a full `Shipr::start` run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use shipr::core::task::TaskBody;
use shipr::Error;

use crate::fixtures::{TestShipr, Timeline};

const STEP: Duration = Duration::from_millis(60);

/// Test: Dependencies finish before dependents start
/// Given a chain fetch -> build -> publish
/// When "publish" is started
/// Then each task starts after its dependency ended
#[tokio::test]
async fn test_dependency_chain_order() {
    let t = TestShipr::new("default");
    let timeline = Timeline::default();
    t.shipr.task("fetch", &[], timeline.sleeper("fetch", STEP));
    t.shipr.task("build", &["fetch"], timeline.sleeper("build", STEP));
    t.shipr.task("publish", &["build"], timeline.sleeper("publish", STEP));

    let summary = assert_ok!(t.shipr.start(&["publish".to_string()]).await);

    assert_eq!(summary.completed, vec!["fetch", "build", "publish"]);
    assert!(timeline.span("fetch").1 <= timeline.span("build").0);
    assert!(timeline.span("build").1 <= timeline.span("publish").0);
}

/// Test: Independent tasks overlap
/// Given two independent tasks under one alias
/// When the alias runs
/// Then the two bodies run concurrently
#[tokio::test]
async fn test_independent_tasks_run_concurrently() {
    let t = TestShipr::new("default");
    let timeline = Timeline::default();
    t.shipr.task("lint", &[], timeline.sleeper("lint", STEP * 2));
    t.shipr.task("test", &[], timeline.sleeper("test", STEP * 2));
    t.shipr.task("default", &["lint", "test"], TaskBody::noop());

    assert_ok!(t.shipr.start(&[]).await);

    assert!(timeline.overlap("lint", "test"));
}

/// Test: A blocking task runs alone
/// Given a blocking task and two ordinary tasks that are all ready at once
/// When they run
/// Then the blocking task overlaps with neither ordinary task
#[tokio::test]
async fn test_blocking_task_mutual_exclusion() {
    let t = TestShipr::new("default");
    let timeline = Timeline::default();
    t.shipr.task("assets", &[], timeline.sleeper("assets", STEP));
    t.shipr
        .blocking_task("migrate", &[], timeline.sleeper("migrate", STEP));
    t.shipr.task("cache", &[], timeline.sleeper("cache", STEP));
    t.shipr
        .task("default", &["assets", "migrate", "cache"], TaskBody::noop());

    let summary = assert_ok!(t.shipr.start(&[]).await);

    assert!(summary.is_success());
    assert!(!timeline.overlap("migrate", "assets"));
    assert!(!timeline.overlap("migrate", "cache"));
}

/// Test: Two blocking tasks never overlap
/// Given two independent blocking tasks
/// When both are requested
/// Then one finishes before the other starts
#[tokio::test]
async fn test_blocking_tasks_serialize() {
    let t = TestShipr::new("default");
    let timeline = Timeline::default();
    t.shipr.blocking_task("a", &[], timeline.sleeper("a", STEP));
    t.shipr.blocking_task("b", &[], timeline.sleeper("b", STEP));

    assert_ok!(t.shipr.start(&["a".to_string(), "b".to_string()]).await);

    assert!(!timeline.overlap("a", "b"));
}

/// Test: A failure stops dependents only
/// Given "deploy" depending on a failing "build" and an independent "notify"
/// When everything runs
/// Then "deploy" never starts while "notify" completes
#[tokio::test]
async fn test_failure_skips_dependents() {
    let t = TestShipr::new("default");
    let timeline = Timeline::default();
    t.shipr.task(
        "build",
        &[],
        TaskBody::from_fn(|| Err(Error::task("compiler exploded"))),
    );
    t.shipr.task("deploy", &["build"], timeline.sleeper("deploy", STEP));
    t.shipr.task("notify", &[], timeline.sleeper("notify", STEP));
    t.shipr.task("default", &["deploy", "notify"], TaskBody::noop());

    let summary = assert_ok!(t.shipr.start(&[]).await);

    assert!(!summary.is_success());
    assert_eq!(summary.failed, vec!["build"]);
    assert!(summary.skipped.contains(&"deploy".to_string()));
    assert!(summary.skipped.contains(&"default".to_string()));
    assert_eq!(timeline.names(), vec!["notify"]);

    let log = t.log.contents();
    assert!(log.contains("'build' errored after"));
    assert!(log.contains("compiler exploded"));
    assert!(!log.contains("Running 'deploy' task..."));
}

/// Test: Unknown tasks are reported and nothing runs
/// Given a registered task
/// When an unregistered name is requested alongside it
/// Then the run fails with TaskNotFound and the reporter explains why
#[tokio::test]
async fn test_unknown_task_reported() {
    let t = TestShipr::new("default");
    let timeline = Timeline::default();
    t.shipr.task("build", &[], timeline.sleeper("build", STEP));

    let err = assert_err!(
        t.shipr
            .start(&["build".to_string(), "ghost".to_string()])
            .await
    );

    assert!(matches!(err, Error::TaskNotFound(ref name) if name == "ghost"));
    assert!(timeline.names().is_empty());
    assert!(t.log.contents().contains("Task 'ghost' is not in your shipfile"));
}

/// Test: Unknown dependencies are fatal before any body runs
/// Given a task depending on an unregistered task
/// When it is requested
/// Then no body runs
#[tokio::test]
async fn test_unknown_dependency_is_fatal() {
    let t = TestShipr::new("default");
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    t.shipr.task(
        "setup",
        &[],
        TaskBody::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    t.shipr.task("default", &["setup", "missing"], TaskBody::noop());

    let err = assert_err!(t.shipr.start(&[]).await);

    assert!(matches!(err, Error::TaskNotFound(ref name) if name == "missing"));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

/// Test: Cycles are rejected before any body runs
/// Given a -> b -> a
/// When "a" is requested
/// Then the run fails with DependencyCycle
#[tokio::test]
async fn test_cycle_rejected() {
    let t = TestShipr::new("default");
    let timeline = Timeline::default();
    t.shipr.task("a", &["b"], timeline.sleeper("a", STEP));
    t.shipr.task("b", &["a"], timeline.sleeper("b", STEP));

    let err = assert_err!(t.shipr.start(&["a".to_string()]).await);

    match err {
        Error::DependencyCycle(path) => {
            assert!(path.contains(&"a".to_string()));
            assert!(path.contains(&"b".to_string()));
        }
        other => panic!("Expected DependencyCycle, got {:?}", other),
    }
    assert!(timeline.names().is_empty());
}

/// Test: Runs are repeatable
/// Given a task that counts its invocations
/// When the same Shipr starts it twice
/// Then the body ran twice
#[tokio::test]
async fn test_repeated_runs_reset_state() {
    let t = TestShipr::new("default");
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    t.shipr.task(
        "default",
        &[],
        TaskBody::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    assert_ok!(t.shipr.start(&[]).await);
    assert_ok!(t.shipr.start(&[]).await);

    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

/// Test: Alias tasks summarize their dependencies
/// Given an alias task grouping two tasks
/// When it runs
/// Then its finish line lists the dependencies and no "Running" line is printed for it
#[tokio::test]
async fn test_alias_reporting() {
    let t = TestShipr::new("default");
    t.shipr.task("fetch", &[], TaskBody::from_fn(|| Ok(())));
    t.shipr.task("build", &[], TaskBody::from_fn(|| Ok(())));
    t.shipr.task("deploy", &["fetch", "build"], TaskBody::noop());

    assert_ok!(t.shipr.start(&["deploy".to_string()]).await);

    let log = t.log.contents();
    assert!(log.contains("Finished 'deploy' [ fetch, build ]"));
    assert!(!log.contains("Running 'deploy' task..."));
    assert!(log.contains("\nRunning 'fetch' task...\n"));
}
