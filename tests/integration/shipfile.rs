//! Shipfile integration tests.
//!
//! These tests load declarative shipfiles from disk and run them against
//! a recording pool, covering configuration, steps and task options.

use std::fs;

use tokio_test::{assert_err, assert_ok};

use shipr::remote::{Direction, RunOptions, SyncOptions};
use shipr::{Error, Shipfile};

use crate::fixtures::{PoolCall, RecordingPool, TestShipr};

const DEPLOY: &str = r#"
[environments.default]
ignores = [".git"]

[environments.production]
servers = ["deploy@web1", "deploy@web2:2222"]
deployTo = "/srv/app"

[tasks.build]
steps = [{ local = "mkdir -p dist && echo bundle > dist/app.js" }]

[tasks.upload]
deps = ["build"]
steps = [{ copy = "dist/", dest = "/srv/app/current" }]

[tasks.restart]
deps = ["upload"]
blocking = true
steps = [
  { remote = "systemctl restart app", cwd = "/srv/app/current" },
  { log = "Restarted" },
]

[tasks.default]
deps = ["restart"]
"#;

/// Test: A full deploy shipfile runs end to end
/// Given a shipfile with local, copy, remote and log steps
/// When its default task runs against a recording pool
/// Then the steps happen in dependency order with configured defaults
#[tokio::test]
async fn test_shipfile_deploy_flow() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shipfile.toml");
    fs::write(&path, DEPLOY).unwrap();

    let t = TestShipr::in_dir("production", dir.path());
    let shipfile = assert_ok!(Shipfile::load(&assert_ok!(Shipfile::discover(dir.path()))));
    assert_ok!(shipfile.apply(&t.shipr));
    assert!(shipfile.needs_pool());

    let config = assert_ok!(t.shipr.config());
    assert_eq!(config.servers().unwrap().len(), 2);
    assert_eq!(config.get("deployTo").and_then(|v| v.as_str()), Some("/srv/app"));

    let pool = RecordingPool::new();
    t.shipr.set_pool(pool.clone());

    let summary = assert_ok!(t.shipr.start(&[]).await);

    assert!(summary.is_success());
    assert_eq!(summary.completed, vec!["build", "upload", "restart", "default"]);
    assert!(dir.path().join("dist/app.js").exists());
    assert_eq!(
        pool.calls(),
        vec![
            PoolCall::Copy {
                src: "dist/".into(),
                dest: "/srv/app/current".into(),
                options: SyncOptions {
                    direction: Direction::LocalToRemote,
                    ignores: vec![".git".into()],
                    rsync: vec![],
                },
            },
            PoolCall::Run {
                command: "cd \"/srv/app/current\" && systemctl restart app".into(),
                options: RunOptions::default(),
            },
        ]
    );

    let log = t.log.contents();
    assert!(log.contains("Restarted\n"));
    assert!(log.contains("Finished 'default' [ restart ]"));
}

/// Test: Requesting a task outside the shipfile fails
#[tokio::test]
async fn test_shipfile_unknown_task() {
    let t = TestShipr::new("production");
    assert_ok!(assert_ok!(Shipfile::parse(DEPLOY)).apply(&t.shipr));

    let err = assert_err!(t.shipr.start(&["rollback".to_string()]).await);

    assert!(matches!(err, Error::TaskNotFound(_)));
    let log = t.log.contents();
    assert!(log.contains("Task 'rollback' is not in your shipfile"));
    assert!(log.contains("Please check the documentation for proper shipfile formatting"));
}

/// Test: Remote steps without a pool fail the task
/// Given a shipfile whose task needs the pool
/// When no pool was initialized
/// Then the task errors and its dependents are skipped
#[tokio::test]
async fn test_shipfile_without_pool() {
    let dir = tempfile::tempdir().unwrap();
    let t = TestShipr::in_dir("production", dir.path());
    assert_ok!(assert_ok!(Shipfile::parse(DEPLOY)).apply(&t.shipr));

    let summary = assert_ok!(t.shipr.start(&[]).await);

    assert_eq!(summary.failed, vec!["upload"]);
    assert!(summary.skipped.contains(&"restart".to_string()));
    assert!(t.log.contents().contains("Connection pool has not been initialized"));
}

/// Test: Selecting a missing environment fails before any task is registered
#[test]
fn test_shipfile_unknown_environment() {
    let t = TestShipr::new("staging");
    let err = assert_err!(assert_ok!(Shipfile::parse(DEPLOY)).apply(&t.shipr));
    assert!(matches!(err, Error::EnvironmentNotFound(ref env) if env == "staging"));
    assert!(t.shipr.task_names().is_empty());
}

/// Test: initialize requires servers
#[test]
fn test_initialize_without_servers() {
    let t = TestShipr::new("default");
    assert_ok!(assert_ok!(Shipfile::parse(DEPLOY)).apply(&t.shipr));
    let err = assert_err!(t.shipr.initialize());
    assert!(matches!(err, Error::ServersNotConfigured));
}
