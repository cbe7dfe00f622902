//! Execution integration tests.
//!
//! These tests verify what task bodies see when they call `local`,
//! `remote` and `copy`: streamed and captured output, command shaping
//! for the pool, and configuration-derived copy defaults.

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use shipr::core::task::TaskBody;
use shipr::exec::LocalOptions;
use shipr::remote::{CopyOptions, Direction, RunOptions, SyncOptions};
use shipr::Error;

use crate::fixtures::{PoolCall, RecordingPool, TestShipr};

/// Test: Local output is streamed with a prefix and captured
/// Given a Shipr with memory sinks
/// When `echo "hello"` runs locally
/// Then stdout is "hello\n" and the sink received "@ hello\n"
#[tokio::test]
async fn test_local_streams_and_captures() {
    let t = TestShipr::new("default");

    let output = assert_ok!(t.shipr.local("echo \"hello\"", LocalOptions::default()).await);

    assert_eq!(output.stdout, "hello\n");
    assert_eq!(t.stdout.contents(), "@ hello\n");
    assert!(t.log.contents().contains("Running \"echo \"hello\"\" on local."));
}

/// Test: Local failures carry the captured output
/// Given a command that prints and exits non-zero
/// When it runs locally
/// Then the error holds the command, stdout and stderr
#[tokio::test]
async fn test_local_failure_keeps_output() {
    let t = TestShipr::new("default");

    let err = assert_err!(
        t.shipr
            .local("echo out; echo err >&2; exit 7", LocalOptions::default())
            .await
    );

    let failure = err.captured_output().expect("captured output");
    assert_eq!(failure.exit_code, Some(7));
    assert_eq!(failure.stdout, "out\n");
    assert_eq!(failure.stderr, "err\n");
    assert_eq!(t.stderr.contents(), "@ err\n");
}

/// Test: The context working directory applies to local commands
/// Given a Shipr rooted in a temporary directory
/// When a command writes a relative file
/// Then the file lands in that directory
#[tokio::test]
async fn test_local_uses_context_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let t = TestShipr::in_dir("default", dir.path());

    assert_ok!(t.shipr.local("echo v1 > REVISION", LocalOptions::default()).await);

    let revision = std::fs::read_to_string(dir.path().join("REVISION")).unwrap();
    assert_eq!(revision, "v1\n");
}

/// Test: Remote cwd is folded into the command
/// Given a recording pool
/// When `remote("ls", cwd = /srv/"app")` runs
/// Then the pool receives `cd "/srv/\"app\"" && ls` with no cwd option
#[tokio::test]
async fn test_remote_cwd_rewrite() {
    let t = TestShipr::new("production");
    let pool = RecordingPool::new();
    t.shipr.set_pool(pool.clone());

    let results = assert_ok!(
        t.shipr
            .remote("ls", RunOptions::default().cwd("/srv/\"app\""))
            .await
    );

    assert_eq!(results.len(), 1);
    assert_eq!(
        pool.calls(),
        vec![PoolCall::Run {
            command: "cd \"/srv/\\\"app\\\"\" && ls".to_string(),
            options: RunOptions::default(),
        }]
    );
}

/// Test: Remote options other than cwd are forwarded untouched
#[tokio::test]
async fn test_remote_forwards_options() {
    let t = TestShipr::new("production");
    let pool = RecordingPool::new();
    t.shipr.set_pool(pool.clone());

    let options = RunOptions::default().tty(true).max_buffer(512);
    assert_ok!(t.shipr.remote("uptime", options.clone()).await);

    assert_eq!(
        pool.calls(),
        vec![PoolCall::Run {
            command: "uptime".to_string(),
            options,
        }]
    );
}

/// Test: Remote calls require an initialized pool
#[tokio::test]
async fn test_remote_without_pool() {
    let t = TestShipr::new("production");
    let err = assert_err!(t.shipr.remote("ls", RunOptions::default()).await);
    assert!(matches!(err, Error::PoolNotInitialized));
}

/// Test: Copy defaults come from the configuration
/// Given a configuration with ignores and rsync arguments
/// When copy is called without them
/// Then the pool receives the configured values
#[tokio::test]
async fn test_copy_defaults_from_config() {
    let t = TestShipr::new("production");
    assert_ok!(t.shipr.init_config(&json!({
        "default": { "ignores": [".git"] },
        "production": { "servers": "deploy@web1", "rsync": ["--delete"] }
    })));
    let pool = RecordingPool::new();
    t.shipr.set_pool(pool.clone());

    assert_ok!(t.shipr.copy("dist/", "/srv/app", CopyOptions::default()).await);
    assert_ok!(
        t.shipr
            .copy(
                "/var/log/app.log",
                "logs/",
                CopyOptions::default()
                    .direction(Direction::RemoteToLocal)
                    .ignores(vec![]),
            )
            .await
    );

    assert_eq!(
        pool.calls(),
        vec![
            PoolCall::Copy {
                src: "dist/".into(),
                dest: "/srv/app".into(),
                options: SyncOptions {
                    direction: Direction::LocalToRemote,
                    ignores: vec![".git".into()],
                    rsync: vec!["--delete".into()],
                },
            },
            PoolCall::Copy {
                src: "/var/log/app.log".into(),
                dest: "logs/".into(),
                options: SyncOptions {
                    direction: Direction::RemoteToLocal,
                    ignores: vec![],
                    rsync: vec!["--delete".into()],
                },
            },
        ]
    );
}

/// Test: Remote failures inside a task are reported with their output
/// Given a task whose remote command fails
/// When the task runs
/// Then the reporter prints the captured stderr
#[tokio::test]
async fn test_remote_failure_in_task() {
    let t = TestShipr::new("production");
    let pool = RecordingPool::failing_on("restart");
    t.shipr.set_pool(pool.clone());

    let shipr = t.shipr.clone();
    t.shipr.task(
        "restart",
        &[],
        TaskBody::new(move || {
            let shipr = shipr.clone();
            async move {
                shipr
                    .remote("systemctl restart app", RunOptions::default())
                    .await?;
                Ok(())
            }
        }),
    );

    let summary = assert_ok!(t.shipr.start(&["restart".to_string()]).await);

    assert_eq!(summary.failed, vec!["restart"]);
    let log = t.log.contents();
    assert!(log.contains("'restart' errored after"));
    assert!(log.contains("stderr:\nremote failure"));
}

/// Test: Closing the Shipr closes its pool once
#[tokio::test]
async fn test_close_closes_pool() {
    let t = TestShipr::new("production");
    let pool = RecordingPool::new();
    t.shipr.set_pool(pool.clone());

    assert_ok!(t.shipr.close().await);
    assert!(*pool.closed.lock().unwrap());

    let err = assert_err!(t.shipr.remote("ls", RunOptions::default()).await);
    assert!(matches!(err, Error::PoolNotInitialized));
}
