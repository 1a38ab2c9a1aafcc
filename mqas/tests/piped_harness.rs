//! End-to-end tests of the `mqas-job` runner through `PipedLauncher`.

use mqas::context::Bootstrap;
use mqas::harness::{Payload, PipedLauncher, SinkRecord, EXIT_INVALID_PAYLOAD};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

fn runner() -> PipedLauncher {
    PipedLauncher::new(env!("CARGO_BIN_EXE_mqas-job"))
}

fn bootstrap() -> Bootstrap {
    Bootstrap::new()
        .with_job_id("job-1")
        .with_worker_id("worker-1")
        .with_connection("memory://piped", "jobs", "queue")
        .with_device_id("device-1")
}

#[tokio::test]
async fn context_is_rehydrated_in_child() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("sink.json");
    let payload = Payload::new("mqas.builtins.context").with_output(&output);

    let outcome = runner().launch(&bootstrap(), &payload).await.unwrap();

    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(
        outcome.sink,
        Some(SinkRecord::Result(json!({
            "job_id": "job-1",
            "worker_id": "worker-1",
            "device_id": "device-1",
            "collection": "queue",
        })))
    );
}

#[tokio::test]
async fn arguments_round_trip_through_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("sink.json");
    let payload = Payload::new("mqas.builtins.echo")
        .with_arg(1)
        .with_arg(json!({ "$date": 0 }))
        .with_kwarg("name", "x")
        .with_output(&output);

    let outcome = runner().launch(&Bootstrap::new(), &payload).await.unwrap();

    assert_eq!(
        outcome.sink.unwrap().result().cloned(),
        Some(json!({
            "args": [1, { "$date": "1970-01-01T00:00:00.000Z" }],
            "kwargs": { "name": "x" },
        }))
    );
}

#[tokio::test]
async fn missing_module_lands_in_error_sink() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("sink.json");
    let payload = Payload::new("missing.mod.fn").with_output(&output);

    let outcome = runner().launch(&bootstrap(), &payload).await.unwrap();

    assert_eq!(outcome.exit_code, Some(0));
    let sink = outcome.sink.unwrap();
    let error = sink.error().unwrap();
    assert!(error.message.contains("No module named 'missing.mod'"));
    assert!(!error.trace.is_empty());
}

#[tokio::test]
async fn without_output_nothing_is_read() {
    let payload = Payload::new("mqas.builtins.echo").with_arg(1);
    let outcome = runner().launch(&bootstrap(), &payload).await.unwrap();
    assert_eq!(outcome.exit_code, Some(0));
    assert!(outcome.sink.is_none());
}

#[tokio::test]
async fn invalid_payload_exits_with_code() {
    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_mqas-job"))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(b"not json").await.unwrap();
    drop(stdin);

    let status = child.wait().await.unwrap();
    assert_eq!(status.code(), Some(EXIT_INVALID_PAYLOAD));
}

#[cfg(unix)]
fn write_plugin(root: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = r#"#!/bin/sh
input=$(cat)
case "$1" in
  greet)
    printf '{"greeting": "hello", "input": %s, "bootstrap": %s}' "$input" "$MQAS_BOOTSTRAP" > "$MQAS_RESULT_FILE"
    ;;
  quiet)
    ;;
  fail)
    echo "calc failed" >&2
    exit 3
    ;;
  *)
    echo "unknown function $1" >&2
    exit 1
    ;;
esac
"#;
    let pkg = root.join("plugins");
    std::fs::create_dir_all(&pkg).unwrap();
    let path = pkg.join("calc");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn command_module_receives_arguments_and_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path());
    let output = dir.path().join("sink.json");
    let payload = Payload::new("plugins.calc.greet")
        .with_arg(2)
        .with_module(dir.path())
        .with_output(&output);

    let outcome = runner().launch(&bootstrap(), &payload).await.unwrap();

    let result = outcome.sink.unwrap().result().cloned().unwrap();
    assert_eq!(result["greeting"], json!("hello"));
    assert_eq!(result["input"], json!({ "args": [2], "kwargs": {} }));
    assert_eq!(result["bootstrap"]["job_id"], json!("job-1"));
    assert_eq!(result["bootstrap"]["db_coll"], json!("queue"));
}

#[cfg(unix)]
#[tokio::test]
async fn command_module_without_result_returns_null() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path());
    let output = dir.path().join("sink.json");
    let payload = Payload::new("plugins.calc.quiet").with_output(&output);

    let outcome = runner()
        .with_module(dir.path())
        .launch(&bootstrap(), &payload)
        .await
        .unwrap();

    assert_eq!(outcome.sink, Some(SinkRecord::Result(json!(null))));
}

#[cfg(unix)]
#[tokio::test]
async fn command_module_failure_carries_stderr() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path());
    let output = dir.path().join("sink.json");
    let payload = Payload::new("plugins.calc.fail")
        .with_module(dir.path())
        .with_output(&output);

    let outcome = runner().launch(&bootstrap(), &payload).await.unwrap();

    assert_eq!(outcome.exit_code, Some(0));
    let sink = outcome.sink.unwrap();
    let error = sink.error().unwrap();
    assert!(error.message.contains("plugins.calc.fail failed"), "{}", error.message);
    assert!(error.message.contains("calc failed"), "{}", error.message);
}
