//! End-to-end session behaviour against scripted backends
#![cfg(unix)]

mod common;

use common::*;
use portfolio_config::DispatchConfig;
use portfolio_dispatch::CloseReason;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_exit_right_after_selection_leaves_no_worker() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = pid_path(dir.path(), "z3");
    let backends = [scripted(0, "z3", &recording_pid(&pid_file, &answering("pong")))];

    let mut harness = start_session(&backends, dispatch_config());
    assert_eq!(harness.client.recv().await, "0 z3");
    assert_eq!(harness.client.request("0").await, "OK");
    let pid = read_pid(&pid_file).await;

    harness.client.send("exit").await;
    assert_eq!(harness.session.await.unwrap(), CloseReason::ClientExit);
    assert!(process_gone(pid));
    assert!(harness.client.closed().await);
}

#[tokio::test]
async fn test_agreeing_backends() {
    let backends = [
        scripted(0, "a", &answering("pong")),
        scripted(1, "b", &answering("pong")),
    ];

    let mut harness = start_session(&backends, dispatch_config());
    assert_eq!(harness.client.recv().await, "0 a; 1 b");
    assert_eq!(harness.client.request("0").await, "OK");
    assert_eq!(harness.client.request("1").await, "OK");

    // The line that ends selection is the first command
    assert_eq!(harness.client.request("ping").await, "pong");
    assert_eq!(harness.client.request("ping").await, "pong");

    harness.client.send("exit").await;
    assert_eq!(harness.session.await.unwrap(), CloseReason::ClientExit);
}

#[tokio::test]
async fn test_disagreement_keeps_workers_live() {
    let backends = [
        scripted(0, "a", &answering("pong")),
        scripted(
            1,
            "b",
            "read -r l; echo pang; while read -r l; do echo pong; done",
        ),
    ];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;
    harness.client.request("0").await;
    harness.client.request("1").await;

    assert_eq!(
        harness.client.request("ping").await,
        "FAIL inconsistent solver behavior"
    );
    assert_eq!(harness.client.request("ping").await, "pong");

    harness.client.send("exit").await;
    assert_eq!(harness.session.await.unwrap(), CloseReason::ClientExit);
}

#[tokio::test]
async fn test_gathering_ignores_response_timing() {
    let backends = [
        scripted(0, "slow", "while read -r l; do sleep 0.3; echo same; done"),
        scripted(1, "fast", &answering("same")),
        scripted(2, "medium", "while read -r l; do sleep 0.1; echo same; done"),
    ];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;
    for id in ["0", "1", "2"] {
        assert_eq!(harness.client.request(id).await, "OK");
    }

    for _ in 0..3 {
        assert_eq!(harness.client.request("check").await, "same");
    }

    harness.client.send("exit").await;
    harness.session.await.unwrap();
}

#[tokio::test]
async fn test_command_before_selection() {
    let backends = [scripted(0, "a", &answering("pong"))];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;

    assert_eq!(
        harness.client.request("(check-sat)").await,
        "FAIL choose at least one solver"
    );
    assert_eq!(harness.client.request("3").await, "FAIL unsupported solver");

    // Still selecting
    assert_eq!(harness.client.request("0").await, "OK");
    assert_eq!(harness.client.request("ping").await, "pong");

    harness.client.send("exit").await;
    harness.session.await.unwrap();
}

#[tokio::test]
async fn test_setup_failure_reaps_spawned_workers() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = pid_path(dir.path(), "first");
    let mut broken = scripted(1, "broken", "");
    broken.program = Some("/nonexistent/solver".to_string());
    let backends = [
        scripted(0, "first", &recording_pid(&pid_file, &answering("pong"))),
        broken,
    ];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;
    assert_eq!(harness.client.request("0").await, "OK");
    let pid = read_pid(&pid_file).await;

    assert_eq!(
        harness.client.request("1").await,
        "FAIL could not start solver broken"
    );
    assert_eq!(harness.session.await.unwrap(), CloseReason::SetupFailure);
    assert!(process_gone(pid));
    assert!(harness.client.closed().await);
}

#[tokio::test]
async fn test_blank_command_fails_without_state_change() {
    let backends = [scripted(0, "a", &answering("pong"))];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;
    harness.client.request("0").await;

    assert_eq!(harness.client.request("ping").await, "pong");
    assert_eq!(harness.client.request("   ").await, "FAIL");
    assert_eq!(harness.client.request("ping").await, "pong");

    harness.client.send("exit").await;
    assert_eq!(harness.session.await.unwrap(), CloseReason::ClientExit);
}

#[tokio::test]
async fn test_over_long_client_line() {
    let backends = [scripted(0, "a", &answering("pong"))];
    let config = DispatchConfig {
        max_frame_bytes: 64,
        ..dispatch_config()
    };

    let mut harness = start_session(&backends, config);
    harness.client.recv().await;
    harness.client.request("0").await;
    assert_eq!(harness.client.request("ping").await, "pong");

    let long = "x".repeat(200);
    assert_eq!(harness.client.request(&long).await, "FAIL");
    assert_eq!(harness.client.request("ping").await, "pong");

    harness.client.send("exit").await;
    harness.session.await.unwrap();
}

#[tokio::test]
async fn test_worker_fault_is_reported_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = pid_path(dir.path(), "fragile");
    let backends = [
        scripted(0, "steady", &answering("pong")),
        scripted(1, "fragile", &recording_pid(&pid_file, "read -r l; exit 7")),
    ];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;
    harness.client.request("0").await;
    harness.client.request("1").await;
    let pid = read_pid(&pid_file).await;

    assert_eq!(harness.client.request("ping").await, "FAIL worker fault");
    assert!(process_gone(pid));

    // The surviving worker stayed in step
    assert_eq!(harness.client.request("ping").await, "pong");

    harness.client.send("exit").await;
    assert_eq!(harness.session.await.unwrap(), CloseReason::ClientExit);
}

#[tokio::test]
async fn test_last_worker_fault_closes_session() {
    let backends = [scripted(0, "fragile", "read -r l; exit 1")];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;
    harness.client.request("0").await;

    assert_eq!(harness.client.request("ping").await, "FAIL worker fault");
    assert_eq!(harness.session.await.unwrap(), CloseReason::NoLiveWorkers);
    assert!(harness.client.closed().await);
}

#[tokio::test]
async fn test_worker_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = pid_path(dir.path(), "stuck");
    let backends = [
        scripted(0, "quick", &answering("pong")),
        scripted(
            1,
            "stuck",
            &recording_pid(&pid_file, "while read -r l; do sleep 30; echo late; done"),
        ),
    ];
    let config = DispatchConfig {
        command_timeout: Some(Duration::from_millis(500)),
        ..dispatch_config()
    };

    let mut harness = start_session(&backends, config);
    harness.client.recv().await;
    harness.client.request("0").await;
    harness.client.request("1").await;
    let pid = read_pid(&pid_file).await;

    assert_eq!(harness.client.request("ping").await, "FAIL worker timeout");
    assert!(process_gone(pid));
    assert_eq!(harness.client.request("ping").await, "pong");

    harness.client.send("exit").await;
    harness.session.await.unwrap();
}

#[tokio::test]
async fn test_disconnect_reaps_workers() {
    let dir = tempfile::tempdir().unwrap();
    let first = pid_path(dir.path(), "first");
    let second = pid_path(dir.path(), "second");
    let backends = [
        scripted(0, "first", &recording_pid(&first, &answering("pong"))),
        scripted(1, "second", &recording_pid(&second, &answering("pong"))),
    ];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;
    harness.client.request("0").await;
    harness.client.request("1").await;
    assert_eq!(harness.client.request("ping").await, "pong");
    let pids = [read_pid(&first).await, read_pid(&second).await];

    drop(harness.client);
    assert_eq!(harness.session.await.unwrap(), CloseReason::ClientDisconnect);
    assert!(pids.iter().all(|pid| process_gone(*pid)));
}

#[tokio::test]
async fn test_partial_final_line_is_discarded() {
    let backends = [scripted(0, "a", &answering("pong"))];

    let (mut client, session, _shutdown) = spawn_session(&backends, dispatch_config());
    client.write_all(b"0\nping").await.unwrap();
    drop(client);

    assert_eq!(session.await.unwrap(), CloseReason::ClientDisconnect);
}

#[tokio::test]
async fn test_shutdown_reaps_workers() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = pid_path(dir.path(), "a");
    let backends = [scripted(0, "a", &recording_pid(&pid_file, &answering("pong")))];

    let mut harness = start_session(&backends, dispatch_config());
    harness.client.recv().await;
    harness.client.request("0").await;
    let pid = read_pid(&pid_file).await;

    harness.shutdown.send(()).unwrap();
    assert_eq!(harness.session.await.unwrap(), CloseReason::Shutdown);
    assert!(process_gone(pid));
}
