//! Disconnect semantics: pending callers are unblocked, the handle is
//! one-shot, and unexpected stream loss drains the registry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use outpost::client::AgentHandle;
use outpost::server::FunctionRegistry;
use outpost::transport::ExecSession;
use outpost::AppError;

use super::test_helpers::{connect_pair, echo_registry};

/// A call still waiting when disconnect runs receives a synthetic
/// connection-closed error instead of blocking forever.
#[tokio::test]
async fn disconnect_unblocks_pending_callers() {
    let mut registry = FunctionRegistry::new();
    registry.register("Hang", |args: serde_json::Value| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, AppError>(args)
    });
    let (handle, _server) = connect_pair(registry);

    let pending_handle = Arc::clone(&handle);
    let pending = tokio::spawn(async move {
        pending_handle
            .call::<_, serde_json::Value>("Hang", &json!({}))
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.disconnect().await.expect("disconnect");

    let err = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending caller unblocked by disconnect")
        .expect("caller task")
        .expect_err("call cannot succeed after disconnect");
    assert!(
        err.to_string().contains("connection closed"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (handle, _server) = connect_pair(echo_registry());

    handle.disconnect().await.expect("first disconnect");
    handle.disconnect().await.expect("second disconnect is a no-op");
}

#[tokio::test]
async fn calls_after_disconnect_fail_fast() {
    let (handle, _server) = connect_pair(echo_registry());
    handle.disconnect().await.expect("disconnect");

    let err = handle.ping().await.expect_err("handle is shut down");
    assert!(
        matches!(err, AppError::ConnectionClosed(_)),
        "expected ConnectionClosed, got: {err}"
    );
}

/// The transport dying without a disconnect is an unexpected EOF: the
/// decode loop terminates and drains, so the waiting caller still gets an
/// error.
#[tokio::test]
async fn unexpected_eof_drains_pending_callers() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_rd, client_wr) = tokio::io::split(client_io);
    let handle = AgentHandle::connect(ExecSession {
        stdin: Box::new(client_wr),
        stdout: Box::new(client_rd),
        stderr: None,
    });

    let pending_handle = Arc::clone(&handle);
    let pending = tokio::spawn(async move { pending_handle.ping().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    // The "remote side" vanishes without any Close handshake.
    drop(server_io);

    let err = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending caller unblocked by stream loss")
        .expect("caller task")
        .expect_err("no reply can arrive");
    assert!(
        err.to_string().contains("connection closed"),
        "unexpected error: {err}"
    );
}
