//! Graceful shutdown: fire-and-forget `Close` and the server-side drain
//! barrier.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use outpost::client::AgentHandle;
use outpost::server::FunctionRegistry;
use outpost::transport::ExecSession;
use outpost::AppError;

use super::test_helpers::{connect_pair, echo_registry};

/// `Close` returns immediately even against a server that never replies.
#[tokio::test]
async fn close_is_fire_and_forget() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    // No dispatcher on the other end; just keep the stream open so nothing
    // can possibly reply.
    let (client_rd, client_wr) = tokio::io::split(client_io);
    let handle = AgentHandle::connect(ExecSession {
        stdin: Box::new(client_wr),
        stdout: Box::new(client_rd),
        stderr: None,
    });

    tokio::time::timeout(Duration::from_millis(500), handle.close())
        .await
        .expect("close must not wait for a reply")
        .expect("close flushes cleanly");

    drop(server_io);
    handle.disconnect().await.expect("disconnect");
}

/// All K handlers in flight when `Close` arrives get their replies before
/// the serve loop terminates.
#[tokio::test]
async fn close_drains_in_flight_handlers() {
    const K: u64 = 8;

    let mut registry = FunctionRegistry::new();
    registry.register("Dawdle", |args: serde_json::Value| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<_, AppError>(args)
    });
    let (handle, server) = connect_pair(registry);

    let mut callers = Vec::new();
    for i in 0..K {
        let handle = Arc::clone(&handle);
        callers.push(tokio::spawn(async move {
            handle
                .call::<_, serde_json::Value>("Dawdle", &json!({ "k": i }))
                .await
        }));
    }

    // Let every call reach the dispatcher before the close frame.
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.close().await.expect("close");

    // Every already-accepted call still gets its reply.
    for (i, caller) in callers.into_iter().enumerate() {
        let result = caller
            .await
            .expect("caller task")
            .expect("reply delivered before shutdown");
        assert_eq!(result, json!({ "k": u64::try_from(i).unwrap() }));
    }

    // And the serve loop exits cleanly once drained.
    let served = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server terminates after drain")
        .expect("join");
    served.expect("serve loop clean exit");
}

/// `Close` sends no reply envelope of its own: after the drain the stream
/// just ends.
#[tokio::test]
async fn close_sends_no_reply() {
    let (handle, server) = connect_pair(echo_registry());

    handle.close().await.expect("close");
    let served = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server terminates")
        .expect("join");
    served.expect("serve loop clean exit");

    // Nothing outstanding: the decode loop saw the stream end with no
    // orphaned envelopes to deliver.
    handle.disconnect().await.expect("disconnect");
}
