//! Dispatcher behavior against raw wire frames, bypassing the client
//! handle.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use outpost::ops::builtin_registry;
use outpost::proto::ResultEnvelope;
use outpost::server::Dispatcher;
use outpost::Result;

type RawReader = BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>;
type RawWriter = tokio::io::WriteHalf<tokio::io::DuplexStream>;

/// Spawn a dispatcher over a duplex pipe and return raw client halves.
fn raw_pair() -> (RawWriter, RawReader, JoinHandle<Result<()>>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let (server_rd, server_wr) = tokio::io::split(server_io);
    let server = tokio::spawn(async move {
        Dispatcher::new(builtin_registry())
            .serve(server_rd, server_wr)
            .await
    });

    let (client_rd, client_wr) = tokio::io::split(client_io);
    (client_wr, BufReader::new(client_rd), server)
}

async fn send_line(writer: &mut RawWriter, line: &str) {
    writer
        .write_all(format!("{line}\n").as_bytes())
        .await
        .expect("write frame");
}

async fn read_envelope(reader: &mut RawReader) -> ResultEnvelope {
    let mut line = String::new();
    let n = tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("reply within bound")
        .expect("read frame");
    assert!(n > 0, "stream ended before a reply arrived");
    serde_json::from_str(&line).expect("reply is a result envelope")
}

#[tokio::test]
async fn empty_call_id_is_answered_with_an_error_envelope() {
    let (mut writer, mut reader, _server) = raw_pair();

    send_line(
        &mut writer,
        &json!({ "id": "", "function": "Ping", "args": { "ping": "x" } }).to_string(),
    )
    .await;

    let reply = read_envelope(&mut reader).await;
    assert!(reply.id.is_empty());
    assert!(reply.is_error());
    assert!(reply.error.contains("call id is empty"));

    // The violation is not fatal: a proper call still succeeds.
    send_line(
        &mut writer,
        &json!({ "id": "after", "function": "Ping", "args": { "ping": "x" } }).to_string(),
    )
    .await;
    let reply = read_envelope(&mut reader).await;
    assert_eq!(reply.id, "after");
    assert!(!reply.is_error());
}

#[tokio::test]
async fn malformed_frame_with_recoverable_id_gets_an_error_reply() {
    let (mut writer, mut reader, _server) = raw_pair();

    // `function` has the wrong type: envelope decoding fails but the id
    // survives.
    send_line(&mut writer, "{\"id\":\"bad-frame\",\"function\":42}").await;

    let reply = read_envelope(&mut reader).await;
    assert_eq!(reply.id, "bad-frame");
    assert!(reply.is_error());
    assert!(reply.error.contains("malformed call envelope"));
}

#[tokio::test]
async fn unroutable_garbage_is_skipped_and_serving_continues() {
    let (mut writer, mut reader, _server) = raw_pair();

    send_line(&mut writer, "this is not json").await;
    send_line(
        &mut writer,
        &json!({ "id": "ok-1", "function": "Ping", "args": { "ping": "x" } }).to_string(),
    )
    .await;

    // The only reply is for the valid call; the garbage produced none.
    let reply = read_envelope(&mut reader).await;
    assert_eq!(reply.id, "ok-1");
    assert!(!reply.is_error());
}

#[tokio::test]
async fn close_terminates_the_serve_loop_without_a_reply() {
    let (mut writer, mut reader, server) = raw_pair();

    send_line(
        &mut writer,
        &json!({ "id": "close-1", "function": "Close", "args": null }).to_string(),
    )
    .await;

    let served = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("serve loop terminates on close")
        .expect("join");
    served.expect("clean exit");

    // No reply envelope was written: the stream just ends.
    let mut line = String::new();
    let n = tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("read returns")
        .expect("read eof");
    assert_eq!(n, 0, "unexpected frame after close: {line}");
}

#[tokio::test]
async fn end_of_stream_terminates_the_serve_loop() {
    let (writer, reader, server) = raw_pair();

    drop(writer);
    drop(reader);

    let served = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("serve loop terminates on eof")
        .expect("join");
    served.expect("clean exit");
}
