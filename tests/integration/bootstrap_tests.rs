//! Bootstrap state machine tests against a scripted transport.
//!
//! The fake transport answers probe commands from fixture state and backs
//! `open_exec` with a real in-process dispatcher, so a successful run ends
//! with a genuine liveness ping.

use std::collections::HashMap;
use std::time::Duration;

use outpost::bootstrap::{Arch, Bootstrap, BootstrapConfig};
use outpost::proto::version_banner;
use outpost::{AppError, BootstrapStage};

use super::test_helpers::FakeTransport;

fn test_config(binary_dir: &tempfile::TempDir) -> BootstrapConfig {
    let binary = binary_dir.path().join("outpost-agent-fixture");
    std::fs::write(&binary, b"\x7fELF fixture").expect("write fixture binary");

    let mut binaries = HashMap::new();
    binaries.insert(Arch::Amd64, binary.clone());
    binaries.insert(Arch::Arm64, binary);

    BootstrapConfig {
        lock_timeout: Duration::from_secs(2),
        ping_timeout: Duration::from_secs(5),
        binaries,
        ..BootstrapConfig::default()
    }
}

#[tokio::test]
async fn fresh_host_installs_and_passes_liveness() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new("x86_64");

    let outcome = Bootstrap::new(&transport, test_config(&dir))
        .run()
        .await
        .expect("bootstrap succeeds");

    assert!(outcome.installed, "fresh host requires a transfer");
    assert!(!outcome.privileged, "uid 1000 is not privileged");
    assert_eq!(transport.upload_count(), 1);

    outcome.handle.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn current_version_skips_straight_past_install() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new("x86_64");
    *transport.installed_banner.lock().unwrap() = Some(version_banner());

    let outcome = Bootstrap::new(&transport, test_config(&dir))
        .run()
        .await
        .expect("bootstrap succeeds");

    assert!(!outcome.installed);
    assert_eq!(transport.upload_count(), 0, "no transfer for a current install");

    outcome.handle.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn version_mismatch_triggers_reinstall() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new("aarch64");
    *transport.installed_banner.lock().unwrap() =
        Some("outpost-agent version 0.0.1".to_owned());

    let outcome = Bootstrap::new(&transport, test_config(&dir))
        .run()
        .await
        .expect("bootstrap succeeds");

    assert!(outcome.installed, "stale version must be replaced");
    assert_eq!(transport.upload_count(), 1);

    outcome.handle.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn rebootstrap_against_a_current_install_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new("x86_64");
    let config = test_config(&dir);

    let first = Bootstrap::new(&transport, config.clone())
        .run()
        .await
        .expect("first bootstrap");
    assert!(first.installed);
    first.handle.disconnect().await.expect("disconnect");

    let second = Bootstrap::new(&transport, config)
        .run()
        .await
        .expect("second bootstrap");
    assert!(!second.installed, "second run must skip the install");
    assert_eq!(transport.upload_count(), 1, "exactly one transfer across both runs");
    second.handle.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn unsupported_architecture_is_fatal_with_no_transfer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new("mips");

    let err = Bootstrap::new(&transport, test_config(&dir))
        .run()
        .await
        .expect_err("mips is outside the supported set");

    match err {
        AppError::Bootstrap(stage, msg) => {
            assert_eq!(stage, BootstrapStage::Install);
            assert!(msg.contains("unsupported architecture"), "message: {msg}");
        }
        other => panic!("expected a bootstrap error, got: {other}"),
    }
    assert_eq!(transport.upload_count(), 0, "no transfer may precede the arch check");
}

#[tokio::test]
async fn held_install_lock_times_out_as_lock_wait() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new("x86_64");
    *transport.lock_busy_polls.lock().unwrap() = u32::MAX;

    let mut config = test_config(&dir);
    config.lock_timeout = Duration::from_millis(300);

    let err = Bootstrap::new(&transport, config)
        .run()
        .await
        .expect_err("lock never clears");

    match err {
        AppError::Bootstrap(stage, _) => assert_eq!(stage, BootstrapStage::LockWait),
        other => panic!("expected a lock-wait error, got: {other}"),
    }
}

#[tokio::test]
async fn lock_that_clears_lets_bootstrap_proceed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new("x86_64");
    *transport.lock_busy_polls.lock().unwrap() = 1;

    let outcome = Bootstrap::new(&transport, test_config(&dir))
        .run()
        .await
        .expect("bootstrap succeeds after one poll");
    outcome.handle.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn unprivileged_identity_launches_with_sudo() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new("x86_64");

    let outcome = Bootstrap::new(&transport, test_config(&dir))
        .run()
        .await
        .expect("bootstrap succeeds");
    assert!(!outcome.privileged);

    let execs = transport.exec_commands();
    assert_eq!(execs.len(), 1);
    assert!(execs[0].starts_with("sudo "), "launch command: {}", execs[0]);

    outcome.handle.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn privileged_identity_launches_without_sudo() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut transport = FakeTransport::new("x86_64");
    transport.uid = "0".to_owned();

    let outcome = Bootstrap::new(&transport, test_config(&dir))
        .run()
        .await
        .expect("bootstrap succeeds");
    assert!(outcome.privileged);

    let execs = transport.exec_commands();
    assert_eq!(execs.len(), 1);
    assert!(
        !execs[0].contains("sudo"),
        "privileged launch must not escalate: {}",
        execs[0]
    );

    outcome.handle.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn missing_prebuilt_binary_fails_the_install_stage() {
    let transport = FakeTransport::new("x86_64");

    let config = BootstrapConfig {
        lock_timeout: Duration::from_secs(2),
        ping_timeout: Duration::from_secs(5),
        ..BootstrapConfig::default()
    };

    let err = Bootstrap::new(&transport, config)
        .run()
        .await
        .expect_err("no binary configured for amd64");

    match err {
        AppError::Bootstrap(stage, msg) => {
            assert_eq!(stage, BootstrapStage::Install);
            assert!(msg.contains("no prebuilt agent binary"), "message: {msg}");
        }
        other => panic!("expected a bootstrap error, got: {other}"),
    }
}
