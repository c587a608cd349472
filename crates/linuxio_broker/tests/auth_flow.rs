//! Exercises the broker's request flow end to end against a real
//! `UnixStream::pair()`, with `FakePam`/`FakeSudoProbe` standing in for the
//! system PAM stack and a real sudo invocation.

use linuxio_broker::{handle_connection, BrokerConfig, BrokerError, RequestContext};
use linuxio_protocol::{AuthRequest, AuthResponse, AuthStatus};
use linuxio_security::{AuthFailure, BridgeValidationFailure, FakePam, FakeSudoProbe};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

fn base_config(bridge_path: PathBuf) -> BrokerConfig {
    BrokerConfig {
        bridge_path,
        pam_service: "linuxio".to_string(),
        socket_group: "linuxio-bridge-socket".to_string(),
        rlimit_nproc: 64,
        sudo_timeout: Duration::from_secs(4),
        bridge_start_timeout: Duration::from_secs(5),
        verbose: false,
    }
}

fn send_request(client: &mut UnixStream, username: &str, password: &str, session_id: &str) {
    let request = AuthRequest {
        verbose: false,
        username: username.to_string(),
        password: password.to_string(),
        session_id: session_id.to_string(),
    };
    request.write(client).unwrap();
}

/// Success requires a real privilege drop/keep (`setresuid`/`setuid`) in
/// the forked bridge child, which only root can perform.
fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[test]
fn s1_success_spawns_bridge_and_returns_ok_response() {
    if !running_as_root() {
        eprintln!("skipping s1_success_spawns_bridge_and_returns_ok_response: requires root");
        return;
    }

    let pam = FakePam {
        credentials: vec![("root", "rootpass")],
        expired_for: vec![],
        disabled_for: vec![],
        motd: "welcome back",
    };
    let sudo = FakeSudoProbe { capable: vec![0] };
    let config = base_config(PathBuf::from("/bin/true"));
    let ctx = RequestContext {
        config: &config,
        pam: &pam,
        sudo: &sudo,
    };

    let (mut client, server) = UnixStream::pair().unwrap();
    send_request(&mut client, "root", "rootpass", "s1-success");

    let result = handle_connection(&ctx, server);
    assert!(result.is_ok(), "expected success, got {result:?}");

    let response = AuthResponse::read(&mut client).unwrap();
    assert_eq!(response.status, AuthStatus::Ok);
    assert_eq!(response.body, "welcome back");
}

#[test]
fn s2_bad_password_is_rejected_without_touching_the_bridge() {
    let pam = FakePam {
        credentials: vec![("alice", "correcthorse")],
        expired_for: vec![],
        disabled_for: vec![],
        motd: "",
    };
    let sudo = FakeSudoProbe { capable: vec![] };
    let config = base_config(PathBuf::from("/bin/true"));
    let ctx = RequestContext {
        config: &config,
        pam: &pam,
        sudo: &sudo,
    };

    let (mut client, server) = UnixStream::pair().unwrap();
    send_request(&mut client, "alice", "wrong-password", "s2-bad-password");

    let err = handle_connection(&ctx, server).unwrap_err();
    assert!(matches!(err, BrokerError::Auth(AuthFailure::InvalidCredential)));

    let response = AuthResponse::read(&mut client).unwrap();
    assert_eq!(response.status, AuthStatus::Error);
    assert_eq!(response.body, "Authentication failure");
}

#[test]
fn s3_expired_password_is_reported_distinctly() {
    let pam = FakePam {
        credentials: vec![("bob", "pw")],
        expired_for: vec!["bob"],
        disabled_for: vec![],
        motd: "",
    };
    let sudo = FakeSudoProbe { capable: vec![] };
    let config = base_config(PathBuf::from("/bin/true"));
    let ctx = RequestContext {
        config: &config,
        pam: &pam,
        sudo: &sudo,
    };

    let (mut client, server) = UnixStream::pair().unwrap();
    send_request(&mut client, "bob", "pw", "s3-expired-password");

    let err = handle_connection(&ctx, server).unwrap_err();
    assert!(matches!(err, BrokerError::Auth(AuthFailure::PasswordExpired)));

    let response = AuthResponse::read(&mut client).unwrap();
    assert_eq!(response.status, AuthStatus::Error);
    assert_eq!(response.body, "Password has expired.");
}

#[test]
fn s5_bridge_validation_failure_is_surfaced_before_any_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let bridge_path = dir.path().join("bridge");
    std::fs::write(&bridge_path, b"#!/bin/sh\nexit 0\n").unwrap();
    // Group/world-writable: fails the owner check as non-root, the
    // writable check as root. Either way this is not a usable bridge.
    std::fs::set_permissions(&bridge_path, std::fs::Permissions::from_mode(0o775)).unwrap();

    let pam = FakePam {
        credentials: vec![("root", "rootpass")],
        expired_for: vec![],
        disabled_for: vec![],
        motd: "",
    };
    let sudo = FakeSudoProbe { capable: vec![0] };
    let config = base_config(bridge_path);
    let ctx = RequestContext {
        config: &config,
        pam: &pam,
        sudo: &sudo,
    };

    let (mut client, server) = UnixStream::pair().unwrap();
    send_request(&mut client, "root", "rootpass", "s5-bad-bridge");

    let err = handle_connection(&ctx, server).unwrap_err();
    assert!(matches!(
        err,
        BrokerError::BridgeValidation(BridgeValidationFailure::BadOwner(_))
            | BrokerError::BridgeValidation(BridgeValidationFailure::Writable)
    ));

    let response = AuthResponse::read(&mut client).unwrap();
    assert_eq!(response.status, AuthStatus::Error);
    assert_eq!(response.body, "bridge validation failed");
}
