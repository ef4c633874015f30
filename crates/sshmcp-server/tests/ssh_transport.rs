//! Drives `SshTransport` against a stand-in `ssh` program that runs the
//! remote command locally.
#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sshmcp_common::{AuthMaterial, CommandPolicy, RemoteTarget};
use sshmcp_server::coordinator::{CoordinatorError, ExecutionCoordinator, Outcome};
use sshmcp_server::executor::ssh::{SshOptions, SshTransport};
use sshmcp_server::executor::{RemoteInvocation, RemoteTransport, TransportError};
use sshmcp_server::session::SessionRegistry;
use tempfile::TempDir;

const FAKE_SSH: &str = r#"#!/bin/sh
while [ "$#" -gt 0 ]; do
  if [ "$1" = "--" ]; then
    shift
    break
  fi
  shift
done
host="$1"
shift
if [ "$host" = "unreachable.invalid" ]; then
  echo "ssh: Could not resolve hostname $host" >&2
  exit 255
fi
exec sh -c "$1"
"#;

// Written once so no test forks while another holds the script open for
// writing (ETXTBSY).
fn fake_ssh() -> &'static PathBuf {
    static FAKE: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    &FAKE
        .get_or_init(|| {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("ssh");
            std::fs::write(&path, FAKE_SSH).expect("write fake ssh");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod fake ssh");
            (dir, path)
        })
        .1
}

fn transport(timeout: Option<Duration>, max_output_bytes: usize) -> SshTransport {
    SshTransport::new(SshOptions {
        ssh_binary: fake_ssh().display().to_string(),
        command_timeout: timeout,
        max_output_bytes,
        ..SshOptions::default()
    })
}

fn target(host: &str) -> RemoteTarget {
    RemoteTarget {
        host: host.to_string(),
        port: 22,
        username: "tester".to_string(),
        auth: AuthMaterial::default(),
    }
}

#[tokio::test]
async fn captures_streams_and_exit_code() {
    let result = transport(None, 1024)
        .run(
            &target("box"),
            &RemoteInvocation::new("echo out; echo err >&2; exit 3"),
        )
        .await
        .unwrap();
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
    assert_eq!(result.exit_code, 3);
    assert!(!result.success);
    assert!(!result.truncated);
}

#[tokio::test]
async fn feeds_stdin_byte_for_byte() {
    let content = "first\n'second' $HOME\nno newline";
    let result = transport(None, 1024)
        .run(
            &target("box"),
            &RemoteInvocation::new("cat").with_stdin(content.as_bytes()),
        )
        .await
        .unwrap();
    assert_eq!(result.stdout, content);
    assert!(result.success);
}

#[tokio::test]
async fn write_then_read_through_real_shell() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("it's here.txt");
    let path = path.to_str().unwrap();
    let ssh = transport(None, 1024);

    let write = sshmcp_common::compose::write_file(path, Some("600")).unwrap();
    let result = ssh
        .run(
            &target("box"),
            &RemoteInvocation::new(write).with_stdin(&b"a\nb"[..]),
        )
        .await
        .unwrap();
    assert!(result.success, "{}", result.stderr);

    let read = sshmcp_common::compose::read_file(path).unwrap();
    let result = ssh
        .run(&target("box"), &RemoteInvocation::new(read))
        .await
        .unwrap();
    assert_eq!(result.stdout, "a\nb");
    let mode = std::fs::metadata(path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn output_beyond_cap_is_truncated() {
    let result = transport(None, 10)
        .run(
            &target("box"),
            &RemoteInvocation::new("printf '%s' 0123456789abcdef"),
        )
        .await
        .unwrap();
    assert_eq!(result.stdout, "0123456789");
    assert!(result.truncated);
    assert!(result.success);
}

#[tokio::test]
async fn slow_command_times_out() {
    let err = transport(Some(Duration::from_millis(200)), 1024)
        .run(&target("box"), &RemoteInvocation::new("sleep 5"))
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout(Duration::from_millis(200)));
}

#[tokio::test]
async fn session_failure_is_a_connection_error() {
    let err = transport(None, 1024)
        .run(&target("unreachable.invalid"), &RemoteInvocation::new("true"))
        .await
        .unwrap_err();
    match err {
        TransportError::Connection(msg) => assert!(msg.contains("Could not resolve")),
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn remote_exit_255_keeps_its_output() {
    let result = transport(None, 1024)
        .run(
            &target("box"),
            &RemoteInvocation::new("echo important; echo 'it broke' >&2; exit 255"),
        )
        .await
        .unwrap();
    assert_eq!(result.exit_code, 255);
    assert_eq!(result.stdout, "important\n");
    assert_eq!(result.stderr, "it broke\n");
    assert!(!result.success);
}

fn coordinator(max_output_bytes: usize) -> ExecutionCoordinator {
    ExecutionCoordinator::new(
        CommandPolicy::default(),
        Arc::new(transport(None, max_output_bytes)),
        target("box"),
        4,
        SessionRegistry::new(Duration::from_secs(60)),
    )
}

#[tokio::test]
async fn edit_of_file_beyond_output_cap_leaves_it_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.txt");
    let original = format!("HEAD{}TAIL", "x".repeat(100));
    std::fs::write(&path, &original).unwrap();
    let path = path.to_str().unwrap();
    let coord = coordinator(32);

    let err = coord.edit_file(path, "HEAD", "head").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidArgument(_)), "{err:?}");
    assert_eq!(std::fs::read_to_string(path).unwrap(), original);

    match coord.read_file(path).await.unwrap() {
        Outcome::Done(report) => {
            assert!(report.truncated);
            assert_eq!(report.bytes, 32);
        }
        Outcome::Rejected { reason } => panic!("unexpected rejection: {reason}"),
    }
}

#[tokio::test]
async fn edit_of_non_utf8_file_leaves_it_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latin1.txt");
    let original = b"caf\xe9 KEY\n".to_vec();
    std::fs::write(&path, &original).unwrap();
    let path = path.to_str().unwrap();

    let err = coordinator(1024).edit_file(path, "KEY", "VAL").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidArgument(_)), "{err:?}");
    assert_eq!(std::fs::read(path).unwrap(), original);
}

#[tokio::test]
async fn missing_client_binary_is_a_spawn_error() {
    let ssh = SshTransport::new(SshOptions {
        ssh_binary: "/nonexistent/ssh".to_string(),
        ..SshOptions::default()
    });
    let err = ssh
        .run(&target("box"), &RemoteInvocation::new("true"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Spawn(_)));
}
