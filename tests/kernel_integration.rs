//! Integration tests for kernel module
//!
//! These tests verify ordering and refusal behaviour that does not need root.

use gradebox::config::loader::SandboxConfig;
use gradebox::exec::IsolatedExecutor;
use gradebox::kernel::credentials::{resolve_identity, transition_to_unprivileged, SandboxIdentity};
use gradebox::kernel::namespace::set_no_new_privs;
use nix::errno::Errno;

#[test]
fn test_credential_transition_validates_before_syscall() {
    // Must fail before setgroups/setresgid are attempted.
    let result = transition_to_unprivileged(SandboxIdentity { uid: 0, gid: 1000 });
    assert_eq!(result, Err(Errno::EPERM), "Should reject root UID");

    let result = transition_to_unprivileged(SandboxIdentity { uid: 1000, gid: 0 });
    assert_eq!(result, Err(Errno::EPERM), "Should reject root GID");
}

#[test]
fn test_idempotency_of_no_new_privs() {
    let first = set_no_new_privs();
    let second = set_no_new_privs();
    assert_eq!(first.is_ok(), second.is_ok(), "set_no_new_privs should be idempotent");
}

#[test]
fn test_root_is_never_a_sandbox_identity() {
    assert!(resolve_identity("root", true).is_err());
}

#[test]
fn test_isolated_executor_refuses_root_user() {
    let scratch = tempfile::tempdir().unwrap();
    let config = SandboxConfig {
        user: "root".to_string(),
        ..SandboxConfig::default()
    };
    assert!(IsolatedExecutor::prepare(&config, scratch.path(), scratch.path()).is_err());
}

#[test]
fn test_isolated_executor_keeps_run_dirs_visible() {
    let scratch = tempfile::tempdir().unwrap();
    let private = scratch.path().join("private");
    let runs = private.join("runs");
    std::fs::create_dir_all(&runs).unwrap();

    // Requires a resolvable 'nobody'; nothing is forked.
    let Ok(executor) = IsolatedExecutor::prepare(&SandboxConfig::default(), &private, &runs) else {
        return;
    };
    assert!(executor.hidden_paths().is_empty());
    assert_ne!(executor.identity().uid, 0);
}
