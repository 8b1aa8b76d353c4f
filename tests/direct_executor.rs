//! DirectExecutor against real processes.

use gradebox::build::registry::{BinaryRegistry, RegistryBuilder, BINARIES_ENV};
use gradebox::config::types::RunKind;
use gradebox::exec::{ChildEnv, DirectExecutor, ExecError, Executor, Invocation};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn registry() -> BinaryRegistry {
    let mut builder = RegistryBuilder::new();
    builder.insert("example.com/m/sum/cmd/server", "/tmp/bincache-test/server");
    builder.finish()
}

fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake.test");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn run(program: &Path, workdir: &Path, env: &ChildEnv, capture: bool) -> Result<Option<String>, ExecError> {
    let invocation = Invocation {
        package: "example.com/m/sum",
        run: RunKind::BenchmarkOnly,
        program,
        args: vec!["-test.bench=.".into()],
        workdir: workdir.to_path_buf(),
        run_dirs: &[],
        env,
        capture_stdout: capture,
    };
    DirectExecutor::new().run(&invocation).map(|out| out.stdout)
}

#[test]
fn child_sees_only_the_minimal_environment() {
    std::env::set_var("GRADEBOX_TEST_SECRET", "hunter2");
    let scratch = tempfile::tempdir().unwrap();
    let cache = scratch.path().join("cache");
    let env = ChildEnv::minimal("GOCACHE", &cache, &registry()).unwrap();
    let program = script(scratch.path(), "env");

    let stdout = run(&program, scratch.path(), &env, true).unwrap().unwrap();
    let mut keys: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.split_once('=').map(|(k, _)| k))
        // the shell itself exports these
        .filter(|k| !matches!(*k, "PWD" | "SHLVL" | "_" | "OLDPWD"))
        .collect();
    keys.sort();
    keys.retain(|k| *k != "HOME");
    assert_eq!(keys, vec!["GOCACHE", BINARIES_ENV, "PATH"]);
    assert!(stdout.contains(&format!("GOCACHE={}", cache.display())));
    assert!(!stdout.contains("hunter2"));
}

#[test]
fn child_can_resolve_helpers_through_the_registry() {
    let scratch = tempfile::tempdir().unwrap();
    let env = ChildEnv::minimal("GOCACHE", scratch.path(), &registry()).unwrap();
    let program = script(scratch.path(), &format!("printf '%s' \"${}\"", BINARIES_ENV));

    let blob = run(&program, scratch.path(), &env, true).unwrap().unwrap();
    let seen = BinaryRegistry::decode(&blob).unwrap();
    assert_eq!(
        seen.lookup("example.com/m/sum/cmd/server"),
        Some(Path::new("/tmp/bincache-test/server"))
    );
}

#[test]
fn runs_in_the_requested_directory() {
    let scratch = tempfile::tempdir().unwrap();
    let workdir = scratch.path().join("sum");
    fs::create_dir_all(&workdir).unwrap();
    let env = ChildEnv::minimal("GOCACHE", scratch.path(), &BinaryRegistry::default()).unwrap();
    let program = script(scratch.path(), "pwd -P");

    let stdout = run(&program, &workdir, &env, true).unwrap().unwrap();
    assert_eq!(stdout.trim(), fs::canonicalize(&workdir).unwrap().to_str().unwrap());
}

#[test]
fn failing_binary_reports_its_exit_status() {
    let scratch = tempfile::tempdir().unwrap();
    let env = ChildEnv::minimal("GOCACHE", scratch.path(), &BinaryRegistry::default()).unwrap();
    let program = script(scratch.path(), "echo '--- FAIL: TestSum' >&2; exit 1");

    match run(&program, scratch.path(), &env, false) {
        Err(ExecError::Exit { status, .. }) => assert_eq!(status.code(), Some(1)),
        other => panic!("unexpected outcome: {other:?}"),
    }
}
