//! IsolatedExecutor against real processes.
//!
//! These tests fork through the full pre-exec chain and therefore only do
//! anything when run as root with a resolvable `nobody` account.

use gradebox::build::registry::{BinaryRegistry, BINARIES_ENV};
use gradebox::config::loader::SandboxConfig;
use gradebox::config::types::RunKind;
use gradebox::exec::{ChildEnv, Executor, Invocation, IsolatedExecutor};
use gradebox::safety::workspace::{BinaryCache, Workspace};
use std::fs;
use std::path::{Path, PathBuf};

struct Sandbox {
    // Run directories go first so they are dropped before their base.
    workspace: Workspace,
    cache: BinaryCache,
    executor: IsolatedExecutor,
    base: tempfile::TempDir,
    private: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Option<Self> {
        if !nix::unistd::geteuid().is_root() {
            return None;
        }
        let base = tempfile::tempdir().unwrap();
        let private = tempfile::tempdir().unwrap();
        fs::create_dir(private.path().join("sum")).unwrap();
        fs::write(private.path().join("sum/secret_test.go"), "package sum\n").unwrap();

        // No resolvable sandbox user on this host.
        let executor =
            IsolatedExecutor::prepare(&SandboxConfig::default(), private.path(), base.path()).ok()?;
        let workspace = Workspace::create(base.path(), "sum").unwrap();
        let cache = BinaryCache::create(base.path()).unwrap();
        Some(Self {
            workspace,
            cache,
            executor,
            base,
            private,
        })
    }

    fn run_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.workspace.root().to_path_buf(),
            self.cache.root().to_path_buf(),
        ]
    }

    fn sh(&self, script: &str) -> String {
        let env = ChildEnv::minimal("GOCACHE", self.cache.toolchain_cache_dir(), &BinaryRegistry::default())
            .unwrap();
        let run_dirs = self.run_dirs();
        let invocation = Invocation {
            package: "example.com/m/sum",
            run: RunKind::Correctness,
            program: Path::new("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            workdir: self.workspace.root().to_path_buf(),
            run_dirs: &run_dirs,
            env: &env,
            capture_stdout: true,
        };
        self.executor.run(&invocation).unwrap().stdout.unwrap()
    }
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn child_runs_without_root() {
    let Some(sandbox) = Sandbox::new() else {
        return;
    };
    let uid = sandbox.sh("id -u");
    assert_ne!(uid.trim(), "0");
    assert_eq!(uid.trim().parse::<u32>().unwrap(), sandbox.executor.identity().uid);
}

#[test]
fn private_root_looks_empty() {
    let Some(sandbox) = Sandbox::new() else {
        return;
    };
    let listing = sandbox.sh(&format!("ls -A {}", sandbox.private.path().display()));
    assert_eq!(listing.trim(), "");
    assert!(sandbox.private.path().join("sum/secret_test.go").is_file());
}

#[test]
fn only_loopback_is_configured() {
    let Some(sandbox) = Sandbox::new() else {
        return;
    };
    let devices = sandbox.sh("cat /proc/net/dev");
    let interfaces: Vec<&str> = devices
        .lines()
        .skip(2)
        .filter_map(|line| line.split_once(':').map(|(name, _)| name.trim()))
        .collect();
    assert_eq!(interfaces, vec!["lo"]);
}

#[test]
fn environment_is_the_minimal_one() {
    let Some(sandbox) = Sandbox::new() else {
        return;
    };
    let stdout = sandbox.sh("env");
    let mut keys: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.split_once('=').map(|(k, _)| k))
        .filter(|k| !matches!(*k, "PWD" | "SHLVL" | "_" | "OLDPWD" | "HOME"))
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["GOCACHE", BINARIES_ENV, "PATH"]);
}

#[test]
fn concurrent_runs_under_the_same_base_are_out_of_reach() {
    let Some(sandbox) = Sandbox::new() else {
        return;
    };
    let other = BinaryCache::create(sandbox.base.path()).unwrap();
    let forged = other.profile_path();

    let script = format!(
        "ls -A {base}; if echo 'mode: set' > {forged} 2>/dev/null; then echo wrote=1; else echo wrote=0; fi",
        base = sandbox.base.path().display(),
        forged = forged.display()
    );
    let stdout = sandbox.sh(&script);

    let mut own: Vec<String> = sandbox
        .run_dirs()
        .iter()
        .map(|dir| dir.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    own.sort();
    let mut seen: Vec<String> = stdout
        .lines()
        .filter(|line| !line.starts_with("wrote="))
        .map(str::to_string)
        .collect();
    seen.sort();
    assert_eq!(seen, own);
    assert!(stdout.contains("wrote=0"));
    assert!(!forged.exists());

    // The host view is untouched: all three run directories are still there.
    assert_eq!(names(sandbox.base.path()).len(), 3);
}

#[test]
fn own_run_directories_stay_usable() {
    let Some(sandbox) = Sandbox::new() else {
        return;
    };
    let profile = sandbox.cache.profile_path();
    let stdout = sandbox.sh(&format!(
        "pwd -P; echo 'mode: set' > {}",
        profile.display()
    ));
    assert_eq!(
        stdout.trim(),
        fs::canonicalize(sandbox.workspace.root()).unwrap().to_str().unwrap()
    );
    assert_eq!(fs::read_to_string(&profile).unwrap(), "mode: set\n");
}
