//! Execution strategies for built artifacts.
//!
//! The pipeline talks to one [`Executor`], chosen once per invocation by
//! [`select_executor`]. Both strategies share the same launch/wait logic and
//! differ only in what happens between fork and exec.

use crate::config::loader::SandboxConfig;
use crate::config::types::{Result, RunKind};
use crate::exec::env::ChildEnv;
use crate::exec::isolated::IsolatedExecutor;
use std::ffi::OsString;
use std::io;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;

/// One execution of a test binary.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    /// Package the binary belongs to (for reporting)
    pub package: &'a str,
    pub run: RunKind,
    pub program: &'a Path,
    pub args: Vec<OsString>,
    pub workdir: PathBuf,
    /// Directories this run owns under the shared run base
    pub run_dirs: &'a [PathBuf],
    pub env: &'a ChildEnv,
    /// Capture stdout instead of forwarding it
    pub capture_stdout: bool,
}

/// What a successful run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Verbatim stdout, present only when capture was requested
    pub stdout: Option<String>,
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },

    #[error("cannot prepare execution of {program}: {detail}")]
    Setup { program: String, detail: String },
}

/// Strategy that runs one artifact with a controlled environment.
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, invocation: &Invocation<'_>) -> std::result::Result<RunOutput, ExecError>;
}

/// Base command for an invocation: explicit env, working dir, stdio.
pub(crate) fn prepare_command(
    invocation: &Invocation<'_>,
) -> std::result::Result<Command, ExecError> {
    let mut cmd = Command::new(invocation.program);
    cmd.args(&invocation.args).current_dir(&invocation.workdir);
    invocation.env.apply(&mut cmd);

    cmd.stdin(Stdio::null()).stderr(Stdio::inherit());
    if invocation.capture_stdout {
        cmd.stdout(Stdio::piped());
    } else {
        // Test chatter goes to our stderr; stdout is reserved for the report.
        let stderr = io::stderr()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| ExecError::Setup {
                program: invocation.program.display().to_string(),
                detail: e.to_string(),
            })?;
        cmd.stdout(Stdio::from(stderr));
    }
    Ok(cmd)
}

/// Spawn, wait and classify.
pub(crate) fn wait_for(
    mut cmd: Command,
    invocation: &Invocation<'_>,
) -> std::result::Result<RunOutput, ExecError> {
    let program = invocation.program.display().to_string();
    log::info!(
        "> {} run of {}: {} {:?}",
        invocation.run,
        invocation.package,
        program,
        invocation.args
    );

    let output = cmd.output().map_err(|source| ExecError::Launch {
        program: program.clone(),
        source,
    })?;
    if !output.status.success() {
        return Err(ExecError::Exit {
            program,
            status: output.status,
        });
    }

    let stdout = invocation
        .capture_stdout
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned());
    Ok(RunOutput { stdout })
}

/// Runs artifacts as the current user. Used when the grader is not
/// privileged and the host is assumed disposable.
#[derive(Debug, Clone, Default)]
pub struct DirectExecutor;

impl DirectExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for DirectExecutor {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn run(&self, invocation: &Invocation<'_>) -> std::result::Result<RunOutput, ExecError> {
        let cmd = prepare_command(invocation)?;
        wait_for(cmd, invocation)
    }
}

/// Pick the execution strategy for this invocation: isolated when running
/// as root, direct otherwise. `run_base` is where every run creates its
/// workspace and binary cache.
pub fn select_executor(
    config: &SandboxConfig,
    private_root: &Path,
    run_base: &Path,
) -> Result<Box<dyn Executor>> {
    if nix::unistd::geteuid().is_root() {
        let executor = IsolatedExecutor::prepare(config, private_root, run_base)?;
        log::info!("running submission binaries isolated as '{}'", config.user);
        Ok(Box::new(executor))
    } else {
        log::info!("not running as root, submission binaries run directly");
        Ok(Box::new(DirectExecutor::new()))
    }
}
