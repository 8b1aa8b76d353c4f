//! Privilege-attenuated execution.
//!
//! Each child re-establishes the restriction itself between fork and exec,
//! so the grader keeps full rights for its own bookkeeping:
//! namespaces -> private mounts -> run-base confinement -> hidden paths
//! -> loopback -> credentials -> no_new_privs.

use crate::config::loader::SandboxConfig;
use crate::config::types::{GradeError, Result};
use crate::exec::executor::{prepare_command, wait_for, ExecError, Executor, Invocation, RunOutput};
use crate::kernel::credentials::{resolve_identity, transition_to_unprivileged, SandboxIdentity};
use crate::kernel::namespace::{self, NamespacePlan, RunConfinement};
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};

/// Everything a child applies to itself before exec. Built before fork.
#[derive(Debug, Clone)]
struct AttenuationPlan {
    namespaces: NamespacePlan,
    identity: SandboxIdentity,
}

impl AttenuationPlan {
    /// Async-signal-safe: no logging, no allocation.
    fn apply(&self, confinement: Option<&RunConfinement>) -> io::Result<()> {
        self.namespaces.apply(confinement).map_err(io::Error::from)?;
        transition_to_unprivileged(self.identity).map_err(io::Error::from)?;
        namespace::set_no_new_privs().map_err(io::Error::from)?;
        Ok(())
    }
}

/// Runs artifacts as an unprivileged user in fresh namespaces.
#[derive(Debug, Clone)]
pub struct IsolatedExecutor {
    plan: AttenuationPlan,
    /// Shared parent of every run's directories; confined per invocation.
    run_base: Option<PathBuf>,
}

impl IsolatedExecutor {
    /// Resolve the sandbox user and the paths to hide. `run_base` is the
    /// directory all runs create their workspace and cache in: a child only
    /// ever sees its own run's directories there, and a hidden root that
    /// contains it stays visible.
    pub fn prepare(config: &SandboxConfig, private_root: &Path, run_base: &Path) -> Result<Self> {
        if config.isolate_mounts && !namespace::is_supported() {
            return Err(GradeError::Infrastructure(
                "namespaces are not available on this host".to_string(),
            ));
        }

        let identity = resolve_identity(&config.user, config.strict_mode)?;

        let mut candidates: Vec<PathBuf> = Vec::new();
        if config.hide_private_root {
            candidates.push(private_root.to_path_buf());
        }
        candidates.extend(config.hidden_paths.iter().cloned());

        let run_base = canonical(run_base);
        let mut hidden = Vec::new();
        for path in hidden_paths(&candidates, &run_base) {
            hidden.push(c_path(&path).map_err(GradeError::Infrastructure)?);
        }
        if !config.isolate_mounts {
            log::warn!(
                "mount isolation is disabled; {} hidden path(s) and concurrent runs under {} stay visible",
                hidden.len(),
                run_base.display()
            );
        }

        let plan = AttenuationPlan {
            namespaces: NamespacePlan::new(config.isolate_network, config.isolate_mounts, hidden),
            identity,
        };
        log::debug!("Attenuation plan: {:?}", plan);
        Ok(Self {
            plan,
            run_base: config.isolate_mounts.then_some(run_base),
        })
    }

    pub fn identity(&self) -> SandboxIdentity {
        self.plan.identity
    }

    pub fn hidden_paths(&self) -> &[CString] {
        self.plan.namespaces.hidden_paths()
    }

    /// Confinement of the run base for one invocation, plus the directory
    /// handles its bind sources refer to. The handles must stay open until
    /// the child has exec'd.
    fn confinement(
        &self,
        invocation: &Invocation<'_>,
    ) -> std::result::Result<Option<(RunConfinement, Vec<File>)>, ExecError> {
        let Some(base) = &self.run_base else {
            return Ok(None);
        };
        let setup = |detail: String| ExecError::Setup {
            program: invocation.program.display().to_string(),
            detail,
        };

        let mut anchors = Vec::with_capacity(invocation.run_dirs.len());
        let mut binds = Vec::with_capacity(invocation.run_dirs.len());
        for dir in invocation.run_dirs {
            let dir = std::fs::canonicalize(dir)
                .map_err(|e| setup(format!("run directory {}: {}", dir.display(), e)))?;
            if dir.parent() != Some(base.as_path()) {
                return Err(setup(format!(
                    "run directory {} is not directly under {}",
                    dir.display(),
                    base.display()
                )));
            }
            let anchor = File::open(&dir)
                .map_err(|e| setup(format!("cannot open {}: {}", dir.display(), e)))?;
            let source = CString::new(format!("/proc/self/fd/{}", anchor.as_raw_fd()))
                .map_err(|e| setup(e.to_string()))?;
            binds.push((source, c_path(&dir).map_err(setup)?));
            anchors.push(anchor);
        }

        let workdir = canonical(&invocation.workdir);
        let confinement = RunConfinement::new(
            c_path(base).map_err(setup)?,
            binds,
            c_path(&workdir).map_err(setup)?,
        );
        Ok(Some((confinement, anchors)))
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn c_path(path: &Path) -> std::result::Result<CString, String> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| format!("path contains a NUL byte: {}", path.display()))
}

/// Existing candidates that neither contain nor lie inside the run base.
fn hidden_paths(candidates: &[PathBuf], run_base: &Path) -> Vec<PathBuf> {
    let mut hidden = Vec::new();
    for candidate in candidates {
        if !candidate.exists() {
            log::warn!("hidden path {} does not exist, skipping", candidate.display());
            continue;
        }
        let candidate = canonical(candidate);
        if run_base.starts_with(&candidate) {
            log::warn!(
                "not hiding {}: it contains the run directory base {}",
                candidate.display(),
                run_base.display()
            );
            continue;
        }
        if candidate.starts_with(run_base) {
            log::debug!("{} lies inside the confined run base", candidate.display());
            continue;
        }
        if !hidden.contains(&candidate) {
            hidden.push(candidate);
        }
    }
    hidden
}

impl Executor for IsolatedExecutor {
    fn name(&self) -> &'static str {
        "isolated"
    }

    fn run(&self, invocation: &Invocation<'_>) -> std::result::Result<RunOutput, ExecError> {
        let mut cmd = prepare_command(invocation)?;
        let (confinement, _anchors) = match self.confinement(invocation)? {
            Some((confinement, anchors)) => (Some(confinement), anchors),
            None => (None, Vec::new()),
        };
        let plan = self.plan.clone();
        // SAFETY: the hook only issues syscalls on data prepared before fork.
        unsafe {
            cmd.pre_exec(move || plan.apply(confinement.as_ref()));
        }
        wait_for(cmd, invocation)
    }
}
