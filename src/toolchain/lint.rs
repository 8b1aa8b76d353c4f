//! Static-analysis collaborator.

use crate::config::types::{GradeError, Result};
use crate::toolchain::tail;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Outcome of a lint check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintVerdict {
    Pass,
    Fail(String),
}

/// Lint collaborator: `Ok(Fail)` is a submission failure, `Err` means the
/// linter could not be run.
pub trait Linter: Send + Sync {
    fn check(&self, workspace_root: &Path, problem: &str) -> Result<LintVerdict>;

    fn version(&self) -> Result<String>;
}

/// golangci-lint driver.
#[derive(Debug, Clone)]
pub struct GolangciLint {
    program: PathBuf,
    tags: Vec<String>,
}

impl GolangciLint {
    pub fn new(program: impl Into<PathBuf>, tags: Vec<String>) -> Self {
        Self {
            program: program.into(),
            tags,
        }
    }

    fn args(&self, problem: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--modules-download-mode".to_string(),
            "readonly".to_string(),
        ];
        if !self.tags.is_empty() {
            args.push("--build-tags".to_string());
            args.push(self.tags.join(","));
        }
        args.push(format!("./{}/...", problem));
        args
    }
}

impl Linter for GolangciLint {
    fn check(&self, workspace_root: &Path, problem: &str) -> Result<LintVerdict> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(problem))
            .current_dir(workspace_root)
            .stdin(Stdio::null());
        log::info!("> {:?}", cmd);

        let output = cmd.output().map_err(|e| {
            GradeError::Infrastructure(format!(
                "failed to launch linter {}: {}",
                self.program.display(),
                e
            ))
        })?;
        if output.status.success() {
            return Ok(LintVerdict::Pass);
        }

        let report = String::from_utf8_lossy(&output.stdout);
        Ok(LintVerdict::Fail(format!(
            "{}: {}",
            output.status,
            tail(&report, 4096)
        )))
    }

    fn version(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                GradeError::Infrastructure(format!(
                    "failed to launch linter {}: {}",
                    self.program.display(),
                    e
                ))
            })?;
        if !output.status.success() {
            return Err(GradeError::Infrastructure(format!(
                "{} --version exited with {}",
                self.program.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Linter used when linting is disabled in configuration.
#[derive(Debug, Clone, Default)]
pub struct NoLint;

impl Linter for NoLint {
    fn check(&self, _workspace_root: &Path, _problem: &str) -> Result<LintVerdict> {
        log::info!("linting disabled, skipping");
        Ok(LintVerdict::Pass)
    }

    fn version(&self) -> Result<String> {
        Ok("disabled".to_string())
    }
}
