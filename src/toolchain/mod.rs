//! Toolchain adapters.
//!
//! The pipeline stays toolchain-agnostic. Adapters know how to discover
//! packages, compile the three artifact kinds, phrase run arguments and
//! produce a reference benchmark baseline.

pub mod go;
pub mod lint;

use crate::build::ArtifactKind;
use crate::config::types::{GradeError, Result, RunKind};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::Path;
use thiserror::Error;

pub use go::GoToolchain;
pub use lint::{GolangciLint, LintVerdict, Linter, NoLint};

/// Packages discovered under one problem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    /// Module path the import paths are rooted at
    pub module: String,
    /// Main packages built as helper binaries
    pub binaries: BTreeSet<String>,
    /// Packages that carry tests
    pub tests: BTreeSet<String>,
}

impl PackageSet {
    /// Directory of `package` relative to the module root.
    pub fn relative_dir(&self, package: &str) -> Result<String> {
        if package == self.module {
            return Ok(String::new());
        }
        package
            .strip_prefix(&self.module)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string)
            .ok_or_else(|| {
                GradeError::Infrastructure(format!(
                    "package {} is outside module {}",
                    package, self.module
                ))
            })
    }
}

/// One compilation the pipeline asks for.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub package: &'a str,
    pub kind: ArtifactKind,
    pub output: &'a Path,
    pub tags: &'a [String],
    /// Import paths to instrument for coverage (plain test binaries only)
    pub cover_packages: &'a [String],
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// The toolchain ran and refused the code
    #[error("{0}")]
    Rejected(String),
    /// The toolchain could not be run at all
    #[error("toolchain unavailable: {0}")]
    Unavailable(String),
}

/// Build/test toolchain collaborator.
pub trait Toolchain: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> Result<String>;

    /// Discover helper-binary and test packages of `problem` in the workspace.
    fn list_packages(
        &self,
        workspace_root: &Path,
        problem: &str,
        tags: &[String],
    ) -> Result<PackageSet>;

    fn compile(
        &self,
        workspace_root: &Path,
        request: &CompileRequest<'_>,
    ) -> std::result::Result<(), CompileError>;

    /// Arguments passed to a test binary for the given run.
    fn run_args(&self, kind: RunKind, coverage_profile: Option<&Path>) -> Vec<OsString>;

    /// Benchmark output of the reference implementation for `package`.
    fn baseline_benchmarks(
        &self,
        private_root: &Path,
        package: &str,
        tags: &[String],
    ) -> Result<String>;

    /// Variable naming the dedicated cache directory children get.
    fn cache_env_var(&self) -> &'static str;
}

/// Resolve a toolchain adapter by configured name.
pub fn toolchain_for(name: &str) -> Result<Box<dyn Toolchain>> {
    match name {
        "go" => Ok(Box::new(GoToolchain::new("go"))),
        path if path.ends_with("/go") => Ok(Box::new(GoToolchain::new(path))),
        _ => Err(GradeError::Infrastructure(format!(
            "unsupported toolchain adapter: {name}"
        ))),
    }
}

/// Keep the tail of long tool output for error details.
pub(crate) fn tail(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
