//! `go` command adapter.
//!
//! Packages are discovered from the `go list -json` stream. Reference
//! benchmarks run in the private root, never in the workspace.

use crate::build::ArtifactKind;
use crate::config::types::{GradeError, Result, RunKind};
use crate::toolchain::{tail, CompileError, CompileRequest, PackageSet, Toolchain};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

const DETAIL_LIMIT: usize = 4096;

/// Adapter driving the `go` command.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    program: PathBuf,
}

/// Subset of a `go list -json` package record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedPackage {
    import_path: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    test_go_files: Vec<String>,
    #[serde(default)]
    x_test_go_files: Vec<String>,
}

impl GoToolchain {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Toolchain invocations run unrestricted with the host environment;
    /// only GOFLAGS is neutralised so host settings cannot change the build.
    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir).env("GOFLAGS", "");
        cmd
    }

    fn capture(&self, mut cmd: Command, what: &str) -> Result<Output> {
        log::info!("> {:?}", cmd);
        cmd.stdin(Stdio::null())
            .output()
            .map_err(|e| GradeError::Infrastructure(format!("failed to launch {}: {}", what, e)))
    }

    fn tags_arg(tags: &[String]) -> Option<String> {
        if tags.is_empty() {
            None
        } else {
            Some(tags.join(","))
        }
    }
}

/// Module path from the `module` directive of `<root>/go.mod`.
pub fn read_module_path(root: &Path) -> Result<String> {
    let go_mod = root.join("go.mod");
    let content = std::fs::read_to_string(&go_mod).map_err(|e| {
        GradeError::Infrastructure(format!("failed to read {}: {}", go_mod.display(), e))
    })?;
    parse_module_directive(&content).ok_or_else(|| {
        GradeError::Infrastructure(format!("no module directive in {}", go_mod.display()))
    })
}

fn parse_module_directive(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let line = line.split("//").next().unwrap_or("").trim();
        let rest = line.strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let module = rest.trim().trim_matches('"');
        (!module.is_empty()).then(|| module.to_string())
    })
}

/// Split a `go list -json` stream into helper and test packages.
fn parse_package_list(module: String, stream: &[u8]) -> Result<PackageSet> {
    let mut set = PackageSet {
        module,
        ..PackageSet::default()
    };
    for record in serde_json::Deserializer::from_slice(stream).into_iter::<ListedPackage>() {
        let pkg = record.map_err(|e| {
            GradeError::Infrastructure(format!("failed to parse go list output: {}", e))
        })?;
        if pkg.name == "main" {
            set.binaries.insert(pkg.import_path.clone());
        }
        if !pkg.test_go_files.is_empty() || !pkg.x_test_go_files.is_empty() {
            set.tests.insert(pkg.import_path);
        }
    }
    Ok(set)
}

fn build_args(request: &CompileRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = match request.kind {
        ArtifactKind::Helper => vec!["build".into(), "-mod".into(), "readonly".into()],
        ArtifactKind::Test => vec!["test".into(), "-mod".into(), "readonly".into()],
        ArtifactKind::RaceTest => vec![
            "test".into(),
            "-mod".into(),
            "readonly".into(),
            "-race".into(),
        ],
    };
    if let Some(tags) = GoToolchain::tags_arg(request.tags) {
        args.push("-tags".into());
        args.push(tags.into());
    }
    if request.kind != ArtifactKind::Helper {
        args.push("-c".into());
    }
    args.push("-o".into());
    args.push(request.output.into());
    args.push(request.package.into());
    if request.kind == ArtifactKind::Test && !request.cover_packages.is_empty() {
        args.push("-cover".into());
        args.push("-coverpkg".into());
        args.push(request.cover_packages.join(",").into());
    }
    args
}

impl Toolchain for GoToolchain {
    fn name(&self) -> &'static str {
        "go"
    }

    fn version(&self) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("version");
        let output = self.capture(cmd, "go version")?;
        if !output.status.success() {
            return Err(GradeError::Infrastructure(format!(
                "go version exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn list_packages(
        &self,
        workspace_root: &Path,
        problem: &str,
        tags: &[String],
    ) -> Result<PackageSet> {
        let module = read_module_path(workspace_root)?;
        let mut cmd = self.command(workspace_root);
        cmd.args(["list", "-e", "-json"]);
        if let Some(tags) = Self::tags_arg(tags) {
            cmd.args(["-tags", tags.as_str()]);
        }
        cmd.arg(format!("./{}/...", problem));

        let output = self.capture(cmd, "go list")?;
        if !output.status.success() {
            return Err(GradeError::Infrastructure(format!(
                "go list failed with {}: {}",
                output.status,
                tail(&String::from_utf8_lossy(&output.stderr), DETAIL_LIMIT)
            )));
        }
        parse_package_list(module, &output.stdout)
    }

    fn compile(
        &self,
        workspace_root: &Path,
        request: &CompileRequest<'_>,
    ) -> std::result::Result<(), CompileError> {
        let mut cmd = self.command(workspace_root);
        cmd.args(build_args(request));
        log::info!("> {:?}", cmd);

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CompileError::Unavailable(e.to_string()))?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let diagnostics = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(CompileError::Rejected(format!(
            "{}: {}",
            output.status,
            tail(&diagnostics, DETAIL_LIMIT)
        )))
    }

    fn run_args(&self, kind: RunKind, coverage_profile: Option<&Path>) -> Vec<OsString> {
        match kind {
            RunKind::Correctness => match coverage_profile {
                Some(profile) => vec!["-test.coverprofile".into(), profile.into()],
                None => Vec::new(),
            },
            RunKind::Race => vec!["-test.bench=.".into()],
            RunKind::BenchmarkOnly => vec!["-test.bench=.".into(), "-test.run=^$".into()],
        }
    }

    fn baseline_benchmarks(
        &self,
        private_root: &Path,
        package: &str,
        tags: &[String],
    ) -> Result<String> {
        let mut cmd = self.command(private_root);
        cmd.arg("test");
        if let Some(tags) = Self::tags_arg(tags) {
            cmd.args(["-tags", tags.as_str()]);
        }
        cmd.args(["-bench=.", "-run=^$", package]);
        cmd.stderr(Stdio::inherit());

        let output = self.capture(cmd, "baseline benchmark")?;
        if !output.status.success() {
            return Err(GradeError::Infrastructure(format!(
                "baseline benchmark failed for {}: {}",
                package, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn cache_env_var(&self) -> &'static str {
        "GOCACHE"
    }
}
