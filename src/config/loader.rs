//! Grader configuration loaded from a JSON file.
//!
//! Every field has a default, so a missing file is equivalent to `{}`.

use crate::config::types::{GradeError, Result};
use crate::config::validator::{validate_config, ValidationResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default tolerance: a submission may be up to just under 2x slower.
pub const DEFAULT_SLOWDOWN_TOLERANCE: f64 = 1.99;

/// Full grader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraderConfig {
    pub workspace: WorkspaceConfig,
    pub build: BuildConfig,
    pub overlay: OverlayConfig,
    pub sandbox: SandboxConfig,
    pub benchmark: BenchmarkConfig,
    pub lint: LintConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory of the per-run workspace and binary cache
    pub base_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/tmp"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Toolchain driver program
    pub toolchain: String,
    /// Build tags for submission artifacts
    pub tags: Vec<String>,
    /// Build tags selecting the reference implementation for baselines
    pub baseline_tags: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            toolchain: "go".to_string(),
            tags: vec!["private".to_string()],
            baseline_tags: vec!["private".to_string(), "solution".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OverlayConfig {
    /// File name suffix identifying hidden test files
    pub test_file_suffix: String,
    /// Path marker identifying protected (not-to-be-modified) files
    pub protected_marker: String,
    /// Test-data directory name inside a problem
    pub testdata_dir: String,
    /// Files copied from the private root into the workspace root
    pub shared_files: Vec<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            test_file_suffix: "_test.go".to_string(),
            protected_marker: "!change".to_string(),
            testdata_dir: "testdata".to_string(),
            shared_files: vec![
                "go.mod".to_string(),
                "go.sum".to_string(),
                ".golangci.yml".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Unprivileged account submission binaries run as when elevated
    pub user: String,
    pub isolate_network: bool,
    pub isolate_mounts: bool,
    /// Mount an empty tmpfs over the private root inside the sandbox
    pub hide_private_root: bool,
    /// Additional host paths hidden from submission code
    pub hidden_paths: Vec<PathBuf>,
    /// Fail closed when an attenuation step cannot be applied
    pub strict_mode: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            user: "nobody".to_string(),
            isolate_network: true,
            isolate_mounts: true,
            hide_private_root: true,
            hidden_paths: Vec::new(),
            strict_mode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub slowdown_tolerance: f64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            slowdown_tolerance: DEFAULT_SLOWDOWN_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LintConfig {
    pub enabled: bool,
    pub program: String,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "golangci-lint".to_string(),
        }
    }
}

impl GraderConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GradeError::Infrastructure(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: GraderConfig = serde_json::from_str(&content).map_err(|e| {
            GradeError::Infrastructure(format!(
                "Failed to parse config JSON {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration, logging warnings. Errors are fatal.
    pub fn validate(&self) -> Result<ValidationResult> {
        let validation = validate_config(self)?;
        for warning in &validation.warnings {
            log::warn!("Configuration warning: {}", warning);
        }
        Ok(validation)
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                log::debug!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }
}
