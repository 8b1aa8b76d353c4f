// Config validation
// Fails fast with actionable errors before any workspace is created.

use crate::config::loader::GraderConfig;
use crate::config::types::{GradeError, Result};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a loaded configuration. Errors are fatal; warnings are returned.
pub fn validate_config(config: &GraderConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_workspace(config, &mut result);
    validate_build(config, &mut result);
    validate_overlay(config, &mut result);
    validate_sandbox(config, &mut result);
    validate_benchmark(config, &mut result);

    if !result.is_valid() {
        return Err(GradeError::Infrastructure(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_workspace(config: &GraderConfig, result: &mut ValidationResult) {
    if !config.workspace.base_dir.is_absolute() {
        result.add_error(format!(
            "workspace.base_dir must be absolute, got {}",
            config.workspace.base_dir.display()
        ));
    }
}

fn validate_build(config: &GraderConfig, result: &mut ValidationResult) {
    if config.build.toolchain.trim().is_empty() {
        result.add_error("build.toolchain cannot be empty".to_string());
    }
    if config.build.tags.iter().any(|t| t.trim().is_empty()) {
        result.add_error("build.tags cannot contain empty tags".to_string());
    }
    if config.build.baseline_tags.is_empty() {
        result.add_error("build.baseline_tags cannot be empty".to_string());
    }
    if config.build.baseline_tags == config.build.tags {
        result.add_warning(
            "build.baseline_tags equal build.tags; the baseline will not select the reference implementation"
                .to_string(),
        );
    }
}

fn validate_overlay(config: &GraderConfig, result: &mut ValidationResult) {
    if config.overlay.test_file_suffix.is_empty() {
        result.add_error("overlay.test_file_suffix cannot be empty".to_string());
    }
    if config.overlay.protected_marker.is_empty() {
        result.add_error("overlay.protected_marker cannot be empty".to_string());
    }
    for shared in &config.overlay.shared_files {
        if shared.contains("..") || shared.starts_with('/') {
            result.add_error(format!(
                "overlay.shared_files entry must be a plain relative path: {}",
                shared
            ));
        }
    }
}

fn validate_sandbox(config: &GraderConfig, result: &mut ValidationResult) {
    if config.sandbox.user.trim().is_empty() {
        result.add_error("sandbox.user cannot be empty".to_string());
    }
    if config.sandbox.user == "root" {
        result.add_error("sandbox.user must not be root".to_string());
    }
    for hidden in &config.sandbox.hidden_paths {
        if !hidden.is_absolute() {
            result.add_error(format!(
                "sandbox.hidden_paths entries must be absolute: {}",
                hidden.display()
            ));
        }
    }
    if !config.sandbox.isolate_mounts
        && (config.sandbox.hide_private_root || !config.sandbox.hidden_paths.is_empty())
    {
        result.add_warning(
            "hidden paths require sandbox.isolate_mounts; they will not be hidden".to_string(),
        );
    }
    if !config.sandbox.isolate_network {
        result.add_warning("sandbox.isolate_network is off; submissions can reach the network".to_string());
    }
}

fn validate_benchmark(config: &GraderConfig, result: &mut ValidationResult) {
    let tolerance = config.benchmark.slowdown_tolerance;
    if !tolerance.is_finite() || tolerance <= 1.0 {
        result.add_error(format!(
            "benchmark.slowdown_tolerance must be a finite value above 1.0, got {}",
            tolerance
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_config_is_valid() {
        let result = validate_config(&GraderConfig::default()).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn rejects_relative_base_dir() {
        let mut config = GraderConfig::default();
        config.workspace.base_dir = PathBuf::from("scratch");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_tolerance_at_or_below_one() {
        let mut config = GraderConfig::default();
        config.benchmark.slowdown_tolerance = 1.0;
        assert!(validate_config(&config).is_err());
        config.benchmark.slowdown_tolerance = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_root_sandbox_user() {
        let mut config = GraderConfig::default();
        config.sandbox.user = "root".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("must not be root"));
    }

    #[test]
    fn rejects_escaping_shared_file() {
        let mut config = GraderConfig::default();
        config.overlay.shared_files.push("../secrets".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn warns_when_network_is_shared() {
        let mut config = GraderConfig::default();
        config.sandbox.isolate_network = false;
        let result = validate_config(&config).unwrap();
        assert_eq!(result.warnings.len(), 1);
    }
}
