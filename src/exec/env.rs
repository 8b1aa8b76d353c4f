//! Environment hygiene for child processes.
//!
//! Children never inherit the grader's environment. They get exactly the
//! search path, home directory, a dedicated toolchain cache and the binary
//! registry blob.

use crate::build::registry::{BinaryRegistry, BINARIES_ENV};
use crate::config::types::Result;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Command;

/// Loader variables that must never reach a submission binary.
const DANGEROUS_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "LD_BIND_NOW",
    "LD_DEBUG",
    "LD_PROFILE",
];

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Complete, explicit environment of a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildEnv {
    vars: BTreeMap<String, OsString>,
}

impl ChildEnv {
    /// Minimal environment built from the grader's PATH and HOME.
    pub fn minimal(cache_var: &str, cache_dir: &Path, registry: &BinaryRegistry) -> Result<Self> {
        let mut env = Self::default();
        env.set(
            "PATH",
            std::env::var_os("PATH").unwrap_or_else(|| OsString::from(FALLBACK_PATH)),
        );
        if let Some(home) = std::env::var_os("HOME") {
            env.set("HOME", home);
        }
        env.set(cache_var, cache_dir.as_os_str());
        env.set(BINARIES_ENV, registry.encode()?);
        Ok(env)
    }

    fn set(&mut self, key: &str, value: impl Into<OsString>) {
        self.vars.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(key).map(OsString::as_os_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Replace the whole environment of `cmd` with this one.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env_clear();
        cmd.envs(self.vars.iter().map(|(k, v)| (k.as_str(), v.as_os_str())));
    }

    /// Problems with this environment; empty when safe.
    pub fn safety_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for var in DANGEROUS_VARS {
            if self.vars.contains_key(*var) {
                warnings.push(format!("Dangerous environment variable present: {}", var));
            }
        }
        if let Some(path) = self.get("PATH") {
            let path = path.to_string_lossy();
            if path.split(':').any(|dir| dir.is_empty() || !dir.starts_with('/')) {
                warnings.push("PATH contains relative entries".to_string());
            }
        }
        warnings
    }
}
