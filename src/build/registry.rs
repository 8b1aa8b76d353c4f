//! Name -> path table of helper binaries, handed to every child process.
//!
//! The transport is one environment variable holding a JSON object. Test code
//! should only ever go through [`BinaryRegistry::lookup`]; the encoding is
//! not part of the contract.

use crate::config::types::{GradeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable carrying the encoded registry.
pub const BINARIES_ENV: &str = "GRADEBOX_BINARIES";

/// Read-only lookup table of built helper binaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinaryRegistry {
    binaries: BTreeMap<String, PathBuf>,
}

impl BinaryRegistry {
    /// Look up a helper binary by its package name.
    pub fn lookup(&self, name: &str) -> Option<&Path> {
        self.binaries.get(name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.binaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty()
    }

    /// Serialize into the opaque blob placed in [`BINARIES_ENV`].
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            GradeError::Infrastructure(format!("Failed to encode binary registry: {}", e))
        })
    }

    pub fn decode(blob: &str) -> Result<Self> {
        serde_json::from_str(blob).map_err(|e| {
            GradeError::Infrastructure(format!("Failed to decode binary registry: {}", e))
        })
    }

    /// Registry inherited from the grader, as seen by test code. Absent
    /// variable means no helper binaries were built.
    pub fn from_env() -> Result<Self> {
        match std::env::var(BINARIES_ENV) {
            Ok(blob) => Self::decode(&blob),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(GradeError::Infrastructure(format!(
                "{} is not valid unicode: {}",
                BINARIES_ENV, e
            ))),
        }
    }
}

/// Accumulates successfully built binaries. Only [`RegistryBuilder::finish`]
/// yields a usable registry, so a half-built one never reaches a child.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    binaries: BTreeMap<String, PathBuf>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.binaries.insert(name.into(), path.into());
    }

    pub fn finish(self) -> BinaryRegistry {
        BinaryRegistry {
            binaries: self.binaries,
        }
    }
}
