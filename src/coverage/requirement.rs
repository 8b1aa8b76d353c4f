//! Per-problem coverage policy.
//!
//! The policy is declared in the private test files of a problem:
//!
//! ```text
//! // min coverage: 85.5% . ./internal/store
//! ```
//!
//! The first declaration wins (files scanned in sorted path order). No
//! declaration means coverage is not enforced.

use crate::config::types::{GradeError, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

const DIRECTIVE: &str = "min coverage:";

/// Coverage policy of one problem. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRequirement {
    pub enabled: bool,
    pub threshold_percent: f64,
    /// Package directories relative to the problem, `.` is the problem itself
    pub packages: Vec<String>,
}

impl CoverageRequirement {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            threshold_percent: 0.0,
            packages: Vec::new(),
        }
    }

    /// Scan the test files of `private_root/problem` for a declaration.
    pub fn load(private_root: &Path, problem: &str, test_suffix: &str) -> Result<Self> {
        let problem_dir = private_root.join(problem);
        for entry in WalkDir::new(&problem_dir)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                GradeError::Infrastructure(format!(
                    "Failed to scan {} for coverage policy: {}",
                    problem_dir.display(),
                    e
                ))
            })?;
            if !entry.file_type().is_file()
                || !entry.file_name().to_string_lossy().ends_with(test_suffix)
            {
                continue;
            }

            let content = fs::read_to_string(entry.path()).map_err(|e| {
                GradeError::Infrastructure(format!(
                    "Failed to read {}: {}",
                    entry.path().display(),
                    e
                ))
            })?;
            if let Some(requirement) = parse_declaration(&content).map_err(|detail| {
                GradeError::Infrastructure(format!(
                    "Bad coverage declaration in {}: {}",
                    entry.path().display(),
                    detail
                ))
            })? {
                log::debug!(
                    "Coverage policy from {}: {:?}",
                    entry.path().display(),
                    requirement
                );
                return Ok(requirement);
            }
        }
        Ok(Self::disabled())
    }

    /// Import paths of the instrumented packages.
    pub fn import_paths(&self, module: &str, problem: &str) -> Vec<String> {
        self.packages
            .iter()
            .map(|pkg| {
                let rel = pkg.trim_start_matches("./").trim_end_matches('/');
                if rel.is_empty() || rel == "." {
                    format!("{}/{}", module, problem)
                } else {
                    format!("{}/{}/{}", module, problem, rel)
                }
            })
            .collect()
    }
}

/// First declaration in a file, if any.
fn parse_declaration(content: &str) -> std::result::Result<Option<CoverageRequirement>, String> {
    for line in content.lines() {
        let Some(comment) = line.trim().strip_prefix("//") else {
            continue;
        };
        let Some(spec) = comment.trim().strip_prefix(DIRECTIVE) else {
            continue;
        };

        let mut fields = spec.split_whitespace();
        let percent = fields
            .next()
            .ok_or_else(|| "missing percentage".to_string())?;
        let number = percent
            .strip_suffix('%')
            .ok_or_else(|| format!("percentage {:?} must end with %", percent))?;
        let threshold_percent: f64 = number
            .parse()
            .map_err(|_| format!("invalid percentage {:?}", percent))?;
        if !(0.0..=100.0).contains(&threshold_percent) {
            return Err(format!("percentage {} is out of range", threshold_percent));
        }

        let mut packages: Vec<String> = fields.map(str::to_string).collect();
        if packages.is_empty() {
            packages.push(".".to_string());
        }
        return Ok(Some(CoverageRequirement {
            enabled: true,
            threshold_percent,
            packages,
        }));
    }
    Ok(None)
}
