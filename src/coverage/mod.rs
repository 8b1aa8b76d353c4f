//! Coverage aggregation and enforcement.

pub mod profile;
pub mod requirement;

use crate::config::types::SubmissionFailure;
use profile::MergedProfile;
use std::path::PathBuf;

pub use requirement::CoverageRequirement;

/// Merge `profiles` and check the result against `required` percent.
/// Returns the merged percentage.
pub fn aggregate(profiles: &[PathBuf], required: f64) -> Result<f64, SubmissionFailure> {
    let mut merged = MergedProfile::new();
    for path in profiles {
        merged
            .add_file(path)
            .map_err(|e| SubmissionFailure::MalformedCoverageProfile {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
    }

    let percent = merged
        .percent()
        .ok_or_else(|| SubmissionFailure::CoverageConfiguration {
            detail: format!(
                "no coverable statements in {} profile(s); check the instrumented package list",
                profiles.len()
            ),
        })?;
    log::info!(
        "coverage is {:.2}% ({} of {} statements)",
        percent,
        merged.covered_statements(),
        merged.total_statements()
    );

    if percent < required {
        return Err(SubmissionFailure::CoverageShortfall { percent, required });
    }
    Ok(percent)
}
