//! Core types shared by every grading stage: the error taxonomy, stage
//! identifiers and the verdict handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stage of the grading state machine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Stage {
    #[serde(rename = "assemble_workspace")]
    AssembleWorkspace,
    #[serde(rename = "build_artifacts")]
    BuildArtifacts,
    #[serde(rename = "run_correctness")]
    RunCorrectness,
    #[serde(rename = "run_race_and_bench")]
    RunRaceAndBench,
    #[serde(rename = "run_benchmark_only")]
    RunBenchmarkOnly,
    #[serde(rename = "compare_baseline")]
    CompareBaseline,
    #[serde(rename = "aggregate_coverage")]
    AggregateCoverage,
    #[serde(rename = "run_lint")]
    RunLint,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AssembleWorkspace => "assemble_workspace",
            Stage::BuildArtifacts => "build_artifacts",
            Stage::RunCorrectness => "run_correctness",
            Stage::RunRaceAndBench => "run_race_and_bench",
            Stage::RunBenchmarkOnly => "run_benchmark_only",
            Stage::CompareBaseline => "compare_baseline",
            Stage::AggregateCoverage => "aggregate_coverage",
            Stage::RunLint => "run_lint",
        };
        f.write_str(name)
    }
}

/// Flavour of a test-binary execution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunKind {
    /// Plain binary, functional tests only (optionally writing a coverage profile)
    #[serde(rename = "correctness")]
    Correctness,
    /// Race-instrumented binary, tests plus benchmarks
    #[serde(rename = "race")]
    Race,
    /// Plain binary, benchmarks only, stdout captured
    #[serde(rename = "benchmark")]
    BenchmarkOnly,
}

impl RunKind {
    /// Stage a failure of this run is attributed to.
    pub fn stage(self) -> Stage {
        match self {
            RunKind::Correctness => Stage::RunCorrectness,
            RunKind::Race => Stage::RunRaceAndBench,
            RunKind::BenchmarkOnly => Stage::RunBenchmarkOnly,
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Correctness => f.write_str("correctness"),
            RunKind::Race => f.write_str("race"),
            RunKind::BenchmarkOnly => f.write_str("benchmark"),
        }
    }
}

/// Errors that are never a grading verdict.
#[derive(Error, Debug)]
pub enum GradeError {
    /// Bad invocation, detected before any resource is allocated
    #[error("Input error: {0}")]
    Input(String),

    /// The grading system itself is broken (workspace, toolchain, linter, assets)
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<std::io::Error> for GradeError {
    fn from(err: std::io::Error) -> Self {
        GradeError::Infrastructure(err.to_string())
    }
}

impl From<nix::errno::Errno> for GradeError {
    fn from(err: nix::errno::Errno) -> Self {
        GradeError::Infrastructure(err.to_string())
    }
}

/// Ways a submission can be wrong. Each is reported as a rejection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionFailure {
    #[error("error building {package}: {detail}")]
    Build { package: String, detail: String },

    #[error("test failed: {run} run of {package}: {cause}")]
    RuntimeTest {
        package: String,
        run: RunKind,
        cause: String,
    },

    #[error("poor coverage {percent:.2}%; expected at least {required:.2}%")]
    CoverageShortfall { percent: f64, required: f64 },

    #[error("coverage misconfigured: {detail}")]
    CoverageConfiguration { detail: String },

    #[error("unusable coverage profile {path}: {detail}")]
    MalformedCoverageProfile { path: String, detail: String },

    #[error(
        "solution is worse than baseline on benchmark {benchmark:?}: {old_mean} {unit} -> {new_mean} {unit}"
    )]
    BenchmarkRegression {
        benchmark: String,
        unit: String,
        old_mean: f64,
        new_mean: f64,
    },

    #[error("linter failed: {detail}")]
    Lint { detail: String },
}

impl SubmissionFailure {
    /// Stable category name used in reports.
    pub fn category(&self) -> &'static str {
        match self {
            SubmissionFailure::Build { .. } => "build_error",
            SubmissionFailure::RuntimeTest { .. } => "runtime_test_failure",
            SubmissionFailure::CoverageShortfall { .. } => "coverage_shortfall",
            SubmissionFailure::CoverageConfiguration { .. } => "coverage_configuration_error",
            SubmissionFailure::MalformedCoverageProfile { .. } => "malformed_coverage_profile",
            SubmissionFailure::BenchmarkRegression { .. } => "benchmark_regression",
            SubmissionFailure::Lint { .. } => "lint_failure",
        }
    }
}

/// Outcome of a run that reached a grading decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted,
    Rejected {
        stage: Stage,
        failure: SubmissionFailure,
    },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Internal control flow of the pipeline: a rejection or a fatal error.
#[derive(Debug)]
pub(crate) enum Halt {
    Rejected(Stage, SubmissionFailure),
    Fatal(GradeError),
}

impl From<GradeError> for Halt {
    fn from(err: GradeError) -> Self {
        Halt::Fatal(err)
    }
}

impl From<std::io::Error> for Halt {
    fn from(err: std::io::Error) -> Self {
        Halt::Fatal(err.into())
    }
}

/// Final status written to reports.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineStatus {
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "input_error")]
    InputError,
    #[serde(rename = "infrastructure_error")]
    InfrastructureError,
}

impl PipelineStatus {
    /// Process exit code for this status.
    pub fn exit_code(self) -> i32 {
        match self {
            PipelineStatus::Accepted => 0,
            PipelineStatus::Rejected => 1,
            PipelineStatus::InputError => 2,
            PipelineStatus::InfrastructureError => 3,
        }
    }
}

/// Serializable summary of one pipeline invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineResult {
    pub problem: String,
    pub status: PipelineStatus,
    /// First failing stage, if the run was rejected
    pub stage: Option<Stage>,
    pub category: Option<String>,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn from_outcome(
        problem: &str,
        outcome: &std::result::Result<Verdict, GradeError>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let (status, stage, category, detail) = match outcome {
            Ok(Verdict::Accepted) => (PipelineStatus::Accepted, None, None, None),
            Ok(Verdict::Rejected { stage, failure }) => (
                PipelineStatus::Rejected,
                Some(*stage),
                Some(failure.category().to_string()),
                Some(failure.to_string()),
            ),
            Err(err @ GradeError::Input(_)) => (
                PipelineStatus::InputError,
                None,
                Some("input_error".to_string()),
                Some(err.to_string()),
            ),
            Err(err @ GradeError::Infrastructure(_)) => (
                PipelineStatus::InfrastructureError,
                None,
                Some("infrastructure_error".to_string()),
                Some(err.to_string()),
            ),
        };

        Self {
            problem: problem.to_string(),
            status,
            stage,
            category,
            detail,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Result type alias for grading operations
pub type Result<T> = std::result::Result<T, GradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_kinds_map_to_their_stage() {
        assert_eq!(RunKind::Correctness.stage(), Stage::RunCorrectness);
        assert_eq!(RunKind::Race.stage(), Stage::RunRaceAndBench);
        assert_eq!(RunKind::BenchmarkOnly.stage(), Stage::RunBenchmarkOnly);
    }

    #[test]
    fn regression_message_names_benchmark_and_means() {
        let failure = SubmissionFailure::BenchmarkRegression {
            benchmark: "Sum".to_string(),
            unit: "ns/op".to_string(),
            old_mean: 100.0,
            new_mean: 201.0,
        };
        let message = failure.to_string();
        assert!(message.contains("\"Sum\""));
        assert!(message.contains("100 ns/op"));
        assert!(message.contains("201 ns/op"));
        assert_eq!(failure.category(), "benchmark_regression");
    }

    #[test]
    fn shortfall_message_carries_both_numbers() {
        let failure = SubmissionFailure::CoverageShortfall {
            percent: 66.666,
            required: 80.0,
        };
        assert_eq!(
            failure.to_string(),
            "poor coverage 66.67%; expected at least 80.00%"
        );
    }

    #[test]
    fn result_statuses_are_distinct() {
        let started = Utc::now();
        let rejected = PipelineResult::from_outcome(
            "sum",
            &Ok(Verdict::Rejected {
                stage: Stage::RunLint,
                failure: SubmissionFailure::Lint {
                    detail: "exit status 1".to_string(),
                },
            }),
            started,
        );
        assert_eq!(rejected.status, PipelineStatus::Rejected);
        assert_eq!(rejected.stage, Some(Stage::RunLint));
        assert_eq!(rejected.category.as_deref(), Some("lint_failure"));

        let infra = PipelineResult::from_outcome(
            "sum",
            &Err(GradeError::Infrastructure("go not found".to_string())),
            started,
        );
        assert_eq!(infra.status, PipelineStatus::InfrastructureError);
        assert_eq!(infra.status.exit_code(), 3);

        let input = PipelineResult::from_outcome(
            "sum",
            &Err(GradeError::Input("missing".to_string())),
            started,
        );
        assert_eq!(input.status.exit_code(), 2);
    }

    #[test]
    fn status_serializes_in_snake_case() {
        let json = serde_json::to_string(&PipelineStatus::InfrastructureError).unwrap();
        assert_eq!(json, "\"infrastructure_error\"");
        let json = serde_json::to_string(&Stage::CompareBaseline).unwrap();
        assert_eq!(json, "\"compare_baseline\"");
    }
}
