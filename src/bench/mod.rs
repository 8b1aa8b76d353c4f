//! Benchmark regression detection.
//!
//! Benchmark timings are noisy, so the check only catches gross slowdowns:
//! a benchmark fails when the submission is more than `tolerance` times
//! worse than the reference implementation. A faster submission never fails.

pub mod compare;
pub mod parse;

use crate::config::types::SubmissionFailure;

pub use compare::{BenchmarkComparison, BenchmarkSample};
pub use parse::{reports_no_benchmarks, Measurement, NO_BENCHMARKS_MARKER};

/// Baseline-vs-submission check with a fixed slowdown tolerance.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkRegression {
    tolerance: f64,
}

impl BenchmarkRegression {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Compare raw baseline and submission outputs. The first failing
    /// comparison, in sorted order, is returned as the failure.
    pub fn evaluate(
        &self,
        baseline_output: &str,
        submission_output: &str,
    ) -> Result<Vec<BenchmarkComparison>, SubmissionFailure> {
        let old = parse::parse_measurements(baseline_output);
        let new = parse::parse_measurements(submission_output);
        let comparisons = compare::compare(&old, &new, self.tolerance);

        for comparison in &comparisons {
            log::info!(
                "{:<30} {:>14.2} {:>14.2} {} {}",
                comparison.name,
                comparison.old_mean,
                comparison.new_mean,
                comparison.unit,
                if comparison.accepted { "ok" } else { "REGRESSION" }
            );
            if !comparison.accepted {
                return Err(comparison.to_failure());
            }
        }
        Ok(comparisons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ns: &[u32]) -> String {
        ns.iter()
            .map(|v| format!("BenchmarkSum-8 \t 1000 \t {} ns/op\n", v))
            .collect()
    }

    #[test]
    fn accepts_up_to_the_tolerance() {
        let regression = BenchmarkRegression::new(1.99);
        let comparisons = regression.evaluate(&run(&[100]), &run(&[199])).unwrap();
        assert_eq!(comparisons.len(), 1);
        assert!(comparisons[0].accepted);
    }

    #[test]
    fn rejects_beyond_the_tolerance() {
        let regression = BenchmarkRegression::new(1.99);
        let failure = regression.evaluate(&run(&[100]), &run(&[201])).unwrap_err();
        let message = failure.to_string();
        assert!(message.contains("\"Sum\""));
        assert!(message.contains("100 ns/op"));
        assert!(message.contains("201 ns/op"));
    }

    #[test]
    fn means_over_repeated_runs() {
        let regression = BenchmarkRegression::new(1.99);
        let comparisons = regression
            .evaluate(&run(&[90, 100, 110]), &run(&[150, 160, 170]))
            .unwrap();
        assert_eq!(comparisons[0].old_mean, 100.0);
        assert_eq!(comparisons[0].new_mean, 160.0);
    }

    #[test]
    fn tolerance_is_configurable() {
        let strict = BenchmarkRegression::new(1.5);
        assert!(strict.evaluate(&run(&[100]), &run(&[160])).is_err());
    }

    #[test]
    fn output_without_benchmarks_compares_nothing() {
        let regression = BenchmarkRegression::new(1.99);
        assert!(regression
            .evaluate(&run(&[100]), "testing: warning: no tests to run\nPASS\n")
            .unwrap()
            .is_empty());
    }
}
