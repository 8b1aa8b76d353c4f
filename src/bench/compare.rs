//! Baseline comparison.

use super::parse::Measurement;
use crate::config::types::SubmissionFailure;
use std::collections::BTreeMap;

/// Mean of one benchmark/unit pair after outlier removal.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSample {
    pub name: String,
    pub unit: String,
    pub mean: f64,
    /// Values that survived outlier removal
    pub runs: usize,
}

/// Old vs new for one benchmark/unit pair.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkComparison {
    pub name: String,
    pub unit: String,
    pub old_mean: f64,
    pub new_mean: f64,
    pub accepted: bool,
}

impl BenchmarkComparison {
    pub fn to_failure(&self) -> SubmissionFailure {
        SubmissionFailure::BenchmarkRegression {
            benchmark: self.name.clone(),
            unit: self.unit.clone(),
            old_mean: self.old_mean,
            new_mean: self.new_mean,
        }
    }
}

/// Throughput units (`MB/s`) improve upwards; everything else downwards.
pub fn higher_is_better(unit: &str) -> bool {
    unit.ends_with("/s")
}

/// The one-sided rule: only a slowdown beyond `tolerance` fails.
pub fn within_tolerance(unit: &str, old_mean: f64, new_mean: f64, tolerance: f64) -> bool {
    if higher_is_better(unit) {
        !(old_mean > tolerance * new_mean)
    } else {
        !(new_mean > tolerance * old_mean)
    }
}

/// Linear-interpolated quantile of sorted, non-empty `values`.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Mean after discarding values outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
fn trimmed_mean(values: &mut [f64]) -> (f64, usize) {
    values.sort_by(f64::total_cmp);
    let q1 = quantile(values, 0.25);
    let q3 = quantile(values, 0.75);
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    let kept: Vec<f64> = values.iter().copied().filter(|v| (lo..=hi).contains(v)).collect();
    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    (mean, kept.len())
}

/// Group measurements by (name, unit) and reduce each group to a sample.
pub fn summarize(measurements: &[Measurement]) -> BTreeMap<(String, String), BenchmarkSample> {
    let mut groups: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();
    for m in measurements {
        groups
            .entry((m.name.clone(), m.unit.clone()))
            .or_default()
            .push(m.value);
    }

    groups
        .into_iter()
        .map(|((name, unit), mut values)| {
            let (mean, runs) = trimmed_mean(&mut values);
            let sample = BenchmarkSample {
                name: name.clone(),
                unit: unit.clone(),
                mean,
                runs,
            };
            ((name, unit), sample)
        })
        .collect()
}

/// Compare every pair present on both sides, in sorted order.
pub fn compare(
    old: &[Measurement],
    new: &[Measurement],
    tolerance: f64,
) -> Vec<BenchmarkComparison> {
    let old = summarize(old);
    let new = summarize(new);

    let mut comparisons = Vec::new();
    for (key, new_sample) in &new {
        let Some(old_sample) = old.get(key) else {
            log::warn!(
                "benchmark {} ({}) has no baseline, not compared",
                new_sample.name,
                new_sample.unit
            );
            continue;
        };
        comparisons.push(BenchmarkComparison {
            name: new_sample.name.clone(),
            unit: new_sample.unit.clone(),
            old_mean: old_sample.mean,
            new_mean: new_sample.mean,
            accepted: within_tolerance(&new_sample.unit, old_sample.mean, new_sample.mean, tolerance),
        });
    }
    for (key, old_sample) in &old {
        if !new.contains_key(key) {
            log::warn!(
                "baseline benchmark {} ({}) missing from submission run",
                old_sample.name,
                old_sample.unit
            );
        }
    }
    comparisons
}
