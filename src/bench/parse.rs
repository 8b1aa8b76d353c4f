//! Benchmark output parsing.
//!
//! Understands the standard text format:
//!
//! ```text
//! BenchmarkSum-8   	 1000000	      1043 ns/op	     128 B/op	       2 allocs/op
//! ```

/// Marker the test binary prints when the filter matched no benchmarks.
pub const NO_BENCHMARKS_MARKER: &str = "no tests to run";

const PREFIX: &str = "Benchmark";

/// One value of one benchmark line.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Name without the `Benchmark` prefix and the `-<procs>` suffix
    pub name: String,
    pub unit: String,
    pub value: f64,
}

/// True if `output` says no benchmark was executed.
pub fn reports_no_benchmarks(output: &str) -> bool {
    output.contains(NO_BENCHMARKS_MARKER)
}

/// Every measurement in `output`, in order of appearance. Lines that are
/// not benchmark results are ignored.
pub fn parse_measurements(output: &str) -> Vec<Measurement> {
    output.lines().flat_map(parse_line).collect()
}

fn parse_line(line: &str) -> Vec<Measurement> {
    let mut fields = line.split_whitespace();
    let Some(name) = fields.next().and_then(benchmark_name) else {
        return Vec::new();
    };
    // Iteration count; its absence means this is not a result line.
    if fields.next().and_then(|n| n.parse::<u64>().ok()).is_none() {
        return Vec::new();
    }

    let mut measurements = Vec::new();
    let rest: Vec<&str> = fields.collect();
    for pair in rest.chunks_exact(2) {
        let Ok(value) = pair[0].parse::<f64>() else {
            break;
        };
        if !value.is_finite() {
            break;
        }
        measurements.push(Measurement {
            name: name.clone(),
            unit: pair[1].to_string(),
            value,
        });
    }
    measurements
}

/// `BenchmarkFoo/bar-8` -> `Foo/bar`. Rejects `Benchmarks...` style words.
fn benchmark_name(field: &str) -> Option<String> {
    let rest = field.strip_prefix(PREFIX)?;
    if rest.chars().next().is_some_and(|c| c.is_lowercase()) {
        return None;
    }
    let name = match rest.rsplit_once('-') {
        Some((base, procs)) if !procs.is_empty() && procs.bytes().all(|b| b.is_ascii_digit()) => {
            base
        }
        _ => rest,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = "goos: linux
goarch: amd64
pkg: example.com/m/sum
BenchmarkSum-8        	 1000000	      1043 ns/op	     128 B/op	       2 allocs/op
BenchmarkSum-8        	 1000000	      1051 ns/op	     128 B/op	       2 allocs/op
BenchmarkCopy/small-8 	   50000	     23412 ns/op	  512.25 MB/s
PASS
ok  	example.com/m/sum	3.201s
";

    #[test]
    fn parses_every_value_of_every_line() {
        let measurements = parse_measurements(OUTPUT);
        assert_eq!(measurements.len(), 8);
        assert_eq!(measurements[0].name, "Sum");
        assert_eq!(measurements[0].unit, "ns/op");
        assert_eq!(measurements[0].value, 1043.0);
        assert_eq!(measurements[2].unit, "allocs/op");
        assert_eq!(measurements[6].name, "Copy/small");
        assert_eq!(measurements[7].unit, "MB/s");
        assert_eq!(measurements[7].value, 512.25);
    }

    #[test]
    fn names_keep_inner_dashes() {
        assert_eq!(benchmark_name("BenchmarkMap/n-100-16").as_deref(), Some("Map/n-100"));
        assert_eq!(benchmark_name("BenchmarkSum").as_deref(), Some("Sum"));
        assert_eq!(benchmark_name("Benchmarks"), None);
        assert_eq!(benchmark_name("TestSum"), None);
    }

    #[test]
    fn ignores_non_result_lines() {
        assert!(parse_measurements("BenchmarkSum is slow\n--- FAIL: TestSum\n").is_empty());
    }

    #[test]
    fn detects_empty_runs() {
        assert!(reports_no_benchmarks("testing: warning: no tests to run\nPASS\n"));
        assert!(!reports_no_benchmarks(OUTPUT));
    }
}
