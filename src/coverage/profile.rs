//! Text coverage profiles and their union.

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Source range of one coverable block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub file: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// One profile line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub key: BlockKey,
    pub statements: u64,
    pub hits: u64,
}

/// Why a profile could not be read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("cannot read profile: {0}")]
    Unreadable(String),

    #[error("empty profile")]
    Empty,

    #[error("line {line}: {detail}")]
    Line { line: usize, detail: String },
}

fn bad(line: usize, detail: impl Into<String>) -> ProfileError {
    ProfileError::Line {
        line,
        detail: detail.into(),
    }
}

/// Parse a whole profile: `mode:` header then block lines.
pub fn parse_profile(content: &str) -> Result<Vec<Block>, ProfileError> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    match lines.next() {
        Some((_, header)) if header.starts_with("mode:") => {
            let mode = header["mode:".len()..].trim();
            if !matches!(mode, "set" | "count" | "atomic") {
                return Err(bad(1, format!("unknown mode {:?}", mode)));
            }
        }
        Some((number, _)) => return Err(bad(number, "missing mode header")),
        None => return Err(ProfileError::Empty),
    }

    lines.map(|(number, line)| parse_block(number, line)).collect()
}

/// `file:L1.C1,L2.C2 statements hits`
fn parse_block(number: usize, line: &str) -> Result<Block, ProfileError> {
    // File names may contain ':'; the range follows the last one.
    let (file, rest) = line
        .rsplit_once(':')
        .ok_or_else(|| bad(number, "missing ':'"))?;
    let mut fields = rest.split_whitespace();
    let range = fields.next().ok_or_else(|| bad(number, "missing range"))?;
    let statements = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad(number, "bad statement count"))?;
    let hits = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad(number, "bad hit count"))?;
    if fields.next().is_some() {
        return Err(bad(number, "trailing fields"));
    }

    let (start, end) = range
        .split_once(',')
        .ok_or_else(|| bad(number, "bad range"))?;
    let (start_line, start_col) = position(start).ok_or_else(|| bad(number, "bad start"))?;
    let (end_line, end_col) = position(end).ok_or_else(|| bad(number, "bad end"))?;

    if file.is_empty() {
        return Err(bad(number, "empty file name"));
    }
    Ok(Block {
        key: BlockKey {
            file: file.to_string(),
            start_line,
            start_col,
            end_line,
            end_col,
        },
        statements,
        hits,
    })
}

fn position(text: &str) -> Option<(u32, u32)> {
    let (line, col) = text.split_once('.')?;
    Some((line.parse().ok()?, col.parse().ok()?))
}

/// Union of profiles keyed by source position.
#[derive(Debug, Clone, Default)]
pub struct MergedProfile {
    blocks: BTreeMap<BlockKey, (u64, bool)>,
}

impl MergedProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add blocks; a block seen before is counted once and is covered if any
    /// profile covered it.
    pub fn add(&mut self, blocks: impl IntoIterator<Item = Block>) {
        for block in blocks {
            let covered = block.hits > 0;
            self.blocks
                .entry(block.key)
                .and_modify(|(statements, was_covered)| {
                    *statements = (*statements).max(block.statements);
                    *was_covered |= covered;
                })
                .or_insert((block.statements, covered));
        }
    }

    /// Read and merge the profile at `path`.
    pub fn add_file(&mut self, path: &Path) -> Result<(), ProfileError> {
        let content = std::fs::read_to_string(path).map_err(|e| ProfileError::Unreadable(e.to_string()))?;
        self.add(parse_profile(&content)?);
        Ok(())
    }

    pub fn total_statements(&self) -> u64 {
        self.blocks.values().map(|(statements, _)| statements).sum()
    }

    pub fn covered_statements(&self) -> u64 {
        self.blocks
            .values()
            .filter(|(_, covered)| *covered)
            .map(|(statements, _)| statements)
            .sum()
    }

    /// Covered share in percent; `None` when nothing is coverable.
    pub fn percent(&self) -> Option<f64> {
        let total = self.total_statements();
        if total == 0 {
            return None;
        }
        Some(100.0 * self.covered_statements() as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blocks() {
        let blocks = parse_profile(
            "mode: set\nexample.com/m/sum/sum.go:3.24,5.2 1 1\nexample.com/m/sum/sum.go:7.30,9.16 2 0\n",
        )
        .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].key.start_line, 3);
        assert_eq!(blocks[0].key.start_col, 24);
        assert_eq!(blocks[1].statements, 2);
        assert_eq!(blocks[1].hits, 0);
    }

    #[test]
    fn header_only_profile_is_empty() {
        assert!(parse_profile("mode: atomic\n\n").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_profiles() {
        assert_eq!(parse_profile(""), Err(ProfileError::Empty));
        assert!(parse_profile("a.go:1.1,2.2 1 1\n").is_err());
        assert!(parse_profile("mode: bogus\n").is_err());
        assert!(parse_profile("mode: set\na.go:1.1 1 1\n").is_err());
        assert!(parse_profile("mode: set\na.go:1.1,2.2 x 1\n").is_err());
        assert!(parse_profile("mode: set\na.go:1.1,2.2 1\n").is_err());
        let err = parse_profile("mode: set\na.go:1.1,2.2 1 1\nbroken\n").unwrap_err();
        assert!(matches!(err, ProfileError::Line { line: 3, .. }));
        assert_eq!(err.to_string(), "line 3: missing ':'");
    }

    #[test]
    fn merge_counts_each_block_once() {
        let a = parse_profile("mode: set\nf.go:1.1,1.10 1 1\nf.go:2.1,2.10 1 0\n").unwrap();
        let b = parse_profile("mode: set\nf.go:3.1,3.10 1 1\n").unwrap();

        let mut merged = MergedProfile::new();
        merged.add(a.clone());
        merged.add(b);
        let percent = merged.percent().unwrap();
        assert!((percent - 200.0 / 3.0).abs() < 1e-9);

        let mut once = MergedProfile::new();
        once.add(a.clone());
        let mut twice = MergedProfile::new();
        twice.add(a.clone());
        twice.add(a);
        assert_eq!(once.percent(), twice.percent());
        assert_eq!(twice.total_statements(), 2);
    }

    #[test]
    fn covered_wins_on_conflict() {
        let missed = parse_profile("mode: set\nf.go:1.1,1.10 3 0\n").unwrap();
        let hit = parse_profile("mode: set\nf.go:1.1,1.10 3 5\n").unwrap();

        let mut merged = MergedProfile::new();
        merged.add(hit);
        merged.add(missed);
        assert_eq!(merged.covered_statements(), 3);
        assert_eq!(merged.percent(), Some(100.0));
    }

    #[test]
    fn statements_weigh_the_percentage() {
        let blocks = parse_profile("mode: count\nf.go:1.1,4.2 3 7\nf.go:5.1,6.2 1 0\n").unwrap();
        let mut merged = MergedProfile::new();
        merged.add(blocks);
        assert_eq!(merged.percent(), Some(75.0));
    }

    #[test]
    fn nothing_coverable_has_no_percentage() {
        assert_eq!(MergedProfile::new().percent(), None);
    }
}
