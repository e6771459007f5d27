// Keep-range retention rules passed to `prune`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CompileError, Result};

/// One retention rule
///
/// Snapshots older than `min_age` days are thinned to one every `interval`
/// days. An interval of 0 deletes every snapshot older than `min_age`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepRange {
    /// Days between kept snapshots
    pub interval: u32,

    /// Age in days before this rule applies
    pub min_age: u32,
}

impl KeepRange {
    /// Command-line arguments for this rule
    pub fn flag(&self) -> String {
        format!("-keep {self}")
    }
}

impl fmt::Display for KeepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.interval, self.min_age)
    }
}

/// Check that keep ranges are listed oldest rule first
///
/// The tool evaluates `-keep` options expecting strictly decreasing
/// `min_age` values; anything else is rejected rather than reordered so the
/// generated command matches the declaration.
pub fn ensure_descending_ages(job: &str, ranges: &[KeepRange]) -> Result<()> {
    for pair in ranges.windows(2) {
        if pair[1].min_age >= pair[0].min_age {
            return Err(CompileError::KeepRangeOrder {
                job: job.to_string(),
                previous: pair[0].to_string(),
                next: pair[1].to_string(),
            });
        }
    }
    Ok(())
}
