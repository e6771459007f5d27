//! Chunk size bounds for content-defined chunking

use serde::{Deserialize, Serialize};

use crate::config::RawChunkParameters;
use crate::error::{CompileError, Result};
use crate::format::format_bytes;

/// Resolved chunk sizes in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParameters {
    pub size: u64,
    pub min: u64,
    pub max: u64,
}

impl ChunkParameters {
    /// Derive the bounds from a base size
    ///
    /// Missing bounds default to `size / 4` and `size * 4` (integer
    /// arithmetic, truncating).
    ///
    /// # Examples
    /// ```
    /// use dupliplan_common::ChunkParameters;
    /// let chunks = ChunkParameters::resolve(8_388_608, None, None);
    /// assert_eq!(chunks.min, 2_097_152);
    /// assert_eq!(chunks.max, 33_554_432);
    /// ```
    pub fn resolve(size: u64, min: Option<u64>, max: Option<u64>) -> Self {
        Self {
            size,
            min: min.unwrap_or(size / 4),
            max: max.unwrap_or_else(|| size.saturating_mul(4)),
        }
    }

    /// Normalize the chunk block of a storage target
    pub fn from_raw(storage: &str, raw: &RawChunkParameters) -> Result<Self> {
        let invalid = |reason: String| CompileError::InvalidChunkParameters {
            storage: storage.to_string(),
            reason,
        };

        let size = raw
            .size
            .ok_or_else(|| invalid("'size' is mandatory".to_string()))?;

        let chunks = Self::resolve(size, raw.min, raw.max);

        if chunks.min == 0 {
            return Err(invalid(format!(
                "minimum chunk size must be positive (size {size})"
            )));
        }

        if chunks.min > chunks.size || chunks.size > chunks.max {
            return Err(invalid(format!(
                "bounds must satisfy min <= size <= max (min {}, size {}, max {})",
                chunks.min, chunks.size, chunks.max
            )));
        }

        log::debug!(
            "{storage}: chunks {} (min {}, max {})",
            format_bytes(chunks.size),
            format_bytes(chunks.min),
            format_bytes(chunks.max)
        );

        Ok(chunks)
    }

    /// Arguments for `init`/`add`, in the order the tool documents them
    pub fn flags(&self) -> Vec<String> {
        vec![
            "-c".to_string(),
            self.size.to_string(),
            "-max".to_string(),
            self.max.to_string(),
            "-min".to_string(),
            self.min.to_string(),
        ]
    }
}
