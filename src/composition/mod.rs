//! How a logical execution decomposes into sub-executions, and what that
//! shape means for the worker container.
//!
//! [`ExecutionComposition`] is the reportable tree (atomic leaf or indexed
//! fan-out). [`InstanceComposition`] is the matching strategy used at run
//! time: it derives volumes and path tables for the container and decides
//! which paths to fetch output and measures from, per index or globally.

mod execution;
mod strategy;

#[cfg(test)]
mod tests;

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::containers::ContainersError;

pub use execution::{ExecutionComposition, IndicesComposition};
pub use strategy::{
    ComposedMeasures, ConfigValue, DirectoryTarball, INDEX_TO_MEASURES_DIRECTORY_KEY,
    INDEX_TO_OUTPUT_DIRECTORY_KEY, INDEX_TO_SUMMARY_MEASURES_PATH_KEY, INDICES_KEY,
    InstanceComposition, MEASURES_DIRECTORY_KEY, OUTPUT_DIRECTORY_KEY, SUMMARY_MEASURES_PATH_KEY,
    WorkerStartupConfig,
};

/// Half-open range of item indices `[start, end)`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "(u32, u32)", into = "(u32, u32)")]
pub struct IndexRange {
    start: u32,
    end: u32,
}

impl IndexRange {
    /// Builds the range `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::InvalidRange`] when `start > end`.
    pub const fn new(start: u32, end: u32) -> Result<Self, CompositionError> {
        if start > end {
            return Err(CompositionError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First index in the range.
    #[must_use]
    pub const fn start(self) -> u32 {
        self.start
    }

    /// One past the last index in the range.
    #[must_use]
    pub const fn end(self) -> u32 {
        self.end
    }

    /// Number of indices covered.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.end - self.start
    }

    /// Whether the range covers no index.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.start == self.end
    }

    /// Whether `index` falls inside the range.
    #[must_use]
    pub const fn contains(self, index: u32) -> bool {
        self.start <= index && index < self.end
    }

    /// Iterates over the indices in ascending order.
    #[must_use]
    pub const fn indices(self) -> Range<u32> {
        self.start..self.end
    }
}

impl TryFrom<(u32, u32)> for IndexRange {
    type Error = CompositionError;

    fn try_from((start, end): (u32, u32)) -> Result<Self, Self::Error> {
        Self::new(start, end)
    }
}

impl From<IndexRange> for (u32, u32) {
    fn from(range: IndexRange) -> Self {
        (range.start, range.end)
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Errors raised while building, mutating or using compositions.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CompositionError {
    /// Raised when a range starts after it ends.
    #[error("invalid index range: start {start} is after end {end}")]
    InvalidRange {
        /// Requested start.
        start: u32,
        /// Requested end.
        end: u32,
    },
    /// Raised when an index falls outside the composition's range.
    #[error("index {index} is outside {range}")]
    IndexOutOfRange {
        /// Offending index.
        index: u32,
        /// Range of the composition.
        range: IndexRange,
    },
    /// Raised when indices read back from a record are not contiguous.
    #[error("indices of execution {execution_id} do not form a contiguous range")]
    SparseIndices {
        /// Execution whose record was malformed.
        execution_id: String,
    },
    /// Raised when mutating a composition whose execution has finished.
    #[error("composition of execution {execution_id} is sealed")]
    Sealed {
        /// Owning execution.
        execution_id: String,
    },
    /// Raised when a tombstoned sub-execution would become live again.
    #[error("execution {execution_id} has been tombstoned")]
    Tombstoned {
        /// Tombstoned sub-execution.
        execution_id: String,
    },
    /// Raised when an output path would escape the output directory.
    #[error("output path {path} must stay inside the output directory")]
    InvalidOutputPath {
        /// Requested path.
        path: String,
    },
    /// Raised when the container runtime fails to deliver files.
    #[error(transparent)]
    Containers(#[from] ContainersError),
}
