//! Rollover policy for table writers.
//!
//! A strategy is evaluated after every written tuple and decides whether the
//! active micro-partition should be closed and a new one started.

use std::fmt;

use crate::options::{DEFAULT_SPLIT_MAX_BYTES, DEFAULT_SPLIT_MAX_TUPLES};

/// Counters of the active micro-partition handed to a strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitStats {
    /// Tuples written to the active micro-partition.
    pub num_tuples: usize,
    /// Bytes written plus bytes still buffered.
    pub estimated_size: usize,
}

/// What to do with the open micro-partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SplitDecision {
    /// Keep writing to the open micro-partition.
    Continue,
    /// Close the open micro-partition first.
    Split(SplitReason),
}

/// Why a split was requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SplitReason {
    /// The tuple threshold was reached.
    TuplesReached {
        /// Tuples in the open partition.
        count: usize,
        /// Configured threshold.
        limit: usize,
    },
    /// The size threshold was reached.
    BytesReached {
        /// Estimated partition size in bytes.
        size: usize,
        /// Configured threshold.
        limit: usize,
    },
    /// Tuple numbers would overflow the row pointer.
    PointerRange,
}

impl fmt::Display for SplitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitReason::TuplesReached { count, limit } => {
                write!(f, "tuples={count} limit={limit}")
            }
            SplitReason::BytesReached { size, limit } => write!(f, "bytes={size} limit={limit}"),
            SplitReason::PointerRange => f.write_str("pointer_range"),
        }
    }
}

/// Decides when a table writer rolls over to a new micro-partition.
pub trait SplitStrategy: Send + Sync {
    /// Decide for the open micro-partition described by `stats`.
    fn evaluate(&self, stats: &SplitStats) -> SplitDecision;
}

/// Never rolls over on its own; only the row pointer range forces a split.
#[derive(Clone, Debug, Default)]
pub struct NeverSplit;

impl SplitStrategy for NeverSplit {
    fn evaluate(&self, _stats: &SplitStats) -> SplitDecision {
        SplitDecision::Continue
    }
}

/// Splits once either the tuple count or the estimated size reaches its
/// threshold.
#[derive(Clone, Debug)]
pub struct DefaultSplitStrategy {
    /// Tuples that trigger a split.
    pub max_tuples: usize,
    /// Estimated bytes that trigger a split.
    pub max_bytes: usize,
}

impl DefaultSplitStrategy {
    /// Split on `max_tuples` or `max_bytes`, whichever comes first.
    pub fn new(max_tuples: usize, max_bytes: usize) -> Self {
        Self {
            max_tuples,
            max_bytes,
        }
    }
}

impl Default for DefaultSplitStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SPLIT_MAX_TUPLES, DEFAULT_SPLIT_MAX_BYTES)
    }
}

impl SplitStrategy for DefaultSplitStrategy {
    fn evaluate(&self, stats: &SplitStats) -> SplitDecision {
        if stats.num_tuples >= self.max_tuples {
            SplitDecision::Split(SplitReason::TuplesReached {
                count: stats.num_tuples,
                limit: self.max_tuples,
            })
        } else if stats.estimated_size >= self.max_bytes {
            SplitDecision::Split(SplitReason::BytesReached {
                size: stats.estimated_size,
                limit: self.max_bytes,
            })
        } else {
            SplitDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let strategy = DefaultSplitStrategy::default();
        assert_eq!(
            strategy.evaluate(&SplitStats {
                num_tuples: 99_999,
                estimated_size: 1024
            }),
            SplitDecision::Continue
        );
        assert_eq!(
            strategy.evaluate(&SplitStats {
                num_tuples: 100_000,
                estimated_size: 1024
            }),
            SplitDecision::Split(SplitReason::TuplesReached {
                count: 100_000,
                limit: 100_000
            })
        );
        assert_eq!(
            strategy.evaluate(&SplitStats {
                num_tuples: 1,
                estimated_size: 64 * 1024 * 1024
            }),
            SplitDecision::Split(SplitReason::BytesReached {
                size: 64 * 1024 * 1024,
                limit: 64 * 1024 * 1024
            })
        );
    }

    #[test]
    fn never_split_continues() {
        assert_eq!(
            NeverSplit.evaluate(&SplitStats {
                num_tuples: usize::MAX,
                estimated_size: usize::MAX
            }),
            SplitDecision::Continue
        );
    }
}
