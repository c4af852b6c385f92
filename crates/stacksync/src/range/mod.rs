//! Greedy range partitioning over a type's backup-id domain.
//!
//! Ranges are the unit of checksum comparison and bulk transfer. The builder
//! consumes `(id, cardinality)` pairs in ascending id order, where cardinality
//! is 1 plus the count of all dependent rows owned by that id, and groups ids
//! into contiguous half-open ranges whose total cardinality stays at or under
//! a target. Ranges of the same type are disjoint and can be processed in
//! parallel by independent workers.

use serde::{Deserialize, Serialize};

use crate::core::MigrationType;
use crate::error::{Result, SyncError};

/// Contiguous half-open interval `[minimum_id, maximum_id)` over the
/// backup-id domain of one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    /// Inclusive lower bound.
    pub minimum_id: i64,
    /// Exclusive upper bound.
    pub maximum_id: i64,
}

impl IdRange {
    pub fn new(minimum_id: i64, maximum_id: i64) -> Self {
        Self {
            minimum_id,
            maximum_id,
        }
    }

    /// Reject inverted ranges before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.minimum_id > self.maximum_id {
            return Err(SyncError::validation(format!(
                "Invalid range: minimum_id {} is greater than maximum_id {}",
                self.minimum_id, self.maximum_id
            )));
        }
        Ok(())
    }
}

/// Request for [`crate::manager::MigrationManager::calculate_optimal_ranges`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimalRangeRequest {
    pub migration_type: MigrationType,
    pub minimum_id: i64,
    pub maximum_id: i64,
    /// Target total row cardinality per range.
    pub optimal_rows_per_range: u64,
}

/// Greedy builder grouping ascending `(id, cardinality)` pairs into ranges.
///
/// A single row whose own cardinality already exceeds the target becomes a
/// singleton range rather than being dropped or split.
pub struct IdRangeBuilder {
    optimal_rows: u64,
    ranges: Vec<IdRange>,
    current: Option<OpenRange>,
}

struct OpenRange {
    minimum_id: i64,
    maximum_id: i64,
    total_rows: u64,
}

impl IdRangeBuilder {
    pub fn new(optimal_rows: u64) -> Self {
        debug_assert!(optimal_rows > 0);
        Self {
            optimal_rows,
            ranges: Vec::new(),
            current: None,
        }
    }

    /// Fold one primary row into the accumulator.
    ///
    /// Ids must arrive in strictly ascending order; feeding rows out of order
    /// is a caller bug and fails fast in debug builds.
    pub fn add_row(&mut self, id: i64, cardinality: u64) {
        match self.current.as_mut() {
            None => {
                self.current = Some(OpenRange {
                    minimum_id: id,
                    maximum_id: id + 1,
                    total_rows: cardinality,
                });
            }
            Some(open) => {
                debug_assert!(
                    id >= open.maximum_id,
                    "ids must be fed in strictly ascending order: got {} after [{}, {})",
                    id,
                    open.minimum_id,
                    open.maximum_id
                );
                if open.total_rows + cardinality > self.optimal_rows {
                    // Close the current range and start a new one at this id.
                    let closed = self.current.take().expect("open range");
                    self.ranges
                        .push(IdRange::new(closed.minimum_id, closed.maximum_id));
                    self.current = Some(OpenRange {
                        minimum_id: id,
                        maximum_id: id + 1,
                        total_rows: cardinality,
                    });
                } else {
                    open.maximum_id = id + 1;
                    open.total_rows += cardinality;
                }
            }
        }
    }

    /// Flush any still-open range and return the ordered result.
    pub fn collate_results(mut self) -> Vec<IdRange> {
        if let Some(open) = self.current.take() {
            self.ranges.push(IdRange::new(open.minimum_id, open.maximum_id));
        }
        self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(target: u64, rows: &[(i64, u64)]) -> Vec<IdRange> {
        let mut builder = IdRangeBuilder::new(target);
        for (id, card) in rows {
            builder.add_row(*id, *card);
        }
        builder.collate_results()
    }

    #[test]
    fn test_empty_input_yields_no_ranges() {
        assert!(build(5, &[]).is_empty());
    }

    #[test]
    fn test_single_row() {
        assert_eq!(build(5, &[(3, 1)]), vec![IdRange::new(3, 4)]);
    }

    #[test]
    fn test_rows_fold_until_target() {
        // 2 + 2 fits under 5, the third row of 2 overflows.
        let ranges = build(5, &[(1, 2), (2, 2), (3, 2)]);
        assert_eq!(ranges, vec![IdRange::new(1, 3), IdRange::new(3, 4)]);
    }

    #[test]
    fn test_saturating_row_closes_previous_range() {
        // Row 2 alone saturates the target, row 3 overflows it again.
        let ranges = build(5, &[(1, 1), (2, 5), (3, 1)]);
        assert_eq!(
            ranges,
            vec![IdRange::new(1, 2), IdRange::new(2, 3), IdRange::new(3, 4)]
        );
    }

    #[test]
    fn test_oversized_row_becomes_singleton() {
        let ranges = build(5, &[(1, 1), (2, 100), (3, 1)]);
        assert_eq!(
            ranges,
            vec![IdRange::new(1, 2), IdRange::new(2, 3), IdRange::new(3, 4)]
        );
    }

    #[test]
    fn test_sparse_ids_covered_by_union() {
        let ranges = build(10, &[(5, 4), (90, 4), (91, 4)]);
        assert_eq!(ranges, vec![IdRange::new(5, 91), IdRange::new(91, 92)]);
        // Union covers [first, last+1) with no gaps between emitted ranges.
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].maximum_id, pair[1].minimum_id);
        }
    }

    #[test]
    fn test_output_invariants() {
        let rows: Vec<(i64, u64)> = (0..100).map(|i| (i * 3 + 1, (i % 7) as u64 + 1)).collect();
        let ranges = build(10, &rows);
        // Disjoint, ascending, covering [first, last+1).
        assert_eq!(ranges.first().unwrap().minimum_id, 1);
        assert_eq!(ranges.last().unwrap().maximum_id, rows.last().unwrap().0 + 1);
        for pair in ranges.windows(2) {
            assert!(pair[0].maximum_id <= pair[1].minimum_id);
            assert_eq!(pair[0].maximum_id, pair[1].minimum_id);
        }
    }

    #[test]
    fn test_invalid_range_rejected() {
        assert!(IdRange::new(10, 5).validate().is_err());
        assert!(IdRange::new(5, 5).validate().is_ok());
    }
}
