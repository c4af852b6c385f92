//! Byte-budget batching for bulk SQL payloads.
//!
//! Relational stores enforce a hard payload limit on a single statement
//! (MySQL's max_allowed_packet). Batches handed to the bulk writer are split
//! here so every emitted sub-batch's estimated serialized size stays under
//! the configured ceiling.

use crate::core::Row;

/// Split `rows` into ordered sub-batches whose estimated total size does not
/// exceed `max_bytes`.
///
/// Estimation uses each row's field schema: fixed-width kinds by their known
/// wire width, text/bytes by actual length. A single row whose own size
/// already exceeds `max_bytes` is still emitted alone - never dropped or
/// split. Input order is preserved across output batches.
pub fn prepare_batches(rows: Vec<Row>, max_bytes: usize) -> Vec<Vec<Row>> {
    let mut batches: Vec<Vec<Row>> = Vec::new();
    let mut current: Vec<Row> = Vec::new();
    let mut current_bytes: usize = 0;

    for row in rows {
        let size = row.estimated_size();
        if !current.is_empty() && current_bytes + size > max_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(row);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnValue;

    /// A row whose estimated size is exactly `n` bytes.
    fn row_of(n: usize) -> Row {
        Row::new(vec![ColumnValue::Bytes(vec![0u8; n])])
    }

    #[test]
    fn test_empty_input() {
        assert!(prepare_batches(vec![], 100).is_empty());
    }

    #[test]
    fn test_packs_greedily_in_order() {
        let batches = prepare_batches(vec![row_of(10), row_of(10), row_of(25)], 20);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1][0].estimated_size(), 25);
    }

    #[test]
    fn test_oversized_row_emitted_alone() {
        let batches = prepare_batches(vec![row_of(5), row_of(100), row_of(5)], 20);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1][0].estimated_size(), 100);
    }

    #[test]
    fn test_never_drops_or_reorders() {
        let sizes = [3usize, 9, 1, 40, 2, 2, 2, 15];
        let rows: Vec<Row> = sizes.iter().map(|n| row_of(*n)).collect();
        let batches = prepare_batches(rows, 12);

        let flattened: Vec<usize> = batches
            .iter()
            .flatten()
            .map(|r| r.estimated_size())
            .collect();
        assert_eq!(flattened, sizes);

        for batch in &batches {
            let total: usize = batch.iter().map(|r| r.estimated_size()).sum();
            assert!(total <= 12 || batch.len() == 1);
        }
    }

    #[test]
    fn test_exact_fit() {
        let batches = prepare_batches(vec![row_of(10), row_of(10)], 20);
        assert_eq!(batches.len(), 1);
    }
}
