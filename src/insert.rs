//! Row-by-row and batched insertion.
//!
//! Row-by-row mode exists for key-producing stages: each row is its own
//! statement and transaction so its generated key can be captured, and a
//! failing row is recorded and skipped. Batch mode writes fixed-size chunks as
//! multi-row statements for stages whose keys nobody reads; a failing batch is
//! recorded by row range while earlier batches stay committed.

use log::{debug, warn};

use crate::{
    data::Value,
    db::Destination,
    error::LoadError,
    rows::RowSet,
};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Default)]
pub struct RowInsertReport {
    /// One slot per input row, in order; `None` where the insert failed.
    pub keys: Vec<Option<i64>>,
    pub failures: Vec<LoadError>,
}

impl RowInsertReport {
    pub fn inserted(&self) -> usize {
        self.keys.iter().filter(|key| key.is_some()).count()
    }
}

#[derive(Debug, Default)]
pub struct BatchInsertReport {
    pub inserted: usize,
    pub statements: usize,
    pub failures: Vec<LoadError>,
}

/// Inserts each row on its own, omitting absent cells so column defaults
/// apply.
pub fn insert_rows(dest: &mut dyn Destination, table: &str, rows: &RowSet) -> RowInsertReport {
    let mut report = RowInsertReport::default();
    for (row_idx, row) in rows.rows().iter().enumerate() {
        let (columns, values): (Vec<&str>, Vec<&Value>) = rows
            .columns()
            .iter()
            .zip(row.iter())
            .filter_map(|(column, cell)| cell.as_ref().map(|value| (column.as_str(), value)))
            .unzip();
        match dest.insert_returning_key(table, &columns, &values) {
            Ok(key) => {
                debug!("{table}: row {row_idx} -> key {key}");
                report.keys.push(Some(key));
            }
            Err(err) => {
                warn!("{table}: row {row_idx} rejected: {err}");
                report.keys.push(None);
                report.failures.push(LoadError::RowInsertFailure {
                    row: row_idx,
                    message: err.to_string(),
                });
            }
        }
    }
    report
}

/// Splits `rows` into chunks of `batch_size` and writes each chunk as one
/// statement. The chunk size shrinks when the backend's bind-parameter limit
/// would otherwise be exceeded.
pub fn insert_batches(
    dest: &mut dyn Destination,
    table: &str,
    rows: &RowSet,
    batch_size: usize,
) -> BatchInsertReport {
    let mut report = BatchInsertReport::default();
    if rows.is_empty() {
        return report;
    }
    let size = effective_batch_size(batch_size, rows.columns().len(), dest.max_bind_parameters());
    if size < batch_size {
        debug!(
            "{table}: batch size lowered from {batch_size} to {size} for {} column(s)",
            rows.columns().len()
        );
    }
    let total = rows.len();
    for (chunk_idx, chunk) in rows.rows().chunks(size).enumerate() {
        let start = chunk_idx * size;
        let end = start + chunk.len();
        report.statements += 1;
        match dest.insert_batch(table, rows.columns(), chunk) {
            Ok(_) => {
                report.inserted += chunk.len();
                debug!("{table}: inserted rows {} to {end} of {total}", start + 1);
            }
            Err(err) => {
                warn!("{table}: rows {} to {end} rejected: {err}", start + 1);
                report.failures.push(LoadError::BatchInsertFailure {
                    start,
                    end,
                    message: err.to_string(),
                });
            }
        }
    }
    report
}

fn effective_batch_size(requested: usize, columns: usize, max_params: Option<usize>) -> usize {
    let requested = requested.max(1);
    match max_params {
        Some(limit) if columns > 0 => requested.min((limit / columns).max(1)),
        _ => requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_batch_size_respects_parameter_limit() {
        assert_eq!(effective_batch_size(1000, 10, Some(32_766)), 1000);
        assert_eq!(effective_batch_size(1000, 50, Some(32_766)), 655);
        assert_eq!(effective_batch_size(1000, 50, None), 1000);
        assert_eq!(effective_batch_size(0, 3, None), 1);
        assert_eq!(effective_batch_size(10, 100_000, Some(32_766)), 1);
    }
}
