use crate::dataset::Dataset;
use crate::errors::AppError;
use crate::models::{CustomerVehicleRecord, DuplicateKeyWarning};

/// Message returned to callers when no row matches.
pub const NOT_FOUND_MESSAGE: &str = "No matching VIN or customer ID found.";

/// The row selected for a lookup key.
#[derive(Debug, Clone)]
pub struct RecordMatch {
    /// Zero-based data row index (header excluded).
    pub row_index: usize,
    pub record: CustomerVehicleRecord,
    /// Set when further rows carry the same key; the first row still wins.
    pub duplicate_warning: Option<DuplicateKeyWarning>,
}

fn row_matches(dataset: &Dataset, row: usize, key: &str) -> bool {
    dataset.text(row, "vin").as_deref() == Some(key)
        || dataset.text(row, "customer_id").as_deref() == Some(key)
}

/// Find the record whose `vin` or `customer_id` equals `key`.
///
/// Comparison is exact: case-sensitive and without trimming. When several
/// rows match, the first one in sheet order is used and the others are
/// reported in [`RecordMatch::duplicate_warning`].
pub fn find(dataset: &Dataset, key: &str) -> Result<RecordMatch, AppError> {
    let mut matches = (0..dataset.len()).filter(|&row| row_matches(dataset, row, key));

    let row_index = matches
        .next()
        .ok_or_else(|| AppError::NotFound(NOT_FOUND_MESSAGE.to_string()))?;

    let ignored_rows: Vec<usize> = matches.collect();
    let duplicate_warning = if ignored_rows.is_empty() {
        None
    } else {
        tracing::warn!(
            "Key '{}' matches {} rows; using row {} and ignoring {:?}",
            key,
            ignored_rows.len() + 1,
            row_index,
            ignored_rows
        );
        Some(DuplicateKeyWarning {
            key: key.to_string(),
            selected_row: row_index,
            ignored_rows,
        })
    };

    Ok(RecordMatch {
        row_index,
        record: dataset.record(row_index),
        duplicate_warning,
    })
}
