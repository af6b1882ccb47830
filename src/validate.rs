//! Required-field row filtering after normalization.
//!
//! Best-effort policy: rows that cannot be attributed to a client (and, for
//! line-item kinds, a material/quotation) are dropped silently so partial
//! files still yield partial results.

use crate::columns::RecordKind;
use crate::table::Table;
use tracing::debug;

/// Drop rows whose required identifying fields are null.
///
/// The check runs per required column *present in the table*: an export that
/// simply lacks a required column does not lose rows for it. A table where
/// none of the kind's required columns survived reconciliation is
/// unattributable as a whole and validates to zero rows.
pub fn filter_valid(kind: RecordKind, table: &Table) -> Table {
    let present: Vec<usize> = kind
        .required_columns()
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect();

    let mut out = Table::new(table.columns.clone());

    if present.is_empty() {
        debug!(
            kind = kind.table_name(),
            "no required columns present; dropping all {} rows",
            table.row_count()
        );
        return out;
    }

    for row in &table.rows {
        if present.iter().all(|&i| !row[i].is_null()) {
            out.rows.push(row.clone());
        }
    }

    let dropped = table.row_count() - out.row_count();
    if dropped > 0 {
        debug!(
            kind = kind.table_name(),
            dropped,
            kept = out.row_count(),
            "dropped rows missing required fields"
        );
    }

    out
}
