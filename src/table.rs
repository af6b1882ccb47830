//! In-memory tabular model shared by the whole pipeline.
//!
//! The sheet reader produces tables of raw text cells; the normalizer returns a
//! new table with typed cells; the validator and the persistence layer only ever
//! look cells up by column name.

/// A single cell after (or before) normalization.
///
/// Raw input is always `Text`; normalization maps cells into the other variants.
/// `Null` is the true-absence sentinel, never the literal string "None".
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Number(f64),
    /// Canonical `YYYY-MM-DD` form, or empty when the source was unparsable.
    Date(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Text content of the cell, if it has one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) | Cell::Date(s) => Some(s),
            Cell::Null | Cell::Number(_) => None,
        }
    }

}

/// A parsed table: one header row plus data rows, all rows the same width.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from raw string data. Short rows are padded with empty text
    /// so every row matches the header width.
    pub fn from_strings(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|r| {
                let mut cells: Vec<Cell> = r.into_iter().take(width).map(Cell::Text).collect();
                while cells.len() < width {
                    cells.push(Cell::Text(String::new()));
                }
                cells
            })
            .collect();
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (row, column-name), if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Append another table's rows. Columns are matched by name; values for
    /// columns the other table lacks become `Null`.
    pub fn append(&mut self, other: &Table) {
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();
        for row in &other.rows {
            let cells = mapping
                .iter()
                .map(|m| match m {
                    Some(i) => row.get(*i).cloned().unwrap_or(Cell::Null),
                    None => Cell::Null,
                })
                .collect();
            self.rows.push(cells);
        }
    }
}
