//! Spreadsheet decoding: CSV and Excel (.xlsx/.xlsm/.xls) into a [`Table`].
//!
//! This is the raw-bytes reader the pipeline consumes. No normalization happens
//! here beyond rendering Excel cells (including serial dates) to strings.

use crate::table::Table;
use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xls, Xlsx};
use std::io::Cursor;

/// Decode an uploaded file into a table. Dispatches on the filename extension.
///
/// Excel workbooks may carry several worksheets; the exports this service
/// ingests keep their data on the first non-empty sheet, so that one wins.
pub fn read_table(filename: &str, data: &[u8]) -> Result<Table> {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();

    match ext.as_str() {
        "csv" => read_csv(data),
        "xlsx" | "xlsm" => {
            let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            first_sheet_table(&mut workbook)
        }
        "xls" => {
            let mut workbook: Xls<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open legacy Excel workbook")?;
            first_sheet_table(&mut workbook)
        }
        _ => anyhow::bail!(
            "Unsupported file type: .{}. Supported: .csv, .xlsx, .xlsm, .xls",
            ext
        ),
    }
}

fn read_csv(data: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        anyhow::bail!("CSV file has no header row");
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        let row: Vec<String> = record.iter().map(|f| f.to_string()).collect();
        if row.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        rows.push(row);
    }

    Ok(Table::from_strings(headers, rows))
}

/// Walk the workbook's sheets in order and return the first one that has a
/// header row and at least one data row.
fn first_sheet_table<RS, W>(workbook: &mut W) -> Result<Table>
where
    RS: std::io::Read + std::io::Seek,
    W: Reader<RS>,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    for name in &sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Skipping sheet '{}': {}", name, e);
                continue;
            }
        };

        if let Some(table) = range_to_table(&range) {
            return Ok(table);
        }
    }

    anyhow::bail!("No sheet with data found in workbook")
}

/// Convert a calamine Range into a Table. First row = headers.
/// Returns None for sheets that are empty or have only a header row.
fn range_to_table(range: &calamine::Range<Data>) -> Option<Table> {
    let mut row_iter = range.rows();

    let header_row = row_iter.next()?;
    let headers: Vec<String> = header_row.iter().map(cell_to_string).collect();

    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return None;
    }

    let mut rows = Vec::new();
    for row in row_iter {
        let values: Vec<String> = row.iter().map(cell_to_string).collect();
        if values.iter().all(|v| v.is_empty()) {
            continue;
        }
        rows.push(values);
    }

    if rows.is_empty() {
        return None;
    }

    Some(Table::from_strings(headers, rows))
}

/// Render a calamine cell as a string.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Avoid trailing ".0" for whole numbers
            if *f == (*f as i64) as f64 && f.abs() < i64::MAX as f64 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_string(dt.as_f64()),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

/// Convert an Excel serial date number to an ISO string.
/// Excel epoch: 1899-12-30, with the 1900 leap year bug (serial 60 is the
/// nonexistent "Feb 29, 1900"); 1970-01-01 is serial 25569.
fn excel_serial_to_string(serial: f64) -> String {
    let days = serial as i64;
    let frac = serial - days as f64;

    // Serials before the fake Feb 29, 1900 sit one day closer to the epoch.
    let unix_days = if days > 59 { days - 25569 } else { days - 25568 };
    let total_secs = unix_days * 86400 + (frac * 86400.0) as i64;

    let secs_of_day = (total_secs % 86400 + 86400) % 86400;
    let hours = secs_of_day / 3600;
    let minutes = (secs_of_day % 3600) / 60;
    let seconds = secs_of_day % 60;

    let date = chrono::DateTime::from_timestamp(total_secs - secs_of_day, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default();

    if hours == 0 && minutes == 0 && seconds == 0 {
        date.format("%Y-%m-%d").to_string()
    } else {
        format!(
            "{} {:02}:{:02}:{:02}",
            date.format("%Y-%m-%d"),
            hours,
            minutes,
            seconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    #[test]
    fn test_read_csv_basic() {
        let data = b"Cod. Cliente,Cliente,Material\nCLI001,Acme,100001\nCLI002,Beta,100002\n";
        let table = read_table("vendas.csv", data).unwrap();
        assert_eq!(
            table.columns,
            vec!["Cod. Cliente", "Cliente", "Material"]
        );
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(0, "Cliente"), Some(&Cell::Text("Acme".into())));
    }

    #[test]
    fn test_read_csv_skips_blank_rows() {
        let data = b"a,b\n1,2\n,\n3,4\n";
        let table = read_table("x.csv", data).unwrap();
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_read_csv_flexible_widths() {
        // Short rows are padded to header width
        let data = b"a,b,c\n1,2,3\n4,5\n";
        let table = read_table("flex.csv", data).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(1, "c"), Some(&Cell::Text(String::new())));
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(read_table("notes.txt", b"data").is_err());
    }

    #[test]
    fn test_excel_serial_dates() {
        // 2024-01-15 is serial 45306
        assert_eq!(excel_serial_to_string(45306.0), "2024-01-15");
        // Time-of-day fraction keeps the timestamp
        assert_eq!(excel_serial_to_string(45306.5), "2024-01-15 12:00:00");
    }
}
