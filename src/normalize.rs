//! Per-column value normalization: one semantic type and one absence
//! representation per column class.
//!
//! Fallback behavior is a named policy per class (`parse_or_default`
//! combinators), not an incidental effect of error handling: identifiers fall
//! back to null, material codes to [`MATERIAL_FALLBACK`], numbers to zero,
//! dates to the empty string. A malformed cell never aborts the row or the
//! table.

use crate::columns::RecordKind;
use crate::table::{Cell, Table};
use chrono::NaiveDate;

/// Fallback for material codes that survive sentinel cleansing but still fail
/// numeric parsing. Carried over from the historical ingestion behavior; note
/// that it collides with a legitimate all-zero material code, which is why it
/// is a named constant rather than a buried `unwrap_or`.
pub const MATERIAL_FALLBACK: &str = "0";

/// Semantic class of a canonical column, driving coercion and fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    /// Client codes, quotation numbers: string, trimmed, sentinel → null.
    Identifier,
    /// Material codes: numeric round-trip so "100001.0" and 100001 agree;
    /// unparsable → [`MATERIAL_FALLBACK`], never null.
    MaterialCode,
    /// Quantities and monetary values: decimal, unparsable → 0.0, never null.
    Numeric,
    /// Calendar dates: canonical YYYY-MM-DD, unparsable → empty string.
    Date,
    /// Free text: trimmed, sentinel → null, absence preserved.
    Text,
}

/// Class of a canonical column for the given record kind. Non-canonical
/// columns have no class and pass through normalization untouched.
pub fn column_class(kind: RecordKind, column: &str) -> Option<ColumnClass> {
    use ColumnClass::*;
    let class = match (kind, column) {
        (RecordKind::Vendas, "cod_cliente") => Identifier,
        (RecordKind::Vendas, "material") => MaterialCode,
        (RecordKind::Vendas, "data" | "data_faturamento") => Date,
        (
            RecordKind::Vendas,
            "qtd_entrada" | "vlr_entrada" | "qtd_carteira" | "vlr_carteira" | "qtd_rol"
            | "vlr_rol",
        ) => Numeric,
        (
            RecordKind::Vendas,
            "cliente" | "produto" | "unidade_negocio" | "canal_distribuicao" | "hier_produto_1"
            | "hier_produto_2" | "hier_produto_3",
        ) => Text,

        (RecordKind::Cotacoes, "numero_cotacao" | "cod_cliente") => Identifier,
        (RecordKind::Cotacoes, "data") => Date,
        (
            RecordKind::Cotacoes,
            "numero_revisao" | "linhas_cotacao" | "status_cotacao" | "cliente",
        ) => Text,

        (RecordKind::ProdutosCotados, "cotacao" | "cod_cliente") => Identifier,
        (RecordKind::ProdutosCotados, "material") => MaterialCode,
        (
            RecordKind::ProdutosCotados,
            "quantidade" | "preco_liquido_unitario" | "preco_liquido_total",
        ) => Numeric,
        (RecordKind::ProdutosCotados, "cliente" | "centro_fornecedor" | "descricao") => Text,

        _ => return None,
    };
    Some(class)
}

/// Sentinel strings that mean "absent" in the source exports, not a value.
fn is_absent(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || matches!(t, "None" | "none" | "NONE" | "nan" | "NaN" | "NAN")
}

// ============================================================================
// parse_or_default combinators, one per column class
// ============================================================================

/// Identifier: trimmed string, sentinel → true null.
fn identifier_or_null(raw: &str) -> Cell {
    if is_absent(raw) {
        Cell::Null
    } else {
        Cell::Text(raw.trim().to_string())
    }
}

/// Material code: float → int → string round-trip; anything unparsable
/// (including sentinels) becomes [`MATERIAL_FALLBACK`].
fn material_or_fallback(raw: &str) -> Cell {
    let t = raw.trim();
    if is_absent(t) {
        return Cell::Text(MATERIAL_FALLBACK.to_string());
    }
    match t.parse::<f64>() {
        Ok(n) if n.is_finite() => Cell::Text(format!("{}", n.trunc() as i64)),
        _ => Cell::Text(MATERIAL_FALLBACK.to_string()),
    }
}

/// Number: plain decimal first, then Brazilian grouping ("1.234,56"); anything
/// unparsable becomes zero, never null.
fn number_or_zero(raw: &str) -> f64 {
    let t = raw.trim();
    if is_absent(t) {
        return 0.0;
    }
    if let Ok(n) = t.parse::<f64>() {
        if n.is_finite() {
            return n;
        }
    }
    if t.contains(',') {
        let reshaped = t.replace('.', "").replace(',', ".");
        if let Ok(n) = reshaped.parse::<f64>() {
            if n.is_finite() {
                return n;
            }
        }
    }
    0.0
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Date: permissive parse (ISO and day-first forms, with or without a time
/// component) rendered to YYYY-MM-DD; unparsable → empty string.
fn date_or_empty(raw: &str) -> String {
    let t = raw.trim();
    if is_absent(t) {
        return String::new();
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return d.format("%Y-%m-%d").to_string();
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(t, fmt) {
            return dt.date().format("%Y-%m-%d").to_string();
        }
    }
    String::new()
}

/// Free text: trimmed, sentinel → null.
fn text_or_null(raw: &str) -> Cell {
    if is_absent(raw) {
        Cell::Null
    } else {
        Cell::Text(raw.trim().to_string())
    }
}

/// Apply one class's coercion to one cell. Already-typed cells (from a prior
/// normalization pass) are left alone, which makes the whole thing idempotent.
fn normalize_cell(class: ColumnClass, cell: &Cell) -> Cell {
    match (class, cell) {
        (ColumnClass::Identifier, Cell::Text(s)) => identifier_or_null(s),
        (ColumnClass::Identifier, Cell::Null) => Cell::Null,

        (ColumnClass::MaterialCode, Cell::Text(s)) => material_or_fallback(s),
        (ColumnClass::MaterialCode, Cell::Null) => Cell::Text(MATERIAL_FALLBACK.to_string()),
        (ColumnClass::MaterialCode, Cell::Number(n)) => {
            Cell::Text(format!("{}", n.trunc() as i64))
        }

        (ColumnClass::Numeric, Cell::Text(s)) => Cell::Number(number_or_zero(s)),
        (ColumnClass::Numeric, Cell::Null) => Cell::Number(0.0),
        (ColumnClass::Numeric, Cell::Number(n)) => Cell::Number(*n),

        (ColumnClass::Date, Cell::Text(s)) => Cell::Date(date_or_empty(s)),
        (ColumnClass::Date, Cell::Null) => Cell::Date(String::new()),
        (ColumnClass::Date, Cell::Date(d)) => Cell::Date(d.clone()),

        (ColumnClass::Text, Cell::Text(s)) => text_or_null(s),
        (ColumnClass::Text, Cell::Null) => Cell::Null,

        // Anything else is already in (or past) canonical form.
        (_, other) => other.clone(),
    }
}

/// Normalize every canonical column of the table; returns a new table, the
/// input is untouched. Columns without a class pass through unchanged.
pub fn normalize(kind: RecordKind, table: &Table) -> Table {
    let classes: Vec<Option<ColumnClass>> = table
        .columns
        .iter()
        .map(|c| column_class(kind, c))
        .collect();

    let rows = table
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(&classes)
                .map(|(cell, class)| match class {
                    Some(class) => normalize_cell(*class, cell),
                    None => cell.clone(),
                })
                .collect()
        })
        .collect();

    Table {
        columns: table.columns.clone(),
        rows,
    }
}
