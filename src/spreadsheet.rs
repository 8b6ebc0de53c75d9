//! Spreadsheet file ingestion (CSV and XLSX/XLS).
//!
//! Turns an uploaded file into `ImportRow`s for the normalizer. Parsing is a
//! blocking, whole-file step; nothing is streamed. Only a completely
//! unreadable file is an error — individual cell weirdness flows through as
//! `Cell` values for the tolerant parsing layer to deal with.
//!
//! CSV: UTF-8 with an optional leading BOM; the delimiter is sniffed from
//! the header line (`;` if present, else `,`); quoted fields are unwrapped.
//! XLSX/XLS: first worksheet only, first row is the header, trailing
//! fully-empty rows are discarded.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use tracing::{debug, info};

use crate::error::{NexusError, Result};
use crate::parsing::{Cell, ImportRow};

/// UTF-8 byte-order mark, sometimes prepended by Excel's CSV export.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Load rows from a file, dispatching on extension.
pub fn load_rows(path: &Path) -> Result<Vec<ImportRow>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let rows = match ext.as_str() {
        "csv" => {
            let bytes = std::fs::read(path)
                .map_err(|e| NexusError::Spreadsheet(format!("ler {}: {e}", path.display())))?;
            parse_csv_bytes(&bytes)?
        }
        "xlsx" | "xls" | "xlsm" => parse_workbook(path)?,
        other => {
            return Err(NexusError::Spreadsheet(format!(
                "extensão não suportada: .{other}"
            )))
        }
    };

    info!(file = %path.display(), rows = rows.len(), "Planilha carregada");
    Ok(rows)
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Sniff the field delimiter from the header line: `;` wins if present
/// (the common Excel-pt-BR export), else `,`.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let header_end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(bytes.len());
    if bytes[..header_end].contains(&b';') {
        b';'
    } else {
        b','
    }
}

/// Parse CSV content into rows keyed by the header line.
pub fn parse_csv_bytes(bytes: &[u8]) -> Result<Vec<ImportRow>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let delimiter = sniff_delimiter(bytes);
    debug!(delimiter = %(delimiter as char), "CSV delimiter sniffed");

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| NexusError::Spreadsheet(format!("cabeçalho CSV: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows: Vec<ImportRow> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| NexusError::Spreadsheet(format!("linha CSV: {e}")))?;
        let mut row = ImportRow::new();
        for (i, field) in record.iter().enumerate() {
            let Some(header) = headers.get(i) else { break };
            if header.is_empty() {
                continue;
            }
            let cell = if field.trim().is_empty() {
                Cell::Empty
            } else {
                Cell::Text(field.to_string())
            };
            row.insert(header.clone(), cell);
        }
        rows.push(row);
    }

    trim_trailing_empty(&mut rows);
    Ok(rows)
}

// ---------------------------------------------------------------------------
// XLSX / XLS
// ---------------------------------------------------------------------------

/// Convert a calamine cell into our raw cell type. Formatted date cells
/// arrive as serial day numbers and are resolved later by `parse_date`.
fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => {
            if s.trim().is_empty() {
                Cell::Empty
            } else {
                Cell::Text(s.clone())
            }
        }
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

fn parse_workbook(path: &Path) -> Result<Vec<ImportRow>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| NexusError::Spreadsheet(format!("abrir {}: {e}", path.display())))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| NexusError::Spreadsheet("pasta de trabalho sem planilhas".into()))?
        .map_err(|e| NexusError::Spreadsheet(format!("ler planilha: {e}")))?;

    let mut iter = range.rows();
    let headers: Vec<String> = match iter.next() {
        Some(header_row) => header_row
            .iter()
            .map(|d| d.to_string().trim().to_string())
            .collect(),
        None => return Ok(Vec::new()),
    };

    let mut rows: Vec<ImportRow> = Vec::new();
    for data_row in iter {
        let mut row = ImportRow::new();
        for (i, data) in data_row.iter().enumerate() {
            let Some(header) = headers.get(i) else { break };
            if header.is_empty() {
                continue;
            }
            row.insert(header.clone(), data_to_cell(data));
        }
        rows.push(row);
    }

    trim_trailing_empty(&mut rows);
    Ok(rows)
}

/// Drop trailing rows where every cell is empty (Excel ranges often extend
/// past the real data).
fn trim_trailing_empty(rows: &mut Vec<ImportRow>) {
    while rows
        .last()
        .is_some_and(|row| row.values().all(|c| c.is_empty()))
    {
        rows.pop();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
