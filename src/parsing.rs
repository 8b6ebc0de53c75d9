//! Shared parsing primitives for spreadsheet and form input.
//!
//! Everything here is deliberately non-throwing: imported spreadsheets are
//! human-curated and messy, so unparseable money becomes `0.0` and
//! unparseable dates become `None`. Callers that need hard validation
//! (manual forms) validate the parsed value afterwards instead of expecting
//! an error from this layer.
//!
//! Money values use Brazilian locale formatting (`.` thousands separator,
//! `,` decimal separator). A US-formatted number like `1,234.56` will be
//! misread by design parity with the production importer; see
//! [`DateOrder`] for the equivalent (configurable) date ambiguity.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};

/// One spreadsheet row: column header -> raw cell value. Transient; rows
/// are normalized into typed records or skipped, never persisted as-is.
pub type ImportRow = HashMap<String, Cell>;

/// A raw spreadsheet cell as produced by the CSV/XLSX readers.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Empty,
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Cell content as display text (used for alias-matched string fields).
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t.to_string())
                }
            }
            Cell::Number(n) => Some(format_number(*n)),
            Cell::Date(d) => Some(d.format("%d/%m/%Y").to_string()),
            Cell::Empty => None,
        }
    }
}

/// Integer numbers print without the trailing ".0" so lookups against
/// codes like "103" behave the same whether the cell came in as text
/// or as a number.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// Round to centavos (2 decimal places). All derived money values pass
/// through this so equality checks on derived amounts are well-defined.
pub fn round_centavos(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Money value as integer centavos, for exact comparisons.
pub fn centavos(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

/// Parse a Brazilian-formatted currency string (`"R$ 1.234,56"`).
///
/// Strips a leading `R$`, removes `.` thousands separators, swaps the `,`
/// decimal separator for `.` and parses. Returns `0.0` on anything that
/// does not parse — blank cells and junk text never block an import.
pub fn parse_currency_str(raw: &str) -> f64 {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("R$") {
        s = rest.trim_start();
    }
    if s.is_empty() {
        return 0.0;
    }
    let normalized: String = s.replace('.', "").replace(',', ".");
    normalized.trim().parse::<f64>().unwrap_or(0.0)
}

/// Parse a cell as currency. Numbers pass through as-is.
pub fn parse_currency(cell: &Cell) -> f64 {
    match cell {
        Cell::Number(n) => *n,
        Cell::Text(s) => parse_currency_str(s),
        Cell::Date(_) | Cell::Empty => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Day zero of the Excel serial date system (serial 25569 = 1970-01-01).
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Field-order policy for slash-separated dates.
///
/// The production importer used an ambiguous heuristic on the accounts
/// payable path: a first component greater than 12 is a day, otherwise the
/// whole date is read month-first. `03/04/2025` therefore cannot be
/// disambiguated — this is preserved as the `Heuristic` policy rather than
/// silently "fixed", and stores can pin `DayFirst` (BR) or `MonthFirst`
/// (US) via the `import.date_order` local setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateOrder {
    /// `DD/MM/YYYY` (Brazilian locale).
    #[default]
    DayFirst,
    /// `MM/DD/YYYY` (US locale).
    MonthFirst,
    /// First component > 12 means day-first, otherwise month-first.
    Heuristic,
}

impl DateOrder {
    /// Map the `import.date_order` setting value; unknown values fall back
    /// to day-first, the locale of the rest of the system.
    pub fn from_setting(raw: &str) -> DateOrder {
        match raw.trim().to_uppercase().as_str() {
            "US" => DateOrder::MonthFirst,
            "HEURISTIC" => DateOrder::Heuristic,
            _ => DateOrder::DayFirst,
        }
    }
}

/// Convert an Excel serial day number to a calendar date.
///
/// Serials count days since 1899-12-30, so serial 25569 is the Unix epoch.
/// Fractional day parts (time of day) are truncated. Out-of-range serials
/// yield `None`.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > 2_958_465.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(EXCEL_EPOCH.0, EXCEL_EPOCH.1, EXCEL_EPOCH.2)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Parse a slash-separated date string under the given field order.
fn parse_slash_date(raw: &str, order: DateOrder) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let a: u32 = parts[0].trim().parse().ok()?;
    let b: u32 = parts[1].trim().parse().ok()?;
    let mut year: i32 = parts[2].trim().parse().ok()?;
    if year < 100 {
        year += 2000;
    }
    let (day, month) = match order {
        DateOrder::DayFirst => (a, b),
        DateOrder::MonthFirst => (b, a),
        DateOrder::Heuristic => {
            if a > 12 {
                (a, b)
            } else {
                (b, a)
            }
        }
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a date string: slash-separated per the order policy, then ISO
/// (`YYYY-MM-DD`, with or without a time suffix). `None` if nothing matches.
pub fn parse_date_str(raw: &str, order: DateOrder) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains('/') {
        return parse_slash_date(s, order);
    }
    // ISO date, possibly with a trailing time ("2025-03-15T10:00:00")
    let date_part = if s.len() > 10 { &s[..10] } else { s };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Parse a cell as a calendar date.
///
/// Native date cells pass through; numeric cells are read as Excel serial
/// day numbers; text cells go through [`parse_date_str`]. Never errors —
/// anything unrecognizable is `None`.
pub fn parse_date(cell: &Cell, order: DateOrder) -> Option<NaiveDate> {
    match cell {
        Cell::Date(d) => Some(*d),
        Cell::Number(n) => excel_serial_to_date(*n),
        Cell::Text(s) => parse_date_str(s, order),
        Cell::Empty => None,
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Normalize a free-text status cell against an allowed set.
///
/// Trims and uppercases; returns the value if it is a member of `allowed`,
/// otherwise `default`.
pub fn parse_status(raw: &str, allowed: &[&str], default: &str) -> String {
    let norm = raw.trim().to_uppercase();
    if allowed.contains(&norm.as_str()) {
        norm
    } else {
        default.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_currency_brazilian_format() {
        assert_eq!(parse_currency_str("R$ 1.234,56"), 1234.56);
        assert_eq!(parse_currency_str("1.234,56"), 1234.56);
        assert_eq!(parse_currency_str("150,00"), 150.0);
        assert_eq!(parse_currency_str("R$ 0,50"), 0.5);
    }

    #[test]
    fn test_parse_currency_silent_fallback() {
        assert_eq!(parse_currency_str(""), 0.0);
        assert_eq!(parse_currency_str("   "), 0.0);
        assert_eq!(parse_currency_str("abc"), 0.0);
        assert_eq!(parse_currency_str("R$"), 0.0);
    }

    #[test]
    fn test_parse_currency_number_cell_as_is() {
        assert_eq!(parse_currency(&Cell::Number(42.0)), 42.0);
        assert_eq!(parse_currency(&Cell::Empty), 0.0);
        assert_eq!(parse_currency(&Cell::Text("R$ 10,90".into())), 10.9);
    }

    #[test]
    fn test_parse_date_day_first() {
        let d = parse_date_str("15/03/2025", DateOrder::DayFirst).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2025, 3, 15));
        // two-digit year
        let d = parse_date_str("01/02/25", DateOrder::DayFirst).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2025, 2, 1));
    }

    #[test]
    fn test_parse_date_heuristic_ambiguity() {
        // First component > 12: unambiguously a day.
        let d = parse_date_str("15/03/2025", DateOrder::Heuristic).unwrap();
        assert_eq!((d.month(), d.day()), (3, 15));
        // First component <= 12: read month-first, even though the system
        // locale is day-first. Documented ambiguity, kept as-is.
        let d = parse_date_str("03/04/2025", DateOrder::Heuristic).unwrap();
        assert_eq!((d.month(), d.day()), (3, 4));
    }

    #[test]
    fn test_parse_date_excel_serial() {
        // 45000 days after 1899-12-30
        let d = parse_date(&Cell::Number(45000.0), DateOrder::DayFirst).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2023, 3, 15));
        // serial 25569 is the Unix epoch
        let d = excel_serial_to_date(25569.0).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (1970, 1, 1));
        // fractional day part (time) truncates
        let d = excel_serial_to_date(45000.75).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2023, 3, 15));
    }

    #[test]
    fn test_parse_date_iso_and_junk() {
        let d = parse_date_str("2025-03-15", DateOrder::DayFirst).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2025, 3, 15));
        let d = parse_date_str("2025-03-15T10:30:00", DateOrder::DayFirst).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2025, 3, 15));
        assert_eq!(parse_date_str("not a date", DateOrder::DayFirst), None);
        assert_eq!(parse_date_str("32/13/2025", DateOrder::DayFirst), None);
        assert_eq!(parse_date(&Cell::Empty, DateOrder::DayFirst), None);
    }

    #[test]
    fn test_parse_status_membership() {
        let allowed = ["PENDENTE", "PAGO", "VENCIDO"];
        assert_eq!(parse_status(" pago ", &allowed, "PENDENTE"), "PAGO");
        assert_eq!(parse_status("inválido", &allowed, "PENDENTE"), "PENDENTE");
        assert_eq!(parse_status("", &allowed, "PENDENTE"), "PENDENTE");
    }

    #[test]
    fn test_round_centavos() {
        assert_eq!(round_centavos(185.004999), 185.0);
        assert_eq!(round_centavos(0.1 + 0.2), 0.3);
        assert_eq!(centavos(1234.56), 123456);
    }
}
