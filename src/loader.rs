use crate::error::{AuditError, Result};
use crate::schema::{CashflowTable, LoadReport, MonthlyRecord, PnlTable, Table};
use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use log::{debug, warn};
use std::fmt;
use std::fs;
use std::path::Path;

/// Why a single cell could not be coerced to its column's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    Empty,
    Unparsable(String),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::Empty => write!(f, "empty cell"),
            FieldError::Unparsable(raw) => write!(f, "unparsable value '{}'", raw),
        }
    }
}

/// How a file will be read, decided from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Delimited(u8),
    Spreadsheet,
}

pub fn detect_format(path: &Path) -> TableFormat {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" | "txt" => TableFormat::Delimited(b','),
        "tsv" => TableFormat::Delimited(b'\t'),
        _ => TableFormat::Spreadsheet,
    }
}

/// Coerces a raw month cell to a date. Accepted spellings: `2023-01-15`,
/// `2023/01/15`, `15/01/2023`, `2023-01`, and any ISO datetime whose first
/// ten characters form a date.
pub fn coerce_month(raw: &str) -> std::result::Result<NaiveDate, FieldError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FieldError::Empty);
    }

    for pattern in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, pattern) {
            return Ok(date);
        }
    }

    // Bare "YYYY-MM" pins to the first of the month.
    let padded = format!("{}-01", trimmed);
    if let Ok(date) = NaiveDate::parse_from_str(&padded, "%Y-%m-%d") {
        return Ok(date);
    }

    if trimmed.len() >= 10 {
        if let Ok(date) = NaiveDate::parse_from_str(&trimmed[..10], "%Y-%m-%d") {
            return Ok(date);
        }
    }

    Err(FieldError::Unparsable(trimmed.to_string()))
}

/// Coerces a raw numeric cell. An empty cell and an unparsable cell are both
/// errors; the caller decides whether that is fatal.
pub fn coerce_numeric(raw: &str) -> std::result::Result<f64, FieldError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FieldError::Empty);
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| FieldError::Unparsable(trimmed.to_string()))
}

/// Header row plus data rows, every cell stringified. Both readers funnel
/// into this shape so coercion happens in one place.
struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<RawTable> {
    let format_err = |detail: String| AuditError::Format {
        path: path.to_path_buf(),
        detail,
    };

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(|e| format_err(e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| format_err(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format_err(e.to_string()))?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }

    Ok(RawTable { headers, rows })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(v) => v.to_string(),
        Data::Int(v) => v.to_string(),
        Data::Bool(v) => v.to_string(),
        Data::DateTime(_) => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

fn read_spreadsheet(path: &Path) -> Result<RawTable> {
    let format_err = |detail: String| AuditError::Format {
        path: path.to_path_buf(),
        detail,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| format_err(e.to_string()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| format_err("workbook has no sheets".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| format_err(e.to_string()))?;

    let mut rows_iter = range.rows();
    let headers = rows_iter
        .next()
        .ok_or_else(|| format_err(format!("sheet '{}' is empty", sheet)))?
        .iter()
        .map(|c| cell_to_string(c).trim().to_string())
        .collect();
    let rows = rows_iter
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    Ok(RawTable { headers, rows })
}

fn read_raw(path: &Path) -> Result<RawTable> {
    if !path.exists() {
        return Err(AuditError::NotFound(path.to_path_buf()));
    }
    match detect_format(path) {
        TableFormat::Delimited(delimiter) => read_delimited(path, delimiter),
        TableFormat::Spreadsheet => read_spreadsheet(path),
    }
}

fn cell<'a>(row: &'a [String], idx: usize) -> &'a str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn column_position(raw: &RawTable, name: &str, path: &Path) -> Result<usize> {
    raw.headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| AuditError::Schema {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
}

fn table_from_raw<R: MonthlyRecord>(raw: &RawTable, path: &Path) -> Result<Table<R>> {
    let month_pos = column_position(raw, R::COLUMNS[0], path)?;
    let numeric_pos = R::COLUMNS[1..]
        .iter()
        .map(|name| column_position(raw, name, path))
        .collect::<Result<Vec<_>>>()?;

    let mut report = LoadReport::default();
    let mut records = Vec::with_capacity(raw.rows.len());

    for (i, row) in raw.rows.iter().enumerate() {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        // Header occupies row 1, so data row i sits at i + 2 in the file.
        let row_no = i + 2;

        let month = coerce_month(cell(row, month_pos)).map_err(|e| AuditError::Format {
            path: path.to_path_buf(),
            detail: format!("row {}: column 'Month': {}", row_no, e),
        })?;

        let mut values = Vec::with_capacity(numeric_pos.len());
        for (pos, name) in numeric_pos.iter().zip(&R::COLUMNS[1..]) {
            match coerce_numeric(cell(row, *pos)) {
                Ok(v) => values.push(v),
                Err(e) => {
                    warn!(
                        "{}: row {}, column '{}': {} (kept as missing)",
                        path.display(),
                        row_no,
                        name,
                        e
                    );
                    report.record_missing(name);
                    values.push(f64::NAN);
                }
            }
        }

        report.rows += 1;
        records.push(R::from_values(month, &values));
    }

    debug!(
        "loaded {} rows from {} ({} missing cells)",
        report.rows,
        path.display(),
        report.total_missing()
    );

    Ok(Table::new(records, report))
}

/// Loads a monthly table from a delimited file or a spreadsheet, coercing it
/// to the canonical schema of `R`. Extra columns in the file are ignored; a
/// missing required column is an error, as is an unreadable `Month` cell.
/// Numeric cells that fail coercion become NaN and are tallied in the
/// table's [`LoadReport`].
pub fn load_table<R: MonthlyRecord>(path: impl AsRef<Path>) -> Result<Table<R>> {
    let path = path.as_ref();
    let raw = read_raw(path)?;
    table_from_raw(&raw, path)
}

/// Loads the profit and loss table.
pub fn load_pnl(path: impl AsRef<Path>) -> Result<PnlTable> {
    load_table(path)
}

/// Loads the cash-flow table.
pub fn load_cashflow(path: impl AsRef<Path>) -> Result<CashflowTable> {
    load_table(path)
}

/// Writes a table back out as CSV with the canonical header row. Missing
/// values become empty cells.
pub fn write_table_csv<R: MonthlyRecord>(table: &Table<R>, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(R::COLUMNS)?;
    for record in &table.records {
        let mut fields = Vec::with_capacity(R::COLUMNS.len());
        fields.push(record.month().format("%Y-%m-%d").to_string());
        for v in record.values() {
            fields.push(if v.is_nan() { String::new() } else { v.to_string() });
        }
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_month_spellings() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 15).unwrap();
        assert_eq!(coerce_month("2023-01-15").unwrap(), expected);
        assert_eq!(coerce_month("2023/01/15").unwrap(), expected);
        assert_eq!(coerce_month("15/01/2023").unwrap(), expected);
        assert_eq!(coerce_month(" 2023-01-15 ").unwrap(), expected);

        let first = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        assert_eq!(coerce_month("2023-01").unwrap(), first);
        assert_eq!(coerce_month("2023-01-01 00:00:00").unwrap(), first);
        assert_eq!(coerce_month("2023-01-01T00:00:00").unwrap(), first);
    }

    #[test]
    fn test_coerce_month_rejects_junk() {
        assert_eq!(coerce_month(""), Err(FieldError::Empty));
        assert_eq!(coerce_month("   "), Err(FieldError::Empty));
        assert_eq!(
            coerce_month("January 2023"),
            Err(FieldError::Unparsable("January 2023".to_string()))
        );
        assert!(coerce_month("2023-13").is_err());
    }

    #[test]
    fn test_coerce_numeric() {
        assert_eq!(coerce_numeric("1000").unwrap(), 1000.0);
        assert_eq!(coerce_numeric(" -50.5 ").unwrap(), -50.5);
        assert_eq!(coerce_numeric("1e3").unwrap(), 1000.0);
        assert_eq!(coerce_numeric(""), Err(FieldError::Empty));
        assert_eq!(
            coerce_numeric("n/a"),
            Err(FieldError::Unparsable("n/a".to_string()))
        );
    }

    #[test]
    fn test_detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("a.csv")), TableFormat::Delimited(b','));
        assert_eq!(detect_format(Path::new("a.CSV")), TableFormat::Delimited(b','));
        assert_eq!(detect_format(Path::new("a.tsv")), TableFormat::Delimited(b'\t'));
        assert_eq!(detect_format(Path::new("a.txt")), TableFormat::Delimited(b','));
        assert_eq!(detect_format(Path::new("a.xlsx")), TableFormat::Spreadsheet);
        assert_eq!(detect_format(Path::new("a.xls")), TableFormat::Spreadsheet);
        assert_eq!(detect_format(Path::new("noext")), TableFormat::Spreadsheet);
    }

    #[test]
    fn test_table_from_raw_counts_missing() {
        use crate::schema::CashflowRecord;

        let raw = RawTable {
            headers: vec![
                "Month".to_string(),
                "OperatingCF".to_string(),
                "CAPEX".to_string(),
                "Delta_BFR".to_string(),
                "NetCashFlow".to_string(),
            ],
            rows: vec![
                vec![
                    "2023-01-01".to_string(),
                    "400".to_string(),
                    "-50".to_string(),
                    "100".to_string(),
                    "450".to_string(),
                ],
                vec![
                    "2023-02-01".to_string(),
                    "oops".to_string(),
                    "-50".to_string(),
                    String::new(),
                    "650".to_string(),
                ],
            ],
        };

        let table: Table<CashflowRecord> =
            table_from_raw(&raw, Path::new("cashflow.csv")).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.records[1].operating_cf.is_nan());
        assert!(table.records[1].delta_bfr.is_nan());
        assert_eq!(table.report.missing_in("OperatingCF"), 1);
        assert_eq!(table.report.missing_in("Delta_BFR"), 1);
        assert_eq!(table.report.total_missing(), 2);
    }

    #[test]
    fn test_table_from_raw_skips_blank_rows() {
        use crate::schema::CashflowRecord;

        let raw = RawTable {
            headers: vec![
                "Month".to_string(),
                "OperatingCF".to_string(),
                "CAPEX".to_string(),
                "Delta_BFR".to_string(),
                "NetCashFlow".to_string(),
            ],
            rows: vec![
                vec![
                    "2023-01-01".to_string(),
                    "400".to_string(),
                    "-50".to_string(),
                    "100".to_string(),
                    "450".to_string(),
                ],
                vec![String::new(), String::new()],
            ],
        };

        let table: Table<CashflowRecord> =
            table_from_raw(&raw, Path::new("cashflow.csv")).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.report.rows, 1);
    }

    #[test]
    fn test_table_from_raw_ignores_extra_columns() {
        use crate::schema::CashflowRecord;

        let raw = RawTable {
            headers: vec![
                "Notes".to_string(),
                "Month".to_string(),
                "OperatingCF".to_string(),
                "CAPEX".to_string(),
                "Delta_BFR".to_string(),
                "NetCashFlow".to_string(),
            ],
            rows: vec![vec![
                "ignore me".to_string(),
                "2023-01-01".to_string(),
                "400".to_string(),
                "-50".to_string(),
                "100".to_string(),
                "450".to_string(),
            ]],
        };

        let table: Table<CashflowRecord> =
            table_from_raw(&raw, Path::new("cashflow.csv")).unwrap();
        assert_eq!(table.records[0].operating_cf, 400.0);
        assert_eq!(table.records[0].net_cash_flow, 450.0);
    }
}
