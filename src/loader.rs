//! Devotee import from CSV and Excel files.
//!
//! A file is read into a header row plus data rows of plain text cells,
//! then every row is validated. Nothing is written here; the caller decides
//! what to do with an [`ImportOutcome`] that still carries row errors.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDate;
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;

use crate::error::{AttendanceError, Result};
use crate::models::{DevoteeInput, DevoteeType, Gender, SabhaType};

/// Largest upload accepted, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Columns every import file must have.
pub const REQUIRED_COLUMNS: [&str; 3] = ["name", "contact_number", "sabha_type"];

/// Column order written by the devotee export and accepted back here.
pub const IMPORT_COLUMNS: [&str; 13] = [
    "devotee_id",
    "name",
    "contact_number",
    "sabha_type",
    "devotee_type",
    "gender",
    "age",
    "date_of_birth",
    "address_line",
    "landmark",
    "zone",
    "join_date",
    "photo_url",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Excel,
}

impl FileKind {
    /// Detect the format from the file extension.
    pub fn from_file_name(name: &str) -> Result<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("csv") => Ok(FileKind::Csv),
            Some("xlsx") | Some("xls") => Ok(FileKind::Excel),
            _ => Err(AttendanceError::invalid(
                "Please upload a CSV or Excel file (.csv, .xlsx, .xls).",
            )),
        }
    }
}

/// Problems found in one data row. `row` is the spreadsheet row number,
/// counting the header as row 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    pub valid_rows: Vec<DevoteeInput>,
    pub errors: Vec<RowError>,
}

impl ImportOutcome {
    /// True when no row failed validation and the rows may be saved.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Header names plus data rows, all as trimmed text.
#[derive(Debug, Default)]
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn from_records(mut records: Vec<Vec<String>>) -> Result<Self> {
        if records.is_empty() {
            return Err(AttendanceError::Import("The file is empty.".to_string()));
        }
        let headers = records
            .remove(0)
            .into_iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
            .collect();
        Ok(Table {
            headers,
            rows: records,
        })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Validate an uploaded file's size and type, then parse it.
///
/// # Arguments
/// * `file_name` - Name the browser sent; only its extension matters
/// * `bytes` - File contents
/// * `filter` - Keep only rows for this sabha type
/// * `today` - Join date for rows without a usable one
pub fn parse_upload(
    file_name: &str,
    bytes: &[u8],
    filter: Option<SabhaType>,
    today: NaiveDate,
) -> Result<ImportOutcome> {
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AttendanceError::invalid("File size must be less than 5MB."));
    }
    let kind = FileKind::from_file_name(file_name)?;
    parse(kind, bytes, filter, today)
}

/// Parse file contents of a known kind.
pub fn parse(
    kind: FileKind,
    bytes: &[u8],
    filter: Option<SabhaType>,
    today: NaiveDate,
) -> Result<ImportOutcome> {
    let table = match kind {
        FileKind::Csv => read_csv(bytes)?,
        FileKind::Excel => read_excel(bytes)?,
    };
    validate(&table, filter, today)
}

fn read_csv(bytes: &[u8]) -> Result<Table> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| AttendanceError::Import("CSV file must be UTF-8 encoded.".to_string()))?;
    Table::from_records(parse_csv(text))
}

fn read_excel(bytes: &[u8]) -> Result<Table> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AttendanceError::Import("The workbook has no worksheets.".to_string()))??;

    let records = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Table::from_records(records)
}

/// Text form of an Excel cell. Whole floats lose their `.0` so phone
/// numbers typed as numbers survive, and date cells become `YYYY-MM-DD`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.date().to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.get(..10).unwrap_or(s.as_str()).to_string(),
        _ => String::new(),
    }
}

/// Split CSV text into records. Quoted fields may hold commas, newlines and
/// `""` escapes; a trailing newline does not start a new record.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => record.push(std::mem::take(&mut field)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

/// Normalise and check a contact number. Returns the digits on success.
pub fn validate_phone(raw: &str) -> std::result::Result<String, String> {
    let phone = raw.trim();
    if phone.is_empty() {
        return Err("Phone number is required".to_string());
    }
    let phone = phone.strip_suffix(".0").unwrap_or(phone);
    if !phone.chars().all(|c| c.is_ascii_digit()) || phone.len() < 10 {
        return Err("Phone number must be at least 10 digits".to_string());
    }
    Ok(phone.to_string())
}

/// A photo URL must be absolute `http` or `https` with a host.
pub fn validate_url(raw: &str) -> std::result::Result<(), String> {
    let url = raw.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err("Invalid URL format".to_string());
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if scheme.is_empty() || host.is_empty() {
        return Err("Invalid URL format".to_string());
    }
    if !matches!(scheme.to_lowercase().as_str(), "http" | "https") {
        return Err("URL must start with http:// or https://".to_string());
    }
    Ok(())
}

pub fn validate_sabha_type(raw: &str) -> std::result::Result<SabhaType, String> {
    if raw.trim().is_empty() {
        return Err("Sabha type is required".to_string());
    }
    raw.parse::<SabhaType>().map_err(|e| e.to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok())
}

fn cell_at(row: &[String], col: Option<usize>) -> &str {
    col.and_then(|i| row.get(i))
        .map(|s| s.trim())
        .unwrap_or_default()
}

fn validate(table: &Table, filter: Option<SabhaType>, today: NaiveDate) -> Result<ImportOutcome> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| table.column(col).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(AttendanceError::Import(format!(
            "Missing required columns: {}",
            missing.join(", ")
        )));
    }

    let address_col = table
        .column("address_line")
        .or_else(|| table.column("address"));
    let mut outcome = ImportOutcome::default();

    for (index, row) in table.rows.iter().enumerate() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let field = |name: &str| cell_at(row, table.column(name));

        let mut errors = Vec::new();

        let name = field("name");
        if name.is_empty() {
            errors.push("Name is required".to_string());
        }
        let phone = validate_phone(field("contact_number"))
            .map_err(|e| errors.push(e))
            .unwrap_or_default();
        let sabha_type = validate_sabha_type(field("sabha_type"))
            .map_err(|e| errors.push(e))
            .ok();

        let photo_url = field("photo_url");
        if !photo_url.is_empty() {
            if let Err(e) = validate_url(photo_url) {
                errors.push(e);
            }
        }

        let devotee_type = match field("devotee_type") {
            "" => Default::default(),
            raw => raw
                .parse::<DevoteeType>()
                .map_err(|e| errors.push(e.to_string()))
                .unwrap_or_default(),
        };
        let gender = match field("gender") {
            "" => None,
            raw => raw
                .parse::<Gender>()
                .map_err(|e| errors.push(e.to_string()))
                .ok(),
        };
        let age = match field("age").strip_suffix(".0").unwrap_or(field("age")) {
            "" => None,
            raw => raw
                .parse::<u32>()
                .map_err(|_| errors.push("Age must be a whole number".to_string()))
                .ok(),
        };

        if let Some(wanted) = filter {
            if field("sabha_type").to_lowercase() != wanted.as_str() {
                continue;
            }
        }

        match sabha_type {
            Some(sabha_type) if errors.is_empty() => outcome.valid_rows.push(DevoteeInput {
                devotee_id: field("devotee_id").to_string(),
                devotee_type,
                name: name.to_string(),
                contact_number: phone,
                date_of_birth: parse_date(field("date_of_birth")),
                gender,
                age,
                sabha_type,
                address_line: cell_at(row, address_col).to_string(),
                landmark: field("landmark").to_string(),
                zone: field("zone").to_string(),
                join_date: parse_date(field("join_date")).unwrap_or(today),
                photo_url: (!photo_url.is_empty()).then(|| photo_url.to_string()),
            }),
            _ => outcome.errors.push(RowError {
                row: index + 2,
                errors,
            }),
        }
    }

    log::info!(
        "Parsed import file: {} valid rows, {} rows with errors",
        outcome.valid_rows.len(),
        outcome.errors.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_fields_keep_quoted_commas_and_newlines() {
        let records = parse_csv("a,\"b, c\",\"say \"\"hi\"\"\"\r\n1,\"two\nlines\",3\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], vec!["a", "b, c", "say \"hi\""]);
        assert_eq!(records[1], vec!["1", "two\nlines", "3"]);
    }

    #[test]
    fn blank_lines_keep_row_numbers() {
        let records = parse_csv("h\n\nx");
        assert_eq!(records, vec![vec!["h"], vec![""], vec!["x"]]);
    }

    #[test]
    fn phone_rules() {
        assert_eq!(validate_phone("9876543210.0").unwrap(), "9876543210");
        assert!(validate_phone("98765").is_err());
        assert!(validate_phone("98765-43210").is_err());
        assert_eq!(validate_phone("").unwrap_err(), "Phone number is required");
    }

    #[test]
    fn url_rules() {
        assert!(validate_url("https://example.com/a.jpg").is_ok());
        assert_eq!(
            validate_url("ftp://example.com/a.jpg").unwrap_err(),
            "URL must start with http:// or https://"
        );
        assert_eq!(validate_url("example.com").unwrap_err(), "Invalid URL format");
        assert_eq!(validate_url("http:///path").unwrap_err(), "Invalid URL format");
    }

    #[test]
    fn file_kind_by_extension() {
        assert_eq!(FileKind::from_file_name("List.XLSX").unwrap(), FileKind::Excel);
        assert_eq!(FileKind::from_file_name("list.csv").unwrap(), FileKind::Csv);
        assert!(FileKind::from_file_name("list.pdf").is_err());
        assert!(FileKind::from_file_name("list").is_err());
    }
}
