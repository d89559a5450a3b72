//! CSV and Excel exports of attendance and devotees.

use chrono::NaiveDate;
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::attendance::ReportRow;
use crate::error::Result;
use crate::loader::IMPORT_COLUMNS;
use crate::models::{AttendanceStatus, Devotee, SabhaType};

/// File name offered for the Excel report.
pub const REPORT_FILE_NAME: &str = "temple_attendance_report.xlsx";

const HEADER_BLUE: u32 = 0x2E4057;
const PRESENT_GREEN: u32 = 0x90EE90;
const LATE_GOLD: u32 = 0xFFD700;
const ABSENT_PINK: u32 = 0xFFB6C1;

/// Quote a CSV field if it holds a comma, quote or newline.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_field(field));
    }
    out.push('\n');
}

/// One line per attendance record.
///
/// # Examples
/// ```
/// use temple_attendance::downloader::attendance_csv;
///
/// let csv = attendance_csv(&[]);
/// assert_eq!(csv, "Devotee Name,Sabha Type,Date,Status,Notes\n");
/// ```
pub fn attendance_csv(rows: &[ReportRow]) -> String {
    let mut out = String::new();
    push_record(&mut out, ["Devotee Name", "Sabha Type", "Date", "Status", "Notes"]);
    for row in rows {
        let date = row.sabha_date.to_string();
        push_record(
            &mut out,
            [
                row.devotee_name.as_str(),
                row.sabha_type_display.as_str(),
                date.as_str(),
                row.status_display.as_str(),
                row.notes.as_str(),
            ],
        );
    }
    out
}

/// The devotee list in the column layout the importer reads.
pub fn devotees_csv(devotees: &[Devotee]) -> String {
    let mut out = String::new();
    push_record(&mut out, IMPORT_COLUMNS);
    for d in devotees {
        let fields = [
            d.devotee_id.clone(),
            d.name.clone(),
            d.contact_number.clone(),
            d.sabha_type.as_str().to_string(),
            d.devotee_type.as_str().to_string(),
            d.gender.map(|g| g.as_str().to_string()).unwrap_or_default(),
            d.age.map(|a| a.to_string()).unwrap_or_default(),
            d.date_of_birth.map(|b| b.to_string()).unwrap_or_default(),
            d.address_line.clone(),
            d.landmark.clone(),
            d.zone.clone(),
            d.join_date.to_string(),
            d.photo_url.clone().unwrap_or_default(),
        ];
        push_record(&mut out, fields.iter().map(String::as_str));
    }
    out
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    present: usize,
    absent: usize,
    late: usize,
}

impl Counts {
    fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
        }
    }

    fn label(&self) -> String {
        format!("P:{} A:{} L:{}", self.present, self.absent, self.late)
    }
}

/// Devotee-by-date grid for one sabha type.
#[derive(Debug, Default)]
struct Pivot<'a> {
    dates: BTreeSet<NaiveDate>,
    /// Keyed by printed id then document id so rows come out in id order.
    devotees: BTreeMap<(&'a str, &'a str), &'a ReportRow>,
    statuses: HashMap<(&'a str, NaiveDate), AttendanceStatus>,
    per_date: BTreeMap<NaiveDate, Counts>,
}

struct Styles {
    title: Format,
    header: Format,
    counts: Format,
    totals: Format,
    bold: Format,
    present: Format,
    late: Format,
    absent: Format,
}

impl Styles {
    fn new() -> Self {
        let title = Format::new()
            .set_bold()
            .set_font_size(14)
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(HEADER_BLUE))
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter);
        let header = Format::new()
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(HEADER_BLUE))
            .set_align(FormatAlign::Center);
        let counts = Format::new()
            .set_bold()
            .set_font_size(9)
            .set_background_color(Color::RGB(0xF0F0F0))
            .set_align(FormatAlign::Center);
        let totals = Format::new()
            .set_bold()
            .set_font_size(9)
            .set_background_color(Color::RGB(0xE0E0E0));
        Styles {
            title,
            header,
            counts,
            totals,
            bold: Format::new().set_bold(),
            present: Format::new().set_background_color(Color::RGB(PRESENT_GREEN)),
            late: Format::new().set_background_color(Color::RGB(LATE_GOLD)),
            absent: Format::new().set_background_color(Color::RGB(ABSENT_PINK)),
        }
    }

    fn status(&self, status: AttendanceStatus) -> &Format {
        match status {
            AttendanceStatus::Present => &self.present,
            AttendanceStatus::Late => &self.late,
            AttendanceStatus::Absent => &self.absent,
        }
    }
}

/// Excel report: a `Summary` sheet with per-date counts for every sabha
/// type, then one devotee-by-date sheet per sabha type present in `rows`.
pub fn attendance_xlsx(rows: &[ReportRow]) -> Result<Vec<u8>> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();

    let mut summary: BTreeMap<(NaiveDate, SabhaType), Counts> = BTreeMap::new();
    let mut pivots: BTreeMap<SabhaType, Pivot> = BTreeMap::new();
    for row in rows {
        summary
            .entry((row.sabha_date, row.sabha_type))
            .or_default()
            .add(row.status);

        let pivot = pivots.entry(row.sabha_type).or_default();
        pivot.dates.insert(row.sabha_date);
        pivot
            .devotees
            .entry((row.devotee_id.as_str(), row.devotee_key.as_str()))
            .or_insert(row);
        pivot
            .statuses
            .entry((row.devotee_key.as_str(), row.sabha_date))
            .or_insert(row.status);
        pivot.per_date.entry(row.sabha_date).or_default().add(row.status);
    }

    workbook.push_worksheet(summary_sheet(&summary, &styles)?);
    for (sabha_type, pivot) in &pivots {
        workbook.push_worksheet(sabha_sheet(*sabha_type, pivot, &styles)?);
    }

    log::info!(
        "Built attendance workbook: {} records across {} sabha types",
        rows.len(),
        pivots.len()
    );
    Ok(workbook.save_to_buffer()?)
}

fn summary_sheet(
    summary: &BTreeMap<(NaiveDate, SabhaType), Counts>,
    styles: &Styles,
) -> Result<Worksheet> {
    let mut sheet = Worksheet::new();
    sheet.set_name("Summary")?;
    sheet.merge_range(0, 0, 0, 4, "Temple Attendance Summary by Date", &styles.title)?;

    for (col, header) in ["Date", "Sabha Type", "Present", "Absent", "Late"]
        .iter()
        .enumerate()
    {
        sheet.write_string_with_format(2, col as u16, *header, &styles.header)?;
    }

    for (i, ((date, sabha_type), counts)) in summary.iter().enumerate() {
        let row = 3 + i as u32;
        sheet.write_string(row, 0, date.to_string())?;
        sheet.write_string(row, 1, sabha_type.display())?;
        sheet.write_number(row, 2, counts.present as f64)?;
        sheet.write_number(row, 3, counts.absent as f64)?;
        sheet.write_number(row, 4, counts.late as f64)?;
    }
    sheet.set_column_width(0, 14)?;
    sheet.set_column_width(1, 16)?;
    Ok(sheet)
}

fn sabha_sheet(sabha_type: SabhaType, pivot: &Pivot, styles: &Styles) -> Result<Worksheet> {
    const FIRST_DATE_COL: u16 = 4;

    let mut sheet = Worksheet::new();
    sheet.set_name(sabha_type.display())?;

    let last_col = FIRST_DATE_COL + pivot.dates.len() as u16 - 1;
    sheet.merge_range(
        0,
        0,
        0,
        last_col,
        &format!("{} - Devotee Attendance by Date", sabha_type.display()),
        &styles.title,
    )?;

    for (col, header) in ["ID", "Name", "Mobile", "Type"].iter().enumerate() {
        sheet.write_string_with_format(2, col as u16, *header, &styles.header)?;
    }
    for (i, date) in pivot.dates.iter().enumerate() {
        let col = FIRST_DATE_COL + i as u16;
        let counts = pivot.per_date.get(date).copied().unwrap_or_default();
        sheet.write_string_with_format(1, col, counts.label(), &styles.counts)?;
        sheet.write_string_with_format(2, col, date.to_string(), &styles.header)?;
        sheet.set_column_width(col, 12)?;
    }

    for (i, ((devotee_id, devotee_key), info)) in pivot.devotees.iter().enumerate() {
        let row = 3 + i as u32;
        sheet.write_string(row, 0, *devotee_id)?;
        sheet.write_string(row, 1, info.devotee_name.as_str())?;
        sheet.write_string(row, 2, info.mobile.as_str())?;
        sheet.write_string(row, 3, info.devotee_type.as_str())?;

        for (j, date) in pivot.dates.iter().enumerate() {
            let status = pivot
                .statuses
                .get(&(*devotee_key, *date))
                .copied()
                .unwrap_or(AttendanceStatus::Absent);
            sheet.write_string_with_format(
                row,
                FIRST_DATE_COL + j as u16,
                status.display(),
                styles.status(status),
            )?;
        }
    }

    let totals_row = pivot.devotees.len() as u32 + 5;
    sheet.write_string_with_format(totals_row, 0, "TOTALS:", &styles.bold)?;
    for (i, date) in pivot.dates.iter().enumerate() {
        let counts = pivot.per_date.get(date).copied().unwrap_or_default();
        sheet.write_string_with_format(
            totals_row,
            FIRST_DATE_COL + i as u16,
            counts.label(),
            &styles.totals,
        )?;
    }

    sheet.set_column_width(1, 24)?;
    sheet.set_column_width(2, 14)?;
    Ok(sheet)
}
