//! Sabha, attendance and reporting operations on top of the store.
//!
//! Everything here takes the caller's [`Permissions`] so that a user only
//! ever reads or writes data for the sabha types assigned to them.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::access::Permissions;
use crate::database::Database;
use crate::error::Result;
use crate::models::{
    AttendanceStatus, Devotee, DevoteeInput, DevoteeType, Gender, NewSabha, Sabha, SabhaType,
};
use crate::query::{self, Page, SearchType};

/// Devotees of the given types matching a search, in devotee-id order.
pub fn find_devotees(
    db: &Database,
    types: &[SabhaType],
    search: &str,
    search_type: SearchType,
) -> Result<Vec<Devotee>> {
    let mut devotees: Vec<Devotee> = db
        .list_devotees(types)?
        .into_iter()
        .filter(|d| query::matches(d, search, search_type))
        .collect();
    query::sort_by_devotee_id(&mut devotees);
    Ok(devotees)
}

/// Create a sabha and give every devotee of its type an `absent` mark.
/// Returns the sabha and the number of marks seeded.
pub fn create_sabha(db: &Database, perms: &Permissions, new: NewSabha) -> Result<(Sabha, usize)> {
    perms.require_view(new.sabha_type)?;
    let sabha = db.insert_sabha(new)?;
    let seeded = db.seed_absent(&sabha)?;
    log::info!(
        "Created {} on {} with {} default absent marks",
        sabha.sabha_type.display(),
        sabha.date,
        seeded
    );
    Ok((sabha, seeded))
}

/// Load a sabha the user is allowed to see.
pub fn visible_sabha(db: &Database, perms: &Permissions, sabha_id: &str) -> Result<Sabha> {
    let sabha = db.get_sabha(sabha_id)?;
    perms.require_view(sabha.sabha_type)?;
    Ok(sabha)
}

/// Load a devotee the user is allowed to see.
pub fn visible_devotee(db: &Database, perms: &Permissions, id: &str) -> Result<Devotee> {
    let devotee = db.get_devotee(id)?;
    perms.require_view(devotee.sabha_type)?;
    Ok(devotee)
}

/// Save the marks submitted for one page of the mark-attendance screen.
///
/// `form` holds `status_<id>` and `notes_<id>` fields keyed by devotee
/// document id. A devotee on the page with no (or an unreadable) status is
/// saved as absent.
pub fn mark_page(
    db: &Database,
    sabha: &Sabha,
    devotees: &[Devotee],
    form: &HashMap<String, String>,
) -> Result<usize> {
    let marks: Vec<(String, AttendanceStatus, String)> = devotees
        .iter()
        .map(|d| {
            let status = form
                .get(&format!("status_{}", d.id))
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let notes = form
                .get(&format!("notes_{}", d.id))
                .cloned()
                .unwrap_or_default();
            (d.id.clone(), status, notes)
        })
        .collect();

    db.upsert_attendance_many(&sabha.id, &marks)
}

/// Save one devotee's mark, as sent by the inline status buttons.
pub fn save_individual(
    db: &Database,
    perms: &Permissions,
    sabha_id: &str,
    devotee_id: &str,
    status: AttendanceStatus,
    notes: &str,
) -> Result<bool> {
    visible_sabha(db, perms, sabha_id)?;
    visible_devotee(db, perms, devotee_id)?;
    db.upsert_attendance(sabha_id, devotee_id, status, notes)
}

/// Current mark per devotee for a sabha; devotees with no record are absent.
pub fn existing_marks(
    db: &Database,
    sabha_id: &str,
    devotees: &[Devotee],
) -> Result<HashMap<String, (AttendanceStatus, String)>> {
    let records = db.attendance_for_sabha(sabha_id)?;
    let mut marks = HashMap::with_capacity(devotees.len());
    for devotee in devotees {
        let mark = records
            .iter()
            .find(|r| r.devotee_id == devotee.id)
            .map(|r| (r.status, r.notes.clone()))
            .unwrap_or((AttendanceStatus::Absent, String::new()));
        marks.insert(devotee.id.clone(), mark);
    }
    Ok(marks)
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekStat {
    pub week: String,
    pub sabhas: usize,
    pub present: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_devotees: usize,
    pub recent_sabhas: Vec<Sabha>,
    pub attendance_rate: u32,
    pub this_week_sabhas: usize,
    pub weekly: Vec<WeekStat>,
}

/// Figures for the landing page, limited to the user's sabha types.
pub fn dashboard(db: &Database, perms: &Permissions, today: NaiveDate) -> Result<DashboardStats> {
    let types = &perms.allowed;
    let sabhas = db.list_sabhas(types)?;
    let sabha_dates: HashMap<&str, NaiveDate> =
        sabhas.iter().map(|s| (s.id.as_str(), s.date)).collect();

    let records: Vec<_> = db
        .all_attendance()?
        .into_iter()
        .filter(|r| sabha_dates.contains_key(r.sabha_id.as_str()))
        .collect();
    let present = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present)
        .count();
    let attendance_rate = percentage(present, records.len());

    let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    let week_end = week_start + Duration::days(6);
    let this_week_sabhas = db.count_sabhas_between(types, week_start, week_end)?;

    let mut weekly = Vec::with_capacity(4);
    for i in 0..4i64 {
        let start = today - Duration::weeks(i + 1);
        let end = today - Duration::weeks(i);
        let in_range = |d: NaiveDate| d >= start && d <= end;

        let sabha_count = sabhas.iter().filter(|s| in_range(s.date)).count();
        let present_count = records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .filter(|r| sabha_dates.get(r.sabha_id.as_str()).is_some_and(|d| in_range(*d)))
            .count();
        weekly.push(WeekStat {
            week: format!("Week {}", i + 1),
            sabhas: sabha_count,
            present: present_count,
        });
    }

    Ok(DashboardStats {
        total_devotees: db.count_devotees(types)?,
        recent_sabhas: sabhas.into_iter().take(5).collect(),
        attendance_rate,
        this_week_sabhas,
        weekly,
    })
}

/// Filters shared by the report, analytics and exports.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub sabha_type: Option<SabhaType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub status: Option<AttendanceStatus>,
    pub search: String,
    pub search_type: SearchType,
}

impl ReportFilter {
    fn includes_sabha(&self, sabha: &Sabha) -> bool {
        self.sabha_type.map_or(true, |t| sabha.sabha_type == t)
            && self.date_from.map_or(true, |from| sabha.date >= from)
            && self.date_to.map_or(true, |to| sabha.date <= to)
    }
}

/// An attendance record joined with its devotee and sabha.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub record_id: String,
    pub devotee_key: String,
    pub devotee_id: String,
    pub devotee_name: String,
    pub mobile: String,
    pub devotee_type: String,
    pub sabha_id: String,
    pub sabha_date: NaiveDate,
    pub sabha_type: SabhaType,
    pub sabha_type_display: String,
    pub status: AttendanceStatus,
    pub status_display: String,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub page: Page<ReportRow>,
    pub present_count: usize,
    pub absent_count: usize,
    pub late_count: usize,
}

/// Joined rows matching every filter except `status`, newest sabha first.
fn joined_rows(db: &Database, perms: &Permissions, filter: &ReportFilter) -> Result<Vec<ReportRow>> {
    let types = perms.scope(filter.sabha_type);
    let sabhas: HashMap<String, Sabha> = db
        .list_sabhas(&types)?
        .into_iter()
        .filter(|s| filter.includes_sabha(s))
        .map(|s| (s.id.clone(), s))
        .collect();
    if sabhas.is_empty() {
        return Ok(Vec::new());
    }

    let devotees: HashMap<String, Devotee> = db
        .list_devotees(&SabhaType::ALL)?
        .into_iter()
        .map(|d| (d.id.clone(), d))
        .collect();

    let mut rows = Vec::new();
    for record in db.all_attendance()? {
        let Some(sabha) = sabhas.get(&record.sabha_id) else {
            continue;
        };
        let devotee = devotees.get(&record.devotee_id);
        let searching = !filter.search.trim().is_empty();
        match devotee {
            Some(d) if !query::matches(d, &filter.search, filter.search_type) => continue,
            None if searching => continue,
            _ => {}
        }

        rows.push(ReportRow {
            record_id: record.id,
            devotee_key: record.devotee_id,
            devotee_id: devotee.map_or_else(|| "N/A".to_string(), |d| d.devotee_id.clone()),
            devotee_name: devotee.map_or_else(|| "Unknown".to_string(), |d| d.name.clone()),
            mobile: devotee.map_or_else(|| "N/A".to_string(), |d| d.contact_number.clone()),
            devotee_type: devotee
                .map_or_else(|| "N/A".to_string(), |d| d.devotee_type.as_str().to_string()),
            sabha_id: sabha.id.clone(),
            sabha_date: sabha.date,
            sabha_type: sabha.sabha_type,
            sabha_type_display: sabha.sabha_type.display().to_string(),
            status: record.status,
            status_display: record.status.display().to_string(),
            notes: record.notes,
        });
    }

    rows.sort_by(|a, b| {
        b.sabha_date
            .cmp(&a.sabha_date)
            .then_with(|| a.sabha_type.cmp(&b.sabha_type))
            .then_with(|| a.devotee_name.cmp(&b.devotee_name))
    });
    Ok(rows)
}

/// Rows matching every filter including `status`; what the exports write.
pub fn report_rows(db: &Database, perms: &Permissions, filter: &ReportFilter) -> Result<Vec<ReportRow>> {
    let mut rows = joined_rows(db, perms, filter)?;
    if let Some(status) = filter.status {
        rows.retain(|r| r.status == status);
    }
    Ok(rows)
}

/// Paginated report. The status counts ignore the status filter so the
/// filter buttons always show the full split.
pub fn report(
    db: &Database,
    perms: &Permissions,
    filter: &ReportFilter,
    page: usize,
) -> Result<Report> {
    let mut rows = joined_rows(db, perms, filter)?;
    let count = |status| rows.iter().filter(|r| r.status == status).count();
    let present_count = count(AttendanceStatus::Present);
    let absent_count = count(AttendanceStatus::Absent);
    let late_count = count(AttendanceStatus::Late);

    if let Some(status) = filter.status {
        rows.retain(|r| r.status == status);
    }

    Ok(Report {
        page: Page::paginate(rows, page, query::REPORT_PER_PAGE),
        present_count,
        absent_count,
        late_count,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Analytics {
    pub sabha_counts: BTreeMap<String, usize>,
    pub monthly_trend: BTreeMap<String, usize>,
    pub date_intensity: BTreeMap<String, usize>,
    pub total: usize,
}

/// Present-mark counts grouped by sabha type, month and date.
pub fn analytics(db: &Database, perms: &Permissions, filter: &ReportFilter) -> Result<Analytics> {
    let filter = ReportFilter {
        status: Some(AttendanceStatus::Present),
        search: String::new(),
        ..filter.clone()
    };

    let mut analytics = Analytics::default();
    for row in report_rows(db, perms, &filter)? {
        *analytics
            .sabha_counts
            .entry(row.sabha_type.as_str().to_string())
            .or_default() += 1;
        *analytics
            .monthly_trend
            .entry(row.sabha_date.format("%Y-%m").to_string())
            .or_default() += 1;
        *analytics
            .date_intensity
            .entry(row.sabha_date.to_string())
            .or_default() += 1;
        analytics.total += 1;
    }
    Ok(analytics)
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub sabha_id: String,
    pub date: NaiveDate,
    pub sabha_type_display: String,
    pub location: String,
    pub status: AttendanceStatus,
    pub status_display: String,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevoteeHistory {
    pub rows: Vec<HistoryRow>,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub rate: u32,
}

/// A devotee's marks joined with their sabhas, newest first.
pub fn devotee_history(db: &Database, devotee: &Devotee) -> Result<DevoteeHistory> {
    let mut rows = Vec::new();
    for record in db.attendance_for_devotee(&devotee.id)? {
        let Ok(sabha) = db.get_sabha(&record.sabha_id) else {
            continue;
        };
        rows.push(HistoryRow {
            sabha_id: sabha.id,
            date: sabha.date,
            sabha_type_display: sabha.sabha_type.display().to_string(),
            location: sabha.location,
            status: record.status,
            status_display: record.status.display().to_string(),
            notes: record.notes,
        });
    }
    rows.sort_by(|a, b| b.date.cmp(&a.date));

    let count = |status| rows.iter().filter(|r| r.status == status).count();
    let present = count(AttendanceStatus::Present);
    let absent = count(AttendanceStatus::Absent);
    let late = count(AttendanceStatus::Late);
    let rate = percentage(present, rows.len());
    Ok(DevoteeHistory {
        rows,
        present,
        absent,
        late,
        rate,
    })
}

const SAMPLE_DEVOTEES: [(&str, &str, &str, SabhaType, Gender); 8] = [
    ("1001", "Aarav Patel", "9876500001", SabhaType::Bal, Gender::Male),
    ("1002", "Diya Shah", "9876500002", SabhaType::Bal, Gender::Female),
    ("1003", "Krish Mehta", "9876500003", SabhaType::Yuvak, Gender::Male),
    ("1004", "Yash Desai", "9876500004", SabhaType::Yuvak, Gender::Male),
    ("1005", "Meera Joshi", "9876500005", SabhaType::Mahila, Gender::Female),
    ("1006", "Riya Trivedi", "9876500006", SabhaType::Mahila, Gender::Female),
    ("1007", "Harish Bhatt", "9876500007", SabhaType::Sanyukt, Gender::Male),
    ("1008", "Kavita Pandya", "9876500008", SabhaType::Sanyukt, Gender::Female),
];

/// Load a few devotees and one sabha per type on the most recent Sunday.
///
/// Safe to run repeatedly: devotees are upserted by id and a sabha is only
/// created when none exists for that type and date.
///
/// # Returns
/// * `(devotees written, sabhas created)`
pub fn seed_sample_data(db: &Database, today: NaiveDate) -> Result<(usize, usize)> {
    let rows: Vec<DevoteeInput> = SAMPLE_DEVOTEES
        .iter()
        .map(|(id, name, phone, sabha_type, gender)| DevoteeInput {
            devotee_id: id.to_string(),
            devotee_type: DevoteeType::Haribhakt,
            name: name.to_string(),
            contact_number: phone.to_string(),
            date_of_birth: None,
            gender: Some(*gender),
            age: None,
            sabha_type: *sabha_type,
            address_line: String::new(),
            landmark: String::new(),
            zone: String::new(),
            join_date: today,
            photo_url: None,
        })
        .collect();
    let (created, updated) = db.import_devotees(&rows)?;

    let sunday = today - Duration::days(today.weekday().num_days_from_sunday() as i64);
    let existing = db.list_sabhas(&SabhaType::ALL)?;
    let mut sabhas = 0;
    for sabha_type in SabhaType::ALL {
        if existing
            .iter()
            .any(|s| s.sabha_type == sabha_type && s.date == sunday)
        {
            continue;
        }
        create_sabha(
            db,
            &Permissions::admin(),
            NewSabha {
                date: sunday,
                sabha_type,
                location: "Main Hall".to_string(),
                start_time: None,
                end_time: None,
                mandal: None,
                xetra: None,
            },
        )?;
        sabhas += 1;
    }

    log::info!(
        "Seeded {} devotees ({} new) and {} sabhas",
        created + updated,
        created,
        sabhas
    );
    Ok((created + updated, sabhas))
}

/// `part / whole` as a rounded percentage; 0 when `whole` is 0.
pub fn percentage(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::percentage;

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(5, 5), 100);
    }
}
