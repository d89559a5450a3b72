//! Dashboard, profile, attendance report, analytics and report exports.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use crate::app::{
    attachment, is_ajax, page, page_number, respond, respond_json, sabha_options,
    search_type_options, today, AppState, Choice, SharedState,
};
use crate::attendance::{self, ReportFilter};
use crate::downloader::{attendance_csv, attendance_xlsx, REPORT_FILE_NAME};
use crate::error::{AttendanceError, Result};
use crate::login::{CurrentUser, Flash};
use crate::models::AttendanceStatus;
use crate::query::SearchType;

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub async fn dashboard(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = attendance::dashboard(&state.db, &current.permissions, today()).and_then(|stats| {
        let recent: Vec<_> = stats
            .recent_sabhas
            .iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "date": s.date,
                    "sabha_type_display": s.sabha_type.display(),
                    "location": s.location,
                })
            })
            .collect();
        let context = page(
            &current,
            &flash,
            json!({ "stats": stats, "recent": recent }),
        );
        Ok(state.views.render("dashboard", &context)?.into_response())
    });
    result.unwrap_or_else(|e| e.into_response())
}

pub async fn profile(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let context = page(
        &current,
        &flash,
        json!({ "member_since": current.user.created_at.date_naive() }),
    );
    respond(
        state
            .views
            .render("profile", &context)
            .map(IntoResponse::into_response),
        "/",
    )
}

/// Report filters as they arrive in the query string. Values that do not
/// parse are ignored rather than rejected.
#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub sabha_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub search_type: Option<String>,
    pub page: Option<String>,
}

fn date_param(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
}

impl ReportQuery {
    pub fn filter(&self) -> ReportFilter {
        let search_type = match self.search_type.as_deref().map(str::trim) {
            None | Some("") => SearchType::Name,
            given => SearchType::parse(given),
        };
        ReportFilter {
            sabha_type: self.sabha_type.as_deref().and_then(|t| t.parse().ok()),
            date_from: date_param(self.date_from.as_deref()),
            date_to: date_param(self.date_to.as_deref()),
            status: self.status.as_deref().and_then(|s| s.parse().ok()),
            search: self.search.clone().unwrap_or_default(),
            search_type,
        }
    }
}

/// The filter back as a query string, for pagination and export links.
fn filter_query(filter: &ReportFilter) -> String {
    let mut pairs = vec![
        ("search".to_string(), filter.search.trim().to_string()),
        ("search_type".to_string(), filter.search_type.as_str().to_string()),
    ];
    if let Some(t) = filter.sabha_type {
        pairs.push(("sabha_type".to_string(), t.as_str().to_string()));
    }
    if let Some(d) = filter.date_from {
        pairs.push(("date_from".to_string(), d.to_string()));
    }
    if let Some(d) = filter.date_to {
        pairs.push(("date_to".to_string(), d.to_string()));
    }
    if let Some(s) = filter.status {
        pairs.push(("status".to_string(), s.as_str().to_string()));
    }
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn status_options(selected: Option<AttendanceStatus>) -> Vec<Choice> {
    [
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Late,
    ]
    .into_iter()
    .map(|s| Choice {
        value: s.as_str(),
        label: s.display(),
        selected: Some(s) == selected,
    })
    .collect()
}

pub async fn attendance_report(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
    Query(flash): Query<Flash>,
) -> Response {
    respond(report(&state, &current, &headers, &query, &flash), "/")
}

fn report(
    state: &AppState,
    current: &CurrentUser,
    headers: &HeaderMap,
    query: &ReportQuery,
    flash: &Flash,
) -> Result<Response> {
    let filter = query.filter();
    let report = attendance::report(
        &state.db,
        &current.permissions,
        &filter,
        page_number(query.page.as_deref()),
    )?;

    if is_ajax(headers) {
        return Ok(Json(json!({
            "records": report.page.items,
            "total_count": report.page.total_count,
            "current_page": report.page.number,
            "total_pages": report.page.total_pages,
            "has_previous": report.page.has_previous,
            "has_next": report.page.has_next,
            "present_count": report.present_count,
            "absent_count": report.absent_count,
            "late_count": report.late_count,
        }))
        .into_response());
    }

    let selected_type: Vec<_> = filter.sabha_type.into_iter().collect();
    let context = page(
        current,
        flash,
        json!({
            "report": report,
            "search": filter.search,
            "date_from": filter.date_from,
            "date_to": filter.date_to,
            "sabha_types": sabha_options(&current.permissions.allowed, &selected_type),
            "statuses": status_options(filter.status),
            "search_types": search_type_options(filter.search_type),
            "query": filter_query(&filter),
        }),
    );
    Ok(state.views.render("report", &context)?.into_response())
}

/// Present counts for the report's charts.
pub async fn attendance_analytics(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ReportQuery>,
) -> Response {
    respond_json(
        attendance::analytics(&state.db, &current.permissions, &query.filter())
            .map(|analytics| Json(analytics).into_response()),
    )
}

/// The filtered report as an Excel workbook.
pub async fn export_excel(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let rows = match attendance::report_rows(&state.db, &current.permissions, &query.filter()) {
        Ok(rows) => rows,
        Err(e) => return respond(Err(e), "/attendance/report"),
    };
    let result = tokio::task::spawn_blocking(move || attendance_xlsx(&rows))
        .await
        .map_err(|e| AttendanceError::Export(format!("export worker failed: {}", e)))
        .and_then(|built| built)
        .map(|bytes| attachment(XLSX_CONTENT_TYPE, REPORT_FILE_NAME, bytes));
    respond(result, "/attendance/report")
}

/// The filtered report as CSV.
pub async fn export_csv(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let result = attendance::report_rows(&state.db, &current.permissions, &query.filter()).map(
        |rows| {
            attachment(
                "text/csv; charset=utf-8",
                "attendance_report.csv",
                attendance_csv(&rows),
            )
        },
    );
    respond(result, "/attendance/report")
}
