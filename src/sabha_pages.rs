//! Sabha pages and attendance marking.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::app::{
    is_ajax, page, page_number, respond, respond_json, sabha_options, search_query,
    search_type_options, success, today, AppState, SharedState,
};
use crate::attendance::{self, visible_sabha};
use crate::error::{AttendanceError, Result};
use crate::login::{CurrentUser, Flash};
use crate::mailer;
use crate::models::{AttendanceStatus, Devotee, NewSabha, Sabha};
use crate::photos;
use crate::query::{Page, SearchType, ATTENDANCE_PER_PAGE};

#[derive(Debug, Serialize)]
struct SabhaRow {
    id: String,
    date: NaiveDate,
    sabha_type: &'static str,
    sabha_type_display: &'static str,
    location: String,
    start_time: String,
    end_time: String,
    mandal: String,
    xetra: String,
}

impl From<Sabha> for SabhaRow {
    fn from(s: Sabha) -> Self {
        SabhaRow {
            id: s.id,
            date: s.date,
            sabha_type: s.sabha_type.as_str(),
            sabha_type_display: s.sabha_type.display(),
            location: s.location,
            start_time: time_text(s.start_time),
            end_time: time_text(s.end_time),
            mandal: s.mandal.unwrap_or_default(),
            xetra: s.xetra.unwrap_or_default(),
        }
    }
}

fn time_text(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default()
}

pub async fn list_sabhas(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = state
        .db
        .list_sabhas(&current.permissions.allowed)
        .and_then(|sabhas| {
            let rows: Vec<SabhaRow> = sabhas.into_iter().map(SabhaRow::from).collect();
            let context = page(&current, &flash, json!({ "sabhas": rows }));
            Ok(state.views.render("sabha_list", &context)?.into_response())
        });
    respond(result, "/")
}

pub async fn add_sabha_page(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = current.permissions.require_any().and_then(|()| {
        let mandals = state.db.list_mandals()?;
        let context = page(
            &current,
            &flash,
            json!({
                "today": today(),
                "sabha_types": sabha_options(&current.permissions.allowed, &[]),
                "mandals": mandals,
            }),
        );
        Ok(state.views.render("sabha_form", &context)?.into_response())
    });
    respond(result, "/sabhas")
}

#[derive(Debug, Default, Deserialize)]
pub struct SabhaForm {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub sabha_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub mandal: String,
    #[serde(default)]
    pub xetra: String,
}

impl SabhaForm {
    fn into_new_sabha(self) -> Result<NewSabha> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| AttendanceError::invalid("A valid date is required."))?;
        if self.sabha_type.trim().is_empty() {
            return Err(AttendanceError::invalid("Sabha type is required."));
        }
        Ok(NewSabha {
            date,
            sabha_type: self.sabha_type.parse()?,
            location: self.location.trim().to_string(),
            start_time: parse_time(&self.start_time)?,
            end_time: parse_time(&self.end_time)?,
            mandal: non_empty(self.mandal),
            xetra: non_empty(self.xetra),
        })
    }
}

fn parse_time(raw: &str) -> Result<Option<NaiveTime>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map(Some)
        .map_err(|_| AttendanceError::invalid(format!("Invalid time: {}", raw)))
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub async fn add_sabha(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Form(form): Form<SabhaForm>,
) -> Response {
    let result = form.into_new_sabha().and_then(|new| {
        attendance::create_sabha(&state.db, &current.permissions, new)?;
        Ok(success("/sabhas", "Sabha created successfully!"))
    });
    respond(result, "/sabhas/add")
}

/// Date and type for the delete confirmation dialog.
pub async fn delete_sabha_info(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    respond_json(
        visible_sabha(&state.db, &current.permissions, &id).map(|sabha| {
            Json(json!({
                "success": true,
                "date": sabha.date,
                "sabha_type": sabha.sabha_type.display(),
            }))
            .into_response()
        }),
    )
}

/// Delete a sabha and its attendance records.
pub async fn delete_sabha(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    let result = current.permissions.require_delete().and_then(|()| {
        let sabha = visible_sabha(&state.db, &current.permissions, &id)?;
        state.db.delete_sabha(&sabha.id)?;
        log::info!(
            "{} deleted {} on {}",
            current.user.username,
            sabha.sabha_type.display(),
            sabha.date
        );
        Ok(success(
            "/sabhas",
            &format!("Sabha on {} deleted successfully!", sabha.date),
        ))
    });
    respond(result, "/sabhas")
}

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceQuery {
    #[serde(default)]
    pub search: String,
    pub search_type: Option<String>,
    pub page: Option<String>,
}

impl AttendanceQuery {
    fn search_type(&self) -> SearchType {
        SearchType::parse(self.search_type.as_deref())
    }

    /// The page of the sabha's devotees this query selects.
    fn devotees(&self, state: &AppState, sabha: &Sabha) -> Result<Page<Devotee>> {
        let devotees = attendance::find_devotees(
            &state.db,
            &[sabha.sabha_type],
            &self.search,
            self.search_type(),
        )?;
        Ok(Page::paginate(
            devotees,
            page_number(self.page.as_deref()),
            ATTENDANCE_PER_PAGE,
        ))
    }
}

/// A devotee row on the mark-attendance screen with its current mark.
#[derive(Debug, Serialize)]
struct MarkRow {
    id: String,
    devotee_id: String,
    name: String,
    contact_number: String,
    devotee_type: &'static str,
    photo_url: String,
    status: &'static str,
    notes: String,
    present: bool,
    absent: bool,
    late: bool,
}

fn mark_rows(state: &AppState, sabha: &Sabha, devotees: Page<Devotee>) -> Result<Page<MarkRow>> {
    let marks = attendance::existing_marks(&state.db, &sabha.id, &devotees.items)?;
    Ok(devotees.map(|d| {
        let (status, notes) = marks
            .get(&d.id)
            .cloned()
            .unwrap_or((AttendanceStatus::Absent, String::new()));
        MarkRow {
            photo_url: photos::photo_src(&d),
            devotee_type: d.devotee_type.as_str(),
            id: d.id,
            devotee_id: d.devotee_id,
            name: d.name,
            contact_number: d.contact_number,
            status: status.as_str(),
            notes,
            present: status == AttendanceStatus::Present,
            absent: status == AttendanceStatus::Absent,
            late: status == AttendanceStatus::Late,
        }
    }))
}

pub async fn mark_attendance_page(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<AttendanceQuery>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = visible_sabha(&state.db, &current.permissions, &id).and_then(|sabha| {
        let rows = mark_rows(&state, &sabha, query.devotees(&state, &sabha)?)?;

        if is_ajax(&headers) {
            return Ok(Json(json!({
                "devotees": rows.items,
                "total_count": rows.total_count,
                "current_page": rows.number,
                "total_pages": rows.total_pages,
                "has_previous": rows.has_previous,
                "has_next": rows.has_next,
            }))
            .into_response());
        }

        let search_type = query.search_type();
        let context = page(
            &current,
            &flash,
            json!({
                "sabha": SabhaRow::from(sabha),
                "devotees": rows,
                "search": query.search,
                "search_types": search_type_options(search_type),
                "query": search_query(&query.search, search_type),
            }),
        );
        Ok(state.views.render("mark_attendance", &context)?.into_response())
    });
    respond(result, "/sabhas")
}

/// Save the marks for the page of devotees the form was rendered with.
pub async fn mark_attendance(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<AttendanceQuery>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let back = format!(
        "/sabhas/{}/attendance?page={}&{}",
        id,
        page_number(query.page.as_deref()),
        search_query(&query.search, query.search_type())
    );
    let result = visible_sabha(&state.db, &current.permissions, &id).and_then(|sabha| {
        let devotees = query.devotees(&state, &sabha)?;
        let saved = attendance::mark_page(&state.db, &sabha, &devotees.items, &form)?;
        log::info!(
            "{} marked {} devotees for sabha {}",
            current.user.username,
            saved,
            sabha.id
        );
        Ok(success(&back, "Attendance marked successfully!"))
    });
    respond(result, &back)
}

#[derive(Debug, Deserialize)]
pub struct SaveAttendance {
    pub sabha_id: String,
    pub devotee_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub notes: String,
}

/// Save a single devotee's mark from the inline status buttons.
pub async fn save_individual(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<SaveAttendance>,
) -> Response {
    let result = request
        .status
        .parse::<AttendanceStatus>()
        .and_then(|status| {
            attendance::save_individual(
                &state.db,
                &current.permissions,
                &request.sabha_id,
                &request.devotee_id,
                status,
                &request.notes,
            )
        })
        .map(|_| Json(json!({ "success": true, "message": "Attendance saved" })).into_response());
    respond_json(result)
}

/// Send absence notices for a sabha.
pub async fn notify_absentees(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    let back = format!("/sabhas/{}/attendance", id);
    let sabha = match visible_sabha(&state.db, &current.permissions, &id) {
        Ok(sabha) => sabha,
        Err(e) => return respond(Err(e), "/sabhas"),
    };

    let db = Arc::clone(&state.db);
    let notifier = Arc::clone(&state.notifier);
    let sender = current.user.username.clone();
    let result = tokio::task::spawn_blocking(move || {
        mailer::notify_absentees(&db, notifier.as_ref(), &sabha, &sender)
    })
    .await
    .map_err(|e| AttendanceError::Notify(format!("notification worker failed: {}", e)))
    .and_then(|sent| sent)
    .map(|(sent, failed)| {
        success(
            &back,
            &format!("Sent {} absence notices ({} failed).", sent, failed),
        )
    });
    respond(result, &back)
}
