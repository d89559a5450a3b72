//! Devotee upload: validate a file, park the rows on the session and
//! import them round by round as the page polls.

use axum::{
    extract::{Multipart, Query, State},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::{page, sabha_options, today, AppState, SharedState};
use crate::batch::{process_round, UploadJob};
use crate::error::{AttendanceError, Result};
use crate::loader::{self, ImportOutcome};
use crate::login::{CurrentUser, Flash, RoundStart};
use crate::models::SabhaType;

const IN_PROGRESS: &str = "Upload already in progress. Please wait for completion.";
const ROUND_RUNNING: &str = "A batch is already being processed.";

fn render(state: &AppState, current: &CurrentUser, flash: &Flash, data: Value) -> Response {
    let mut data = data;
    if let Value::Object(map) = &mut data {
        map.insert(
            "sabha_types".to_string(),
            json!(sabha_options(&current.permissions.allowed, &[])),
        );
    }
    let context = page(current, flash, data);
    match state.views.render("upload", &context) {
        Ok(html) => html.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn upload_page(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    match state.sessions.upload_total(&current.token) {
        Some(total) => render(
            &state,
            &current,
            &flash,
            json!({ "show_progress": true, "total_records": total }),
        ),
        None => render(&state, &current, &flash, json!({})),
    }
}

/// The uploaded file and the optional sabha type to keep.
struct UploadForm {
    file_name: String,
    bytes: Vec<u8>,
    filter: Option<SabhaType>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut file = None;
        let mut filter = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AttendanceError::invalid(format!("Malformed upload: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "excel_file" | "file" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AttendanceError::invalid(format!("Malformed upload: {}", e)))?;
                    file = Some((file_name, bytes.to_vec()));
                }
                "sabha_type_filter" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AttendanceError::invalid(format!("Malformed upload: {}", e)))?;
                    filter = match text.trim() {
                        "" => None,
                        raw => Some(raw.parse::<SabhaType>()?),
                    };
                }
                _ => {}
            }
        }

        let (file_name, bytes) = file
            .filter(|(_, bytes)| !bytes.is_empty())
            .ok_or_else(|| AttendanceError::invalid("Please choose a file to upload."))?;
        Ok(UploadForm {
            file_name,
            bytes,
            filter,
        })
    }
}

/// Check the file and, if every row is valid, start an import job.
pub async fn upload_devotees(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    multipart: Multipart,
) -> Response {
    let flash = Flash::default();
    if let Some(total) = state.sessions.upload_total(&current.token) {
        return in_progress(&state, &current, total);
    }

    let outcome = match read_and_parse(&current, multipart).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::warn!("Upload by {} rejected: {}", current.user.username, e);
            let failed = Flash {
                msg: None,
                error: Some(e.to_string()),
            };
            return render(&state, &current, &failed, json!({}));
        }
    };

    if !outcome.is_clean() {
        let valid_count = outcome.valid_rows.len();
        let error_count = outcome.errors.len();
        return render(
            &state,
            &current,
            &flash,
            json!({
                "errors": outcome.errors,
                "total_rows": valid_count + error_count,
                "valid_count": valid_count,
                "error_count": error_count,
            }),
        );
    }

    let total = outcome.valid_rows.len();
    if !state
        .sessions
        .set_upload(&current.token, UploadJob::new(outcome.valid_rows))
    {
        let running = state.sessions.upload_total(&current.token).unwrap_or(total);
        return in_progress(&state, &current, running);
    }
    log::info!(
        "{} started an import of {} devotees",
        current.user.username,
        total
    );
    render(
        &state,
        &current,
        &flash,
        json!({ "show_progress": true, "total_records": total }),
    )
}

fn in_progress(state: &AppState, current: &CurrentUser, total: usize) -> Response {
    let warning = Flash {
        msg: None,
        error: Some(IN_PROGRESS.to_string()),
    };
    render(
        state,
        current,
        &warning,
        json!({ "show_progress": true, "total_records": total }),
    )
}

async fn read_and_parse(current: &CurrentUser, multipart: Multipart) -> Result<ImportOutcome> {
    let form = UploadForm::read(multipart).await?;
    let UploadForm {
        file_name,
        bytes,
        filter,
    } = form;
    let outcome = tokio::task::spawn_blocking(move || {
        loader::parse_upload(&file_name, &bytes, filter, today())
    })
    .await
    .map_err(|e| AttendanceError::Import(format!("Error processing file: {}", e)))??;

    if let Some(row) = outcome
        .valid_rows
        .iter()
        .find(|row| !current.permissions.can_view(row.sabha_type))
    {
        return Err(AttendanceError::denied(format!(
            "You do not have permission to import devotees for {}.",
            row.sabha_type.display()
        )));
    }
    Ok(outcome)
}

/// Run the next round of the session's import job.
pub async fn process_batch(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
) -> Response {
    let mut job = match state.sessions.begin_round(&current.token) {
        RoundStart::Ready(job) => job,
        RoundStart::Busy => return Json(json!({ "error": ROUND_RUNNING })).into_response(),
        RoundStart::NoJob => {
            return Json(json!({ "error": "No upload data found" })).into_response()
        }
    };

    let progress = process_round(
        Arc::clone(&state.db),
        &mut job,
        state.config.batch_size,
        state.config.workers,
    )
    .await;

    if progress.complete {
        log::info!(
            "Import for {} finished: {} created, {} updated",
            current.user.username,
            progress.created,
            progress.updated
        );
        state.sessions.end_round(&current.token, None);
    } else {
        state.sessions.end_round(&current.token, Some(job));
    }
    Json(progress).into_response()
}

pub async fn cancel_upload(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
) -> Json<Value> {
    if state.sessions.cancel_upload(&current.token) {
        log::info!("{} cancelled an import", current.user.username);
    }
    Json(json!({ "success": true }))
}
