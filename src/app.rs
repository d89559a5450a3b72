use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::admin_panel;
use crate::database::Database;
use crate::devotee_pages;
use crate::error::{AttendanceError, Result};
use crate::login::{self, CurrentUser, Flash, SessionStore};
use crate::mailer::{LogNotifier, Notifier, SmtpNotifier, SmtpSettings};
use crate::models::SabhaType;
use crate::query::SearchType;
use crate::report_pages;
use crate::sabha_pages;
use crate::upload;
use crate::views::Views;

/// Request bodies above this are refused; photos and import files need more
/// than axum's default.
pub const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Runtime settings, filled from the command line or its env fallbacks.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub media_dir: PathBuf,
    pub bind: String,
    pub session_hours: u64,
    /// Rows per worker chunk of an import round.
    pub batch_size: usize,
    /// Chunks written concurrently per round.
    pub workers: usize,
    pub smtp: Option<SmtpSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("database"),
            media_dir: PathBuf::from("media"),
            bind: "127.0.0.1:3000".to_string(),
            session_hours: 24,
            batch_size: 25,
            workers: 4,
            smtp: None,
        }
    }
}

pub struct AppState {
    pub db: Arc<Database>,
    pub sessions: SessionStore,
    pub views: Views,
    pub config: Config,
    pub notifier: Arc<dyn Notifier>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Open the store and pick a notifier from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let db = Database::open(&config.data_dir)?;
        let notifier: Arc<dyn Notifier> = match &config.smtp {
            Some(settings) => Arc::new(SmtpNotifier::new(settings)?),
            None => Arc::new(LogNotifier),
        };
        AppState::with_parts(Arc::new(db), notifier, config)
    }

    pub fn with_parts(
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Result<Self> {
        let ttl = Duration::from_secs(config.session_hours.max(1) * 60 * 60);
        Ok(AppState {
            db,
            sessions: SessionStore::new(ttl),
            views: Views::new()?,
            config,
            notifier,
        })
    }
}

/// Build the application router.
///
/// Everything except the login pages and `/media` sits behind
/// [`login::require_auth`].
pub fn router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/", get(report_pages::dashboard))
        .route("/profile", get(report_pages::profile))
        .route("/devotees", get(devotee_pages::list_devotees))
        .route(
            "/devotees/add",
            get(devotee_pages::add_devotee_page).post(devotee_pages::add_devotee),
        )
        .route("/devotees/export.csv", get(devotee_pages::export_devotees))
        .route(
            "/devotees/upload",
            get(upload::upload_page).post(upload::upload_devotees),
        )
        .route("/devotees/upload/batch", post(upload::process_batch))
        .route("/devotees/upload/cancel", post(upload::cancel_upload))
        .route("/devotees/:id", get(devotee_pages::devotee_detail))
        .route(
            "/devotees/:id/edit",
            get(devotee_pages::edit_devotee_page).post(devotee_pages::edit_devotee),
        )
        .route(
            "/devotees/:id/delete",
            get(devotee_pages::delete_devotee_info).post(devotee_pages::delete_devotee),
        )
        .route("/sabhas", get(sabha_pages::list_sabhas))
        .route(
            "/sabhas/add",
            get(sabha_pages::add_sabha_page).post(sabha_pages::add_sabha),
        )
        .route(
            "/sabhas/:id/delete",
            get(sabha_pages::delete_sabha_info).post(sabha_pages::delete_sabha),
        )
        .route(
            "/sabhas/:id/attendance",
            get(sabha_pages::mark_attendance_page).post(sabha_pages::mark_attendance),
        )
        .route("/sabhas/:id/notify", post(sabha_pages::notify_absentees))
        .route("/attendance/save", post(sabha_pages::save_individual))
        .route("/attendance/report", get(report_pages::attendance_report))
        .route("/attendance/analytics", get(report_pages::attendance_analytics))
        .route("/attendance/export", get(report_pages::export_excel))
        .route("/attendance/export.csv", get(report_pages::export_csv))
        .route("/mandals", get(admin_panel::list_mandals))
        .route(
            "/mandals/add",
            get(admin_panel::add_mandal_page).post(admin_panel::add_mandal),
        )
        .route("/mandals/:id/delete", post(admin_panel::delete_mandal))
        .route("/admin", get(admin_panel::admin_dashboard))
        .route(
            "/admin/users/add",
            get(admin_panel::add_user_page).post(admin_panel::add_user),
        )
        .route(
            "/admin/users/:id/edit",
            get(admin_panel::edit_user_page).post(admin_panel::edit_user),
        )
        .route("/admin/users/:id/delete", post(admin_panel::delete_user))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            login::require_auth,
        ));

    Router::new()
        .route(
            "/login",
            get(login::serve_login_page).post(login::handle_login),
        )
        .route("/logout", get(login::handle_logout))
        .merge(protected)
        .nest_service("/media", ServeDir::new(&state.config.media_dir))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// Serve the application until the process is stopped.
pub async fn serve(state: SharedState) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let bind = state.config.bind.clone();
    let app = router(state);

    let listener = TcpListener::bind(&bind).await?;
    log::info!("Listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn not_found(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if is_ajax(&headers) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Not found" })),
        )
            .into_response();
    }
    let body = json!({ "flash": Flash::default() });
    match state.views.render("not_found", &body) {
        Ok(html) => (StatusCode::NOT_FOUND, html).into_response(),
        Err(e) => e.into_response(),
    }
}

/// True for requests sent by the pages' own fetch calls.
pub fn is_ajax(headers: &HeaderMap) -> bool {
    headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
}

/// Redirect to `path` with a flash message under `key` (`msg` or `error`).
pub fn flash_redirect(path: &str, key: &str, message: &str) -> Response {
    let separator = if path.contains('?') { '&' } else { '?' };
    Redirect::to(&format!(
        "{}{}{}={}",
        path,
        separator,
        key,
        urlencoding::encode(message)
    ))
    .into_response()
}

pub fn success(path: &str, message: &str) -> Response {
    flash_redirect(path, "msg", message)
}

/// Turn a page handler's result into a response. Errors a user can act on
/// are shown as a flash on `fallback`; anything else becomes an error page.
pub fn respond(result: Result<Response>, fallback: &str) -> Response {
    match result {
        Ok(response) => response,
        Err(
            e @ (AttendanceError::NotFound(_)
            | AttendanceError::PermissionDenied(_)
            | AttendanceError::Validation(_)
            | AttendanceError::Conflict(_)
            | AttendanceError::Import(_)),
        ) => {
            log::warn!("{}", e);
            flash_redirect(fallback, "error", &e.to_string())
        }
        Err(e) => e.into_response(),
    }
}

/// Same as [`respond`] for JSON endpoints: `{success: false, error}`.
pub fn respond_json(result: Result<Response>) -> Response {
    match result {
        Ok(response) => response,
        Err(e) => {
            log::warn!("{}", e);
            let status = e.status();
            (status, Json(json!({ "success": false, "error": e.to_string() }))).into_response()
        }
    }
}

/// A file download.
pub fn attachment(content_type: &str, file_name: &str, body: impl Into<axum::body::Body>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body.into(),
    )
        .into_response()
}

/// One `<option>` or checkbox in a form.
#[derive(Debug, Serialize)]
pub struct Choice {
    pub value: &'static str,
    pub label: &'static str,
    pub selected: bool,
}

/// Options for `types`, marking those in `selected`.
pub fn sabha_options(types: &[SabhaType], selected: &[SabhaType]) -> Vec<Choice> {
    types
        .iter()
        .map(|t| Choice {
            value: t.as_str(),
            label: t.display(),
            selected: selected.contains(t),
        })
        .collect()
}

pub fn search_type_options(selected: SearchType) -> Vec<Choice> {
    [
        (SearchType::Id, "Devotee ID"),
        (SearchType::Phone, "Phone"),
        (SearchType::Name, "Name"),
        (SearchType::Type, "Devotee Type"),
    ]
    .into_iter()
    .map(|(search_type, label)| Choice {
        value: search_type.as_str(),
        label,
        selected: search_type == selected,
    })
    .collect()
}

/// `search=..&search_type=..` for pagination links.
pub fn search_query(search: &str, search_type: SearchType) -> String {
    format!(
        "search={}&search_type={}",
        urlencoding::encode(search.trim()),
        search_type.as_str()
    )
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Template context shared by every page: the user, their sabha types and
/// the flash, merged with the page's own fields.
pub fn page(current: &CurrentUser, flash: &Flash, data: Value) -> Value {
    let mut context = json!({
        "user": {
            "username": current.user.username,
            "email": current.user.email,
            "is_admin": current.permissions.is_admin,
            "can_delete": current.permissions.can_delete,
        },
        "allowed_types": sabha_options(&current.permissions.allowed, &[]),
        "flash": flash,
    });
    if let (Some(context), Value::Object(extra)) = (context.as_object_mut(), data) {
        context.extend(extra);
    }
    context
}

/// 1-based page number from a query parameter; junk means page 1.
pub fn page_number(raw: Option<&str>) -> usize {
    raw.and_then(|p| p.trim().parse().ok()).unwrap_or(1)
}
