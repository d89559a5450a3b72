//! Devotee pages: list, detail, add, edit, delete and the CSV export.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::app::{
    attachment, is_ajax, page, page_number, respond, respond_json, sabha_options, search_query,
    search_type_options, success, today, AppState, Choice, SharedState,
};
use crate::attendance::{self, visible_devotee};
use crate::downloader::devotees_csv;
use crate::error::{AttendanceError, Result};
use crate::loader::validate_phone;
use crate::login::{CurrentUser, Flash};
use crate::models::{Devotee, DevoteeInput, DevoteeType, Gender, SabhaType};
use crate::photos::{self, StagedPhoto};
use crate::query::{Page, SearchType, DEVOTEES_PER_PAGE};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub search: String,
    pub search_type: Option<String>,
    pub page: Option<String>,
}

/// A devotee as shown in lists and returned to AJAX callers.
#[derive(Debug, Serialize)]
pub struct DevoteeRow {
    pub id: String,
    pub devotee_id: String,
    pub name: String,
    pub contact_number: String,
    pub sabha_type_display: &'static str,
    pub devotee_type: &'static str,
    pub join_date: NaiveDate,
    pub photo_url: String,
}

impl From<Devotee> for DevoteeRow {
    fn from(d: Devotee) -> Self {
        DevoteeRow {
            photo_url: photos::photo_src(&d),
            sabha_type_display: d.sabha_type.display(),
            devotee_type: d.devotee_type.as_str(),
            id: d.id,
            devotee_id: d.devotee_id,
            name: d.name,
            contact_number: d.contact_number,
            join_date: d.join_date,
        }
    }
}

pub async fn list_devotees(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
    Query(flash): Query<Flash>,
) -> Response {
    respond(list(&state, &current, &headers, &query, &flash), "/")
}

fn list(
    state: &AppState,
    current: &CurrentUser,
    headers: &HeaderMap,
    query: &ListQuery,
    flash: &Flash,
) -> Result<Response> {
    current.permissions.require_any()?;
    let search_type = SearchType::parse(query.search_type.as_deref());
    let devotees = attendance::find_devotees(
        &state.db,
        &current.permissions.allowed,
        &query.search,
        search_type,
    )?;
    let number = page_number(query.page.as_deref());
    let devotees = Page::paginate(devotees, number, DEVOTEES_PER_PAGE).map(DevoteeRow::from);

    if is_ajax(headers) {
        return Ok(Json(json!({
            "devotees": devotees.items,
            "total_count": devotees.total_count,
            "current_page": devotees.number,
            "total_pages": devotees.total_pages,
            "has_previous": devotees.has_previous,
            "has_next": devotees.has_next,
        }))
        .into_response());
    }

    let context = page(
        current,
        flash,
        json!({
            "devotees": devotees,
            "search": query.search,
            "search_types": search_type_options(search_type),
            "query": search_query(&query.search, search_type),
        }),
    );
    Ok(state.views.render("devotee_list", &context)?.into_response())
}

pub async fn devotee_detail(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(flash): Query<Flash>,
) -> Response {
    respond(detail(&state, &current, &id, &flash), "/devotees")
}

fn detail(state: &AppState, current: &CurrentUser, id: &str, flash: &Flash) -> Result<Response> {
    let devotee = visible_devotee(&state.db, &current.permissions, id)?;
    let history = attendance::devotee_history(&state.db, &devotee)?;
    let context = page(
        current,
        flash,
        json!({
            "photo": photos::photo_src(&devotee),
            "sabha_type_display": devotee.sabha_type.display(),
            "devotee": devotee,
            "history": history,
        }),
    );
    Ok(state.views.render("devotee_detail", &context)?.into_response())
}

pub async fn add_devotee_page(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = current.permissions.require_any().and_then(|()| {
        let context = form_context(&current, &flash, None, "/devotees/add");
        Ok(state.views.render("devotee_form", &context)?.into_response())
    });
    respond(result, "/devotees")
}

pub async fn add_devotee(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    multipart: Multipart,
) -> Response {
    respond(create(&state, &current, multipart).await, "/devotees/add")
}

async fn create(state: &AppState, current: &CurrentUser, multipart: Multipart) -> Result<Response> {
    let mut submission = DevoteeSubmission::read(multipart).await?;
    let mut input = submission.to_input(today())?;
    current.permissions.require_view(input.sabha_type)?;

    let staged = match submission.photo_bytes()? {
        Some(bytes) => Some(stage_photo(state, &input, bytes).await?),
        None => None,
    };
    input.photo_url = staged.as_ref().map(|photo| photo.url().to_string());
    let devotee = state.db.insert_devotee(input)?;
    commit_photo(staged, &devotee.devotee_id);
    log::info!(
        "{} added devotee {}",
        current.user.username,
        devotee.devotee_id
    );
    Ok(success("/devotees", "Devotee added successfully!"))
}

pub async fn edit_devotee_page(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = visible_devotee(&state.db, &current.permissions, &id).and_then(|devotee| {
        let action = format!("/devotees/{}/edit", devotee.id);
        let context = form_context(&current, &flash, Some(&devotee), &action);
        Ok(state.views.render("devotee_form", &context)?.into_response())
    });
    respond(result, "/devotees")
}

pub async fn edit_devotee(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Response {
    let fallback = format!("/devotees/{}/edit", id);
    respond(update(&state, &current, &id, multipart).await, &fallback)
}

async fn update(
    state: &AppState,
    current: &CurrentUser,
    id: &str,
    multipart: Multipart,
) -> Result<Response> {
    let existing = visible_devotee(&state.db, &current.permissions, id)?;
    let mut submission = DevoteeSubmission::read(multipart).await?;
    let mut input = submission.to_input(existing.join_date)?;
    current.permissions.require_view(input.sabha_type)?;

    let staged = match submission.photo_bytes()? {
        Some(bytes) => Some(stage_photo(state, &input, bytes).await?),
        None => None,
    };
    input.photo_url = match &staged {
        Some(photo) => Some(photo.url().to_string()),
        None => existing.photo_url,
    };
    let devotee = state.db.update_devotee(id, input)?;
    commit_photo(staged, &devotee.devotee_id);
    log::info!(
        "{} updated devotee {}",
        current.user.username,
        devotee.devotee_id
    );
    Ok(success(
        &format!("/devotees/{}", devotee.id),
        "Devotee updated successfully!",
    ))
}

/// Name and printed id for the delete confirmation dialog.
pub async fn delete_devotee_info(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    respond_json(
        visible_devotee(&state.db, &current.permissions, &id).map(|devotee| {
            Json(json!({
                "success": true,
                "name": devotee.name,
                "devotee_id": devotee.devotee_id,
            }))
            .into_response()
        }),
    )
}

/// Delete a devotee and their attendance records.
pub async fn delete_devotee(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    let result = current.permissions.require_delete().and_then(|()| {
        let devotee = visible_devotee(&state.db, &current.permissions, &id)?;
        state.db.delete_devotee(&devotee.id)?;
        log::info!(
            "{} deleted devotee {}",
            current.user.username,
            devotee.devotee_id
        );
        Ok(success(
            "/devotees",
            &format!("Devotee {} deleted successfully!", devotee.name),
        ))
    });
    respond(result, "/devotees")
}

/// Every visible devotee in the importer's column layout.
pub async fn export_devotees(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
) -> Response {
    let result = attendance::find_devotees(
        &state.db,
        &current.permissions.allowed,
        "",
        SearchType::Id,
    )
    .map(|devotees| attachment("text/csv; charset=utf-8", "devotees.csv", devotees_csv(&devotees)));
    respond(result, "/devotees")
}

/// Text fields and the uploaded photo of a devotee form.
#[derive(Debug, Default)]
struct DevoteeSubmission {
    fields: HashMap<String, String>,
    photo: Option<Vec<u8>>,
}

impl DevoteeSubmission {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut submission = DevoteeSubmission::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AttendanceError::invalid(format!("Malformed form data: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "photo" {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AttendanceError::invalid(format!("Photo upload failed: {}", e)))?;
                if !bytes.is_empty() {
                    submission.photo = Some(bytes.to_vec());
                }
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AttendanceError::invalid(format!("Malformed form data: {}", e)))?;
                submission.fields.insert(name, text);
            }
        }
        Ok(submission)
    }

    fn field(&self, name: &str) -> &str {
        self.fields.get(name).map_or("", |value| value.trim())
    }

    fn to_input(&self, default_join_date: NaiveDate) -> Result<DevoteeInput> {
        let name = self.field("name");
        if name.is_empty() {
            return Err(AttendanceError::invalid("Name is required."));
        }
        let contact_number =
            validate_phone(self.field("contact_number")).map_err(AttendanceError::Validation)?;
        let sabha_type = match self.field("sabha_type") {
            "" => return Err(AttendanceError::invalid("Sabha type is required.")),
            raw => raw.parse::<SabhaType>()?,
        };
        let devotee_type = match self.field("devotee_type") {
            "" => DevoteeType::default(),
            raw => raw.parse::<DevoteeType>()?,
        };
        let gender = match self.field("gender") {
            "" => None,
            raw => Some(raw.parse::<Gender>()?),
        };
        let age = match self.field("age") {
            "" => None,
            raw => Some(
                raw.parse::<u32>()
                    .map_err(|_| AttendanceError::invalid("Age must be a whole number."))?,
            ),
        };

        Ok(DevoteeInput {
            devotee_id: self.field("devotee_id").to_string(),
            devotee_type,
            name: name.to_string(),
            contact_number,
            date_of_birth: optional_date(self.field("date_of_birth"))?,
            gender,
            age,
            sabha_type,
            address_line: self.field("address_line").to_string(),
            landmark: self.field("landmark").to_string(),
            zone: self.field("zone").to_string(),
            join_date: optional_date(self.field("join_date"))?.unwrap_or(default_join_date),
            photo_url: None,
        })
    }

    /// The cropped photo from the browser wins over the raw file.
    fn photo_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        match self.field("cropped_photo") {
            "" => Ok(self.photo.take()),
            data_url => photos::decode_data_url(data_url).map(Some),
        }
    }
}

fn optional_date(raw: &str) -> Result<Option<NaiveDate>> {
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AttendanceError::invalid(format!("Invalid date: {}", raw)))
}

/// Decode and resize a photo off the async runtime. The file only takes its
/// public name once [`commit_photo`] runs after the store write.
async fn stage_photo(
    state: &AppState,
    input: &DevoteeInput,
    bytes: Vec<u8>,
) -> Result<StagedPhoto> {
    let media_dir = state.config.media_dir.clone();
    let name = input.name.clone();
    let phone = input.contact_number.clone();
    tokio::task::spawn_blocking(move || photos::stage_photo(&media_dir, &name, &phone, &bytes))
        .await
        .map_err(|e| AttendanceError::Storage(format!("photo worker failed: {}", e)))?
}

fn commit_photo(staged: Option<StagedPhoto>, devotee_id: &str) {
    if let Some(photo) = staged {
        if let Err(e) = photo.commit() {
            log::error!("Photo for devotee {} was not stored: {}", devotee_id, e);
        }
    }
}

fn devotee_type_options(selected: DevoteeType) -> Vec<Choice> {
    [
        (DevoteeType::Haribhakt, "Haribhakt"),
        (DevoteeType::Gunbhavi, "Gunbhavi"),
        (DevoteeType::Karyakar, "Karyakar"),
    ]
    .into_iter()
    .map(|(t, label)| Choice {
        value: t.as_str(),
        label,
        selected: t == selected,
    })
    .collect()
}

fn gender_options(selected: Option<Gender>) -> Vec<Choice> {
    [(Gender::Male, "Male"), (Gender::Female, "Female")]
        .into_iter()
        .map(|(g, label)| Choice {
            value: g.as_str(),
            label,
            selected: Some(g) == selected,
        })
        .collect()
}

fn form_context(
    current: &CurrentUser,
    flash: &Flash,
    devotee: Option<&Devotee>,
    action: &str,
) -> serde_json::Value {
    let selected_type: Vec<SabhaType> = devotee.map(|d| d.sabha_type).into_iter().collect();
    let title = if devotee.is_some() {
        "Edit Devotee"
    } else {
        "Add Devotee"
    };
    page(
        current,
        flash,
        json!({
            "title": title,
            "action": action,
            "devotee": devotee,
            "photo": devotee.map(photos::photo_src),
            "today": today(),
            "sabha_types": sabha_options(&current.permissions.allowed, &selected_type),
            "devotee_types": devotee_type_options(devotee.map(|d| d.devotee_type).unwrap_or_default()),
            "genders": gender_options(devotee.and_then(|d| d.gender)),
        }),
    )
}
