//! Administrator pages: user management and mandals.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Extension, Form,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::{page, respond, sabha_options, success, SharedState};
use crate::error::{AttendanceError, Result};
use crate::login::{self, CurrentUser, Flash, NewUser, UserUpdate};
use crate::models::{AdminUser, SabhaType};

/// A user as listed on the admin dashboard; never carries the hash.
#[derive(Debug, Serialize)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    is_admin: bool,
    can_delete: bool,
    is_active: bool,
    sabha_types: Vec<&'static str>,
    created_at: String,
}

impl From<AdminUser> for UserRow {
    fn from(u: AdminUser) -> Self {
        UserRow {
            sabha_types: u.allowed_sabha_types.iter().map(|t| t.display()).collect(),
            created_at: u.created_at.format("%Y-%m-%d").to_string(),
            id: u.id,
            username: u.username,
            email: u.email,
            is_admin: u.is_admin,
            can_delete: u.can_delete,
            is_active: u.is_active,
        }
    }
}

/// The add/edit user form. Sabha types arrive as repeated
/// `allowed_sabha_types` fields, so the body is read as raw pairs.
#[derive(Debug, Default)]
struct UserForm {
    username: String,
    email: String,
    password: String,
    allowed_sabha_types: Vec<SabhaType>,
    is_admin: bool,
    can_delete: bool,
}

impl UserForm {
    fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self> {
        let mut form = UserForm::default();
        for (key, value) in pairs {
            match key.as_str() {
                "username" => form.username = value.trim().to_string(),
                "email" => form.email = value.trim().to_string(),
                "password" => form.password = value,
                "allowed_sabha_types" => {
                    let sabha_type = value.parse::<SabhaType>()?;
                    if !form.allowed_sabha_types.contains(&sabha_type) {
                        form.allowed_sabha_types.push(sabha_type);
                    }
                }
                "is_admin" => form.is_admin = value == "on",
                "can_delete" => form.can_delete = value == "on",
                _ => {}
            }
        }
        Ok(form)
    }
}

pub async fn admin_dashboard(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = current.permissions.require_admin().and_then(|()| {
        let users = state.db.list_users()?;
        let total_users = users.len();
        let admin_users = users.iter().filter(|u| u.is_admin).count();
        let rows: Vec<UserRow> = users.into_iter().map(UserRow::from).collect();
        let context = page(
            &current,
            &flash,
            json!({
                "users": rows,
                "total_users": total_users,
                "admin_users": admin_users,
                "regular_users": total_users - admin_users,
            }),
        );
        Ok(state.views.render("admin_dashboard", &context)?.into_response())
    });
    respond(result, "/")
}

fn user_form_page(
    state: &SharedState,
    current: &CurrentUser,
    flash: &Flash,
    user: Option<&AdminUser>,
) -> Result<Response> {
    let selected = user.map_or_else(Vec::new, |u| u.allowed_sabha_types.clone());
    let action = match user {
        Some(u) => format!("/admin/users/{}/edit", u.id),
        None => "/admin/users/add".to_string(),
    };
    let title = if user.is_some() { "Edit User" } else { "Add User" };
    let context = page(
        current,
        flash,
        json!({
            "title": title,
            "action": action,
            "editing": user.is_some(),
            "account": user.map(|u| UserRow::from(u.clone())),
            "sabha_choices": sabha_options(&SabhaType::ALL, &selected),
        }),
    );
    Ok(state.views.render("user_form", &context)?.into_response())
}

pub async fn add_user_page(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = current
        .permissions
        .require_admin()
        .and_then(|()| user_form_page(&state, &current, &flash, None));
    respond(result, "/")
}

pub async fn add_user(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Response {
    let result = current.permissions.require_admin().and_then(|()| {
        let form = UserForm::from_pairs(pairs)?;
        let user = login::create_user(
            &state.db,
            NewUser {
                username: form.username,
                email: form.email,
                password: form.password,
                allowed_sabha_types: form.allowed_sabha_types,
                is_admin: form.is_admin,
                can_delete: form.can_delete,
            },
        )?;
        Ok(success(
            "/admin",
            &format!("User {} created successfully!", user.username),
        ))
    });
    respond(result, "/admin/users/add")
}

pub async fn edit_user_page(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = current.permissions.require_admin().and_then(|()| {
        let user = state.db.get_user(&id)?;
        user_form_page(&state, &current, &flash, Some(&user))
    });
    respond(result, "/admin")
}

pub async fn edit_user(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Response {
    let result = current.permissions.require_admin().and_then(|()| {
        let form = UserForm::from_pairs(pairs)?;
        let user = login::update_user(
            &state.db,
            &id,
            UserUpdate {
                email: Some(form.email),
                allowed_sabha_types: Some(form.allowed_sabha_types),
                is_admin: Some(form.is_admin),
                can_delete: Some(form.can_delete),
                password: Some(form.password),
            },
        )?;
        Ok(success(
            "/admin",
            &format!("User {} updated successfully!", user.username),
        ))
    });
    respond(result, &format!("/admin/users/{}/edit", id))
}

pub async fn delete_user(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    let result = current.permissions.require_admin().and_then(|()| {
        if id == current.user.id {
            return Err(AttendanceError::invalid("You cannot delete your own account."));
        }
        let user = login::delete_user(&state.db, &id)?;
        Ok(success(
            "/admin",
            &format!("User {} deleted successfully!", user.username),
        ))
    });
    respond(result, "/admin")
}

fn require_mandal_admin(current: &CurrentUser) -> Result<()> {
    if current.permissions.is_admin {
        Ok(())
    } else {
        Err(AttendanceError::denied(
            "You do not have permission to manage mandals.",
        ))
    }
}

pub async fn list_mandals(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = require_mandal_admin(&current).and_then(|()| {
        let mandals = state.db.list_mandals()?;
        let context = page(&current, &flash, json!({ "mandals": mandals }));
        Ok(state.views.render("mandal_list", &context)?.into_response())
    });
    respond(result, "/")
}

pub async fn add_mandal_page(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(flash): Query<Flash>,
) -> Response {
    let result = require_mandal_admin(&current).and_then(|()| {
        let context = page(&current, &flash, json!({}));
        Ok(state.views.render("mandal_form", &context)?.into_response())
    });
    respond(result, "/")
}

#[derive(Debug, Deserialize)]
pub struct MandalForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

pub async fn add_mandal(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Form(form): Form<MandalForm>,
) -> Response {
    let result = require_mandal_admin(&current).and_then(|()| {
        let mandal = state
            .db
            .insert_mandal(&form.name, &form.display_name, &current.user.username)?;
        Ok(success(
            "/mandals",
            &format!("Mandal \"{}\" added successfully!", mandal.display_name),
        ))
    });
    respond(result, "/mandals/add")
}

pub async fn delete_mandal(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    let result = require_mandal_admin(&current).and_then(|()| {
        let mandal = state.db.delete_mandal(&id)?;
        Ok(success(
            "/mandals",
            &format!("Mandal \"{}\" deleted successfully!", mandal.display_name),
        ))
    });
    respond(result, "/mandals")
}
