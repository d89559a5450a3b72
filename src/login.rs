//! Users, passwords and login sessions.
//!
//! Users live in the store's `users` collection. Sessions are kept in memory
//! only, keyed by a random token that travels in the `session` cookie, and
//! also carry any devotee upload the user has in progress.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::batch::UploadJob;
use crate::database::Database;
use crate::error::{AttendanceError, Result};
use crate::models::{new_id, AdminUser, SabhaType};

#[cfg(feature = "web")]
use crate::access::Permissions;
#[cfg(feature = "web")]
use crate::app::SharedState;
#[cfg(feature = "web")]
use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

/// Name of the cookie holding the session token.
pub const SESSION_COOKIE: &str = "session";

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AttendanceError::Auth(format!("password hashing failed: {}", e)))
}

/// Check a password against a stored hash.
///
/// # Returns
/// * `Ok(true)` on a match, `Ok(false)` on a mismatch
///
/// # Errors
/// * `AttendanceError::Auth` if the stored hash is malformed
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|_| AttendanceError::Auth("invalid password hash format".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// The active user with these credentials, if any.
pub fn authenticate(db: &Database, username: &str, password: &str) -> Result<Option<AdminUser>> {
    let Some(user) = db.find_user_by_username(username.trim())? else {
        return Ok(None);
    };
    if verify_password(password, &user.password_hash)? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Fields of a user being created from the admin panel or the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub allowed_sabha_types: Vec<SabhaType>,
    pub is_admin: bool,
    pub can_delete: bool,
}

pub fn create_user(db: &Database, new: NewUser) -> Result<AdminUser> {
    let username = new.username.trim();
    if username.is_empty() || new.password.is_empty() {
        return Err(AttendanceError::invalid("Username and password are required."));
    }

    let user = AdminUser {
        id: new_id(),
        username: username.to_string(),
        email: new.email.trim().to_string(),
        password_hash: hash_password(&new.password)?,
        allowed_sabha_types: new.allowed_sabha_types,
        is_admin: new.is_admin,
        can_delete: new.can_delete,
        created_at: Utc::now(),
        is_active: true,
    };
    let user = db.insert_user(user)?;
    log::info!("Created user {}", user.username);
    Ok(user)
}

/// Partial update of a user; `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub allowed_sabha_types: Option<Vec<SabhaType>>,
    pub is_admin: Option<bool>,
    pub can_delete: Option<bool>,
    /// A new password; empty strings are ignored.
    pub password: Option<String>,
}

pub fn update_user(db: &Database, id: &str, update: UserUpdate) -> Result<AdminUser> {
    let mut user = db.get_user(id)?;
    if let Some(email) = update.email {
        user.email = email.trim().to_string();
    }
    if let Some(types) = update.allowed_sabha_types {
        user.allowed_sabha_types = types;
    }
    if let Some(is_admin) = update.is_admin {
        user.is_admin = is_admin;
    }
    if let Some(can_delete) = update.can_delete {
        user.can_delete = can_delete;
    }
    if let Some(password) = update.password.filter(|p| !p.is_empty()) {
        user.password_hash = hash_password(&password)?;
    }
    db.update_user(user)
}

pub fn delete_user(db: &Database, id: &str) -> Result<AdminUser> {
    let user = db.delete_user(id)?;
    log::info!("Deleted user {}", user.username);
    Ok(user)
}

/// Create an administrator with every sabha type unless the username is
/// taken. Returns the user and whether it was created.
pub fn ensure_admin(
    db: &Database,
    username: &str,
    email: &str,
    password: &str,
) -> Result<(AdminUser, bool)> {
    if let Some(existing) = db.find_user_by_username(username)? {
        return Ok((existing, false));
    }
    let user = create_user(
        db,
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            allowed_sabha_types: SabhaType::ALL.to_vec(),
            is_admin: true,
            can_delete: true,
        },
    )?;
    Ok((user, true))
}

/// Where a session's devotee import stands.
#[derive(Debug, Clone, Default)]
pub enum UploadSlot {
    #[default]
    Idle,
    /// Waiting for the next batch poll.
    Parked(UploadJob),
    /// Taken out for a round; holds the job's row count.
    Running(usize),
}

/// Result of asking for the next import round.
#[derive(Debug)]
pub enum RoundStart {
    Ready(UploadJob),
    Busy,
    NoJob,
}

/// An authenticated browser session.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub expires_at: SystemTime,
    pub upload: UploadSlot,
}

/// In-memory session table.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a session for `username` and return its token.
    ///
    /// Expired sessions of every user are swept out first.
    pub fn create(&self, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let session = Session {
            username: username.to_string(),
            expires_at: now + self.ttl,
            upload: UploadSlot::Idle,
        };

        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        if sessions.len() < before {
            log::debug!("Swept {} expired sessions", before - sessions.len());
        }
        sessions.insert(token.clone(), session);
        token
    }

    /// Number of sessions held, expired ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Username for a live session. An expired session is dropped.
    pub fn validate(&self, token: &str) -> Option<String> {
        {
            let sessions = self.read();
            match sessions.get(token) {
                None => return None,
                Some(session) if session.expires_at > SystemTime::now() => {
                    return Some(session.username.clone())
                }
                Some(_) => {}
            }
        }
        self.write().remove(token);
        None
    }

    pub fn destroy(&self, token: &str) {
        self.write().remove(token);
    }

    /// Row count of the import on a session, parked or mid-round.
    pub fn upload_total(&self, token: &str) -> Option<usize> {
        match &self.read().get(token)?.upload {
            UploadSlot::Idle => None,
            UploadSlot::Parked(job) => Some(job.total()),
            UploadSlot::Running(total) => Some(*total),
        }
    }

    /// Park a new import job on a session.
    ///
    /// Returns `false`, leaving the session alone, when there is no such
    /// session or it already has an import parked or running.
    pub fn set_upload(&self, token: &str, job: UploadJob) -> bool {
        match self.write().get_mut(token) {
            Some(session) if matches!(session.upload, UploadSlot::Idle) => {
                session.upload = UploadSlot::Parked(job);
                true
            }
            _ => false,
        }
    }

    /// Take the parked job out for a round, leaving a running marker.
    pub fn begin_round(&self, token: &str) -> RoundStart {
        let mut sessions = self.write();
        let Some(session) = sessions.get_mut(token) else {
            return RoundStart::NoJob;
        };
        match std::mem::take(&mut session.upload) {
            UploadSlot::Parked(job) => {
                session.upload = UploadSlot::Running(job.total());
                RoundStart::Ready(job)
            }
            UploadSlot::Running(total) => {
                session.upload = UploadSlot::Running(total);
                RoundStart::Busy
            }
            UploadSlot::Idle => RoundStart::NoJob,
        }
    }

    /// Close a round started by [`begin_round`](Self::begin_round). An
    /// unfinished job is parked again unless the import was cancelled
    /// meanwhile.
    pub fn end_round(&self, token: &str, unfinished: Option<UploadJob>) {
        if let Some(session) = self.write().get_mut(token) {
            if matches!(session.upload, UploadSlot::Running(_)) {
                session.upload = match unfinished {
                    Some(job) => UploadSlot::Parked(job),
                    None => UploadSlot::Idle,
                };
            }
        }
    }

    /// Drop the session's import. Returns `true` if there was one.
    pub fn cancel_upload(&self, token: &str) -> bool {
        match self.write().get_mut(token) {
            Some(session) => !matches!(
                std::mem::take(&mut session.upload),
                UploadSlot::Idle
            ),
            None => false,
        }
    }
}

/// The logged-in user, as seen by handlers behind [`require_auth`].
#[cfg(feature = "web")]
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: AdminUser,
    pub permissions: Permissions,
    pub token: String,
}

#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Flash messages carried in the query string after a redirect.
#[cfg(feature = "web")]
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Flash {
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(feature = "web")]
fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Serve the login form.
#[cfg(feature = "web")]
pub async fn serve_login_page(
    State(state): State<SharedState>,
    Query(flash): Query<Flash>,
) -> Result<Html<String>> {
    state.views.render("login", &serde_json::json!({ "flash": flash }))
}

/// Check the submitted credentials and start a session.
///
/// # Returns
/// * A redirect to the dashboard with the session cookie set, or back to the
///   login page with an error
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<SharedState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match authenticate(&state.db, &form.username, &form.password) {
        Ok(Some(user)) => {
            let token = state.sessions.create(&user.username);
            log::info!("User {} logged in", user.username);
            (jar.add(session_cookie(token)), Redirect::to("/")).into_response()
        }
        Ok(None) => Redirect::to("/login?error=Invalid+username+or+password.").into_response(),
        Err(e) => {
            log::error!("Login failed for {}: {}", form.username, e);
            Redirect::to("/login?error=Authentication+error.").into_response()
        }
    }
}

/// End the session and clear the cookie.
#[cfg(feature = "web")]
pub async fn handle_logout(State(state): State<SharedState>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.destroy(cookie.value());
    }
    let cleared = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(cleared), Redirect::to("/login?msg=You+have+been+logged+out."))
}

/// Authentication middleware.
///
/// A valid session whose user is still active gets a [`CurrentUser`] in the
/// request extensions; anything else is sent to the login page.
#[cfg(feature = "web")]
pub async fn require_auth(
    State(state): State<SharedState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let token = cookie.value();
        if let Some(username) = state.sessions.validate(token) {
            match state.db.find_user_by_username(&username) {
                Ok(Some(user)) => {
                    let permissions = Permissions::for_user(&user);
                    request.extensions_mut().insert(CurrentUser {
                        user,
                        permissions,
                        token: token.to_string(),
                    });
                    return next.run(request).await;
                }
                Ok(None) => state.sessions.destroy(token),
                Err(e) => return e.into_response(),
            }
        }
    }

    Redirect::to("/login").into_response()
}
