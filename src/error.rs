use thiserror::Error;

/// Errors raised by the attendance store, importers and web layer.
#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Import(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("template error: {0}")]
    Template(String),
}

pub type Result<T> = std::result::Result<T, AttendanceError>;

impl AttendanceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AttendanceError::NotFound(what.into())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        AttendanceError::PermissionDenied(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        AttendanceError::Validation(message.into())
    }
}

impl From<rust_xlsxwriter::XlsxError> for AttendanceError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        AttendanceError::Export(e.to_string())
    }
}

impl From<calamine::Error> for AttendanceError {
    fn from(e: calamine::Error) -> Self {
        AttendanceError::Import(format!("Error processing file: {}", e))
    }
}

#[cfg(feature = "web")]
impl AttendanceError {
    pub fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;

        match self {
            AttendanceError::NotFound(_) => StatusCode::NOT_FOUND,
            AttendanceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AttendanceError::Validation(_) | AttendanceError::Import(_) => StatusCode::BAD_REQUEST,
            AttendanceError::Conflict(_) => StatusCode::CONFLICT,
            AttendanceError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(feature = "web")]
impl axum::response::IntoResponse for AttendanceError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        }
        (status, self.to_string()).into_response()
    }
}
