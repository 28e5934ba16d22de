use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat_relay_wire::ErrorBody;
use thiserror::Error;

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Database errors ──────────────────────────────────────────────────────
    #[error("Database connection failed: {0}")]
    DatabaseConnectionFailed(#[source] sqlx::Error),

    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    // ── Lookup errors ────────────────────────────────────────────────────────
    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: i64 },

    // ── Upstream generation errors ───────────────────────────────────────────
    #[error("Upstream returned {status}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Upstream transport error: {0}")]
    UpstreamTransport(#[source] reqwest::Error),

    #[error("Upstream sent nothing for {timeout:?}")]
    UpstreamIdle { timeout: std::time::Duration },

    #[error("Upstream payload could not be read: {message}")]
    UpstreamPayload { message: String },

    #[error("Generation cancelled")]
    Cancelled,

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    #[error("Role must be 'user' or 'assistant' (got '{role}')")]
    InvalidRole { role: String },

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Missing configuration value {key}")]
    MissingConfig { key: String },

    #[error("Invalid configuration value {key}: {message}")]
    InvalidConfig { key: String, message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn empty_field(field_name: &str) -> Self {
        AppError::EmptyField { field_name: field_name.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ConversationNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. } | AppError::FieldTooLong { .. } | AppError::InvalidRole { .. }
        )
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamStatus { .. }
                | AppError::UpstreamTransport(_)
                | AppError::UpstreamIdle { .. }
                | AppError::UpstreamPayload { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_upstream() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    /// Short summary for the `error` field; the display text goes to `details`.
    fn summary(&self) -> &'static str {
        if self.is_validation() {
            "Invalid request"
        } else if self.is_not_found() {
            "Not found"
        } else if self.is_upstream() {
            "AI chat failed"
        } else {
            "Internal server error"
        }
    }

    /// Upstream bodies can be large and may echo credentials; keep only the
    /// status in anything shown to a client.
    pub fn client_message(&self) -> String {
        match self {
            AppError::UpstreamStatus { status, .. } => format!("Upstream API call failed ({status})"),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.summary().to_string(),
            details: Some(self.client_message()),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(AppError::empty_field("message").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::ConversationNotFound { id: 3 }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::UpstreamStatus { status: 401, body: "nope".into() }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Unexpected("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_body_is_not_leaked() {
        let err = AppError::UpstreamStatus { status: 500, body: "secret detail".into() };
        assert_eq!(err.client_message(), "Upstream API call failed (500)");
    }
}
