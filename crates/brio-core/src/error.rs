//! Core error type for the Brio engine.
//!
//! `EngineError` is used throughout the core domain (stores, engine,
//! dispatcher). When the `axum` feature is enabled, it also implements
//! `IntoResponse` so it can be used directly as an axum handler error type.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("A workflow is already running for campaign {0}")]
    AlreadyRunning(String),

    #[error("Workflow {0} is not awaiting approval")]
    NotAwaitingApproval(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Map a rusqlite error, surfacing uniqueness violations as `Conflict`
    /// (checkpoint versions, phase attempts).
    pub fn from_sqlite(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref code, _) = e {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return EngineError::Conflict(e.to_string());
            }
        }
        EngineError::Database(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for EngineError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let message = self.to_string();
        let status = match &self {
            EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::Conflict(_)
            | EngineError::AlreadyRunning(_)
            | EngineError::NotAwaitingApproval(_) => StatusCode::CONFLICT,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
