// =============================================================================
// Error taxonomy — see spec §7 ERROR HANDLING DESIGN
// =============================================================================
//
// `SimError` is the one error type every public engine function returns.
// `LlmError` lives in `llm_adapter` and never escapes that module — it is
// always downgraded to a neutral HOLD proposal before crossing back out.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("validation error on field `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("illegal state: {message}")]
    State { message: String },

    #[error("sector {sector_id} already has an active discussion")]
    Contention { sector_id: String },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl SimError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn contention(sector_id: impl Into<String>) -> Self {
        Self::Contention {
            sector_id: sector_id.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::State { .. } => StatusCode::BAD_REQUEST,
            Self::Contention { .. } => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// The uniform `{success, error?, reason?}` envelope every API response uses
/// (spec §7 "User-visible failures").
#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    reason: String,
}

impl IntoResponse for SimError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            success: false,
            error: format!("{self}"),
            reason: match &self {
                Self::Validation { field, .. } => field.clone(),
                Self::Contention { sector_id } => sector_id.clone(),
                Self::NotFound { id, .. } => id.clone(),
                Self::State { .. } | Self::Storage(_) => String::new(),
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type SimResult<T> = Result<T, SimError>;
