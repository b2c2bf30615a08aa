use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the scheduling core. `kind()` is the machine-checkable
/// discriminator carried in API envelopes; the display string is for humans.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    SalonMismatch(String),

    #[error("requested slot conflicts with an existing appointment")]
    SlotConflict,

    #[error("sync failed: {0}")]
    Sync(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BookingError {
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation",
            BookingError::NotFound(_) => "not_found",
            BookingError::Authorization(_) => "authorization",
            BookingError::SalonMismatch(_) => "salon_mismatch",
            BookingError::SlotConflict => "slot_conflict",
            BookingError::Sync(_) => "sync",
            BookingError::Database(_) => "database",
        }
    }
}

impl ResponseError for BookingError {
    fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::Authorization(_) => StatusCode::FORBIDDEN,
            BookingError::SalonMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::SlotConflict => StatusCode::CONFLICT,
            BookingError::Sync(_) => StatusCode::BAD_GATEWAY,
            BookingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Database details stay in the log, not in the envelope.
        let message = match self {
            BookingError::Database(err) => {
                log::error!("database error: {err}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "ok": false,
            "error": { "kind": self.kind(), "message": message },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(BookingError::SlotConflict.kind(), "slot_conflict");
        assert_eq!(
            BookingError::Validation("x".into()).kind(),
            "validation"
        );
        assert_eq!(BookingError::NotFound("worker".into()).kind(), "not_found");
        assert_eq!(
            BookingError::SalonMismatch("x".into()).kind(),
            "salon_mismatch"
        );
    }

    #[test]
    fn slot_conflict_maps_to_conflict_status() {
        assert_eq!(
            BookingError::SlotConflict.status_code(),
            StatusCode::CONFLICT
        );
    }
}
