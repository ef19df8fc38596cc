use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use billet_db::{Entity, ReservationError};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error("missing or empty x-user-id header")]
    MissingIdentity,
}

#[derive(Serialize)]
struct ApiErrorBody {
    code: &'static str,
    message: String,
    retryable: bool,
    details: Option<Value>,
}

#[derive(Serialize)]
struct ApiErrorResponse {
    success: bool,
    error: ApiErrorBody,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        let ApiError::Reservation(err) = self else {
            return StatusCode::UNAUTHORIZED;
        };
        match err {
            ReservationError::CapacityExhausted { .. } => StatusCode::CONFLICT,
            ReservationError::LimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ReservationError::DuplicateAttendee { .. } => StatusCode::CONFLICT,
            ReservationError::EventClosed { .. } => StatusCode::GONE,
            ReservationError::InvalidAttendeeData { .. } => StatusCode::BAD_REQUEST,
            ReservationError::InvalidDefinition(_) => StatusCode::BAD_REQUEST,
            ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
            ReservationError::NotOwner => StatusCode::FORBIDDEN,
            ReservationError::CancellationNotAllowed { .. } => StatusCode::CONFLICT,
            ReservationError::CodeSpaceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            ReservationError::Inconsistent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ReservationError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ReservationError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        let ApiError::Reservation(err) = self else {
            return "MISSING_IDENTITY";
        };
        match err {
            ReservationError::CapacityExhausted { .. } => "CAPACITY_EXHAUSTED",
            ReservationError::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            ReservationError::DuplicateAttendee { .. } => "DUPLICATE_ATTENDEE",
            ReservationError::EventClosed { .. } => "EVENT_CLOSED",
            ReservationError::InvalidAttendeeData { .. } => "INVALID_ATTENDEE_DATA",
            ReservationError::InvalidDefinition(_) => "INVALID_DEFINITION",
            ReservationError::NotFound(_) => "NOT_FOUND",
            ReservationError::NotOwner => "NOT_OWNER",
            ReservationError::CancellationNotAllowed { .. } => "CANCELLATION_NOT_ALLOWED",
            ReservationError::CodeSpaceExhausted(_) => "CODE_SPACE_EXHAUSTED",
            ReservationError::Inconsistent(_) => "INTERNAL_ERROR",
            ReservationError::Timeout => "TIMEOUT",
            ReservationError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }

    fn details(&self) -> Option<Value> {
        let ApiError::Reservation(err) = self else {
            return None;
        };
        match err {
            ReservationError::CapacityExhausted { requested, remaining } => {
                Some(json!({ "requested": requested, "remaining": remaining }))
            }
            ReservationError::LimitExceeded { requested, max_per_person } => {
                Some(json!({ "requested": requested, "max_per_person": max_per_person }))
            }
            ReservationError::DuplicateAttendee { email } => Some(json!({ "email": email })),
            ReservationError::EventClosed { starts_at } => Some(json!({ "starts_at": starts_at })),
            ReservationError::InvalidAttendeeData { index, .. } => Some(json!({ "index": index })),
            ReservationError::CancellationNotAllowed { policy } => Some(json!({ "policy": policy })),
            ReservationError::NotFound(entity) => Some(json!({ "entity": entity_name(*entity) })),
            _ => None,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Reservation(ReservationError::StoreUnavailable(_)) => {
                "The ticket store is unavailable, check reservation status before retrying".to_string()
            }
            ApiError::Reservation(ReservationError::Inconsistent(_)) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self {
            ApiError::Reservation(
                err @ (ReservationError::StoreUnavailable(_)
                | ReservationError::Inconsistent(_)
                | ReservationError::Timeout
                | ReservationError::CodeSpaceExhausted(_)),
            ) => {
                error!(error = ?err, "Request failed in the store");
            }
            other => {
                warn!(code = other.code(), message = %other, "Request refused");
            }
        }
    }
}

fn entity_name(entity: Entity) -> &'static str {
    match entity {
        Entity::Event => "event",
        Entity::TicketType => "ticket_type",
        Entity::Reservation => "reservation",
        Entity::Booking => "booking",
        Entity::Code => "code",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let retryable = matches!(&self, ApiError::Reservation(e) if e.is_retryable());
        let body = ApiErrorResponse {
            success: false,
            error: ApiErrorBody {
                code: self.code(),
                message: self.public_message(),
                retryable,
                details: self.details(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sold_out_is_a_conflict_with_remaining_count() {
        let err = ApiError::from(ReservationError::CapacityExhausted { requested: 3, remaining: 1 });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CAPACITY_EXHAUSTED");
        assert_eq!(err.details().unwrap()["remaining"], 1);
    }

    #[test]
    fn store_errors_are_retryable_and_opaque() {
        let err = ApiError::from(ReservationError::StoreUnavailable(sqlx::Error::PoolClosed));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("closed"));

        let err = ApiError::from(ReservationError::from(sqlx::Error::PoolTimedOut));
        assert_eq!(err.code(), "TIMEOUT");
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn each_refusal_has_its_own_code() {
        let errors = [
            ApiError::from(ReservationError::LimitExceeded { requested: 3, max_per_person: 2 }),
            ApiError::from(ReservationError::DuplicateAttendee { email: "a@b.fr".into() }),
            ApiError::from(ReservationError::EventClosed { starts_at: chrono::Utc::now() }),
            ApiError::from(ReservationError::NotFound(Entity::Code)),
            ApiError::from(ReservationError::NotOwner),
            ApiError::MissingIdentity,
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(ApiError::code).collect();
        assert_eq!(codes.len(), errors.len());
    }
}
