use billet_models::AttendeeError;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Event,
    TicketType,
    Reservation,
    Booking,
    Code,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Event => write!(f, "event"),
            Entity::TicketType => write!(f, "ticket type"),
            Entity::Reservation => write!(f, "reservation"),
            Entity::Booking => write!(f, "booking"),
            Entity::Code => write!(f, "code"),
        }
    }
}

/// Every way a reservation-side operation can fail. Outcomes that had no new
/// effect (already cancelled, already redeemed) are not errors; they are
/// reported through `CancellationResult` and `CheckInResult`.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("{requested} ticket(s) requested but only {remaining} left")]
    CapacityExhausted { requested: i64, remaining: i64 },

    #[error("{requested} ticket(s) requested, limit is {max_per_person} per person")]
    LimitExceeded { requested: i64, max_per_person: i64 },

    #[error("{email} already holds a valid reservation for this ticket type")]
    DuplicateAttendee { email: String },

    #[error("reservations closed at event start ({starts_at})")]
    EventClosed { starts_at: DateTime<Utc> },

    #[error("attendee #{index}: {source}")]
    InvalidAttendeeData {
        index: usize,
        #[source]
        source: AttendeeError,
    },

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("{0} not found")]
    NotFound(Entity),

    #[error("reservation belongs to another user")]
    NotOwner,

    #[error("this event does not allow cancellation")]
    CancellationNotAllowed { policy: Option<String> },

    #[error("no unique code found after {0} attempts")]
    CodeSpaceExhausted(u32),

    #[error("store invariant violated: {0}")]
    Inconsistent(String),

    #[error("timed out waiting for the store")]
    Timeout,

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),
}

impl ReservationError {
    /// Infrastructure failures worth retrying after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReservationError::Timeout
                | ReservationError::StoreUnavailable(_)
                | ReservationError::CodeSpaceExhausted(_)
        )
    }
}

impl From<sqlx::Error> for ReservationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => ReservationError::Timeout,
            sqlx::Error::Database(ref db) if db.message().contains("database is locked") => {
                ReservationError::Timeout
            }
            other => ReservationError::StoreUnavailable(other),
        }
    }
}

/// Which unique index rejected an insert into `reservations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UniqueViolation {
    Code,
    ValidAttendee,
}

pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<UniqueViolation> {
    let sqlx::Error::Database(db) = err else {
        return None;
    };
    if !db.is_unique_violation() {
        return None;
    }
    if db.message().contains("reservations.code") {
        Some(UniqueViolation::Code)
    } else if db.message().contains("reservations.attendee_email") {
        Some(UniqueViolation::ValidAttendee)
    } else {
        None
    }
}
