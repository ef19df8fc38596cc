use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

mod attendee;

pub use attendee::{AttendeeError, AttendeeInfo, is_valid_email};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub participants_count: i64,
    pub cancellation_allowed: bool,
    pub cancellation_policy: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default = "default_cancellation_allowed")]
    pub cancellation_allowed: bool,
    pub cancellation_policy: Option<String>,
}

fn default_cancellation_allowed() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketType {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub price_cents: i64,
    pub total_capacity: i64,
    pub available: i64,
    pub max_per_person: i64,
    pub created_at: DateTime<Utc>,
}

impl TicketType {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    pub fn is_sold_out(&self) -> bool {
        self.available == 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTicketType {
    pub name: String,
    #[serde(default)]
    pub price_cents: i64,
    pub total_capacity: i64,
    #[serde(default = "default_max_per_person")]
    pub max_per_person: i64,
}

fn default_max_per_person() -> i64 {
    1
}

/// Lifecycle of a single reservation. `Valid` is the only state with outgoing
/// transitions; `Cancelled` and `Redeemed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ReservationStatus {
    Valid,
    Cancelled,
    Redeemed,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Valid)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationStatus::Valid => f.pad("valid"),
            ReservationStatus::Cancelled => f.pad("cancelled"),
            ReservationStatus::Redeemed => f.pad("redeemed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i64,
    pub booking_id: String,
    pub user_id: String,
    pub ticket_type_id: i64,
    pub event_id: i64,
    pub attendee_first_name: String,
    pub attendee_last_name: String,
    pub attendee_email: String,
    pub attendee_phone: Option<String>,
    pub code: String,
    pub status: ReservationStatus,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Timestamp of the transition into the current terminal state, if any.
    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            ReservationStatus::Valid => None,
            ReservationStatus::Cancelled => self.cancelled_at,
            ReservationStatus::Redeemed => self.redeemed_at,
        }
    }

    pub fn attendee_name(&self) -> String {
        format!("{} {}", self.attendee_first_name, self.attendee_last_name)
    }
}

// --- Operation results ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedTicket {
    pub reservation_id: i64,
    pub code: String,
    pub status: ReservationStatus,
    pub attendee_email: String,
}

/// Outcome of a successful `reserve`: one ticket per attendee, all under one booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationBatch {
    pub booking_id: String,
    pub event_id: i64,
    pub ticket_type_id: i64,
    pub amount_cents: i64,
    #[serde(rename = "reservations")]
    pub tickets: Vec<ReservedTicket>,
    /// Remaining capacity right after this allocation committed.
    pub available: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancellationResult {
    Cancelled {
        reservation_id: i64,
        at: DateTime<Utc>,
    },
    AlreadyTerminal {
        reservation_id: i64,
        terminal_status: ReservationStatus,
        at: Option<DateTime<Utc>>,
    },
}

impl CancellationResult {
    pub fn reservation_id(&self) -> i64 {
        match self {
            CancellationResult::Cancelled { reservation_id, .. }
            | CancellationResult::AlreadyTerminal { reservation_id, .. } => *reservation_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCancellation {
    pub reservation_id: i64,
    pub reason: String,
}

/// Per-reservation outcome of cancelling a whole booking. Partial success is
/// a valid outcome: `failed` lists what could not be cancelled and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCancellation {
    pub booking_id: String,
    pub results: Vec<CancellationResult>,
    pub failed: Vec<FailedCancellation>,
}

impl BookingCancellation {
    pub fn cancelled_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, CancellationResult::Cancelled { .. }))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckInResult {
    Redeemed {
        reservation_id: i64,
        attendee_name: String,
        ticket_type_id: i64,
        redeemed_at: DateTime<Utc>,
    },
    AlreadyRedeemed {
        reservation_id: i64,
        redeemed_at: Option<DateTime<Utc>>,
    },
    /// The code resolves to a cancelled reservation.
    Invalid {
        reservation_id: i64,
        cancelled_at: Option<DateTime<Utc>>,
    },
    WrongEvent {
        reservation_id: i64,
        event_id: i64,
    },
}

/// Capacity accounting for one ticket type, used to check conservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Availability {
    pub ticket_type_id: i64,
    pub total_capacity: i64,
    pub available: i64,
    pub valid: i64,
    pub redeemed: i64,
    pub cancelled: i64,
}

impl Availability {
    /// `available + valid + redeemed == total_capacity`
    pub fn is_conserved(&self) -> bool {
        self.available >= 0 && self.available + self.valid + self.redeemed == self.total_capacity
    }
}
