//! Allocation: reserve N tickets of one type for N attendees, all or nothing.
//!
//! The capacity check and decrement is one conditional `UPDATE` that is also
//! the first statement of the write transaction, so the store's write lock is
//! held before anything is decided. Zero rows affected means the pool cannot
//! cover the request. Reservation rows and the event participant counter are
//! written in the same transaction; any failure rolls all of it back.

use std::collections::HashSet;

use billet_models::{AttendeeError, AttendeeInfo, ReservationBatch, ReservationStatus, ReservedTicket, TicketType};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::codes::CodeGenerator;
use crate::error::{ReservationError, UniqueViolation, unique_violation};
use crate::ledger::{self, NewReservation};
use crate::registry;

/// Attempts at drawing a fresh code for one row before giving up.
pub const CODE_ATTEMPTS: u32 = 8;

pub async fn reserve(
    pool: &SqlitePool,
    codes: &CodeGenerator,
    user_id: &str,
    ticket_type_id: i64,
    attendees: &[AttendeeInfo],
    requested_at: DateTime<Utc>,
) -> Result<ReservationBatch, ReservationError> {
    let attendees = validate_attendees(attendees)?;
    let quantity = attendees.len() as i64;

    let ticket_type = registry::get(pool, ticket_type_id).await?;
    let event = registry::get_event(pool, ticket_type.event_id).await?;
    if requested_at >= event.starts_at {
        return Err(ReservationError::EventClosed { starts_at: event.starts_at });
    }
    if quantity > ticket_type.max_per_person {
        return Err(ReservationError::LimitExceeded {
            requested: quantity,
            max_per_person: ticket_type.max_per_person,
        });
    }

    let mut tx = pool.begin().await?;

    let claimed = sqlx::query(
        "UPDATE ticket_types SET available = available - ? WHERE id = ? AND available >= ?",
    )
    .bind(quantity)
    .bind(ticket_type_id)
    .bind(quantity)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if claimed == 0 {
        let remaining = available(&mut tx, ticket_type_id).await?;
        crate::roll_back(tx).await;
        warn!(ticket_type_id, user_id, requested = quantity, remaining, "Reservation refused: capacity exhausted");
        return Err(ReservationError::CapacityExhausted { requested: quantity, remaining });
    }

    let booking_id = uuid::Uuid::new_v4().to_string();
    let tickets = match insert_rows(&mut tx, codes, &booking_id, user_id, &ticket_type, &attendees, requested_at).await {
        Ok(tickets) => tickets,
        Err(e) => {
            crate::roll_back(tx).await;
            warn!(ticket_type_id, user_id, error = %e, "Reservation rolled back");
            return Err(e);
        }
    };

    sqlx::query("UPDATE events SET participants_count = participants_count + ? WHERE id = ?")
        .bind(quantity)
        .bind(ticket_type.event_id)
        .execute(&mut *tx)
        .await?;

    let available = available(&mut tx, ticket_type_id).await?;
    tx.commit().await?;

    info!(
        booking_id = %booking_id,
        ticket_type_id,
        event_id = ticket_type.event_id,
        user_id,
        quantity,
        available,
        "Reservation confirmed"
    );

    Ok(ReservationBatch {
        booking_id,
        event_id: ticket_type.event_id,
        ticket_type_id,
        amount_cents: ticket_type.price_cents * quantity,
        tickets,
        available,
    })
}

/// Normalize every attendee and reject emails repeated within the request.
fn validate_attendees(attendees: &[AttendeeInfo]) -> Result<Vec<AttendeeInfo>, ReservationError> {
    if attendees.is_empty() {
        return Err(ReservationError::InvalidAttendeeData {
            index: 0,
            source: AttendeeError::NoAttendees,
        });
    }

    let mut seen = HashSet::new();
    attendees
        .iter()
        .enumerate()
        .map(|(index, attendee)| {
            let normalized = attendee
                .normalized()
                .map_err(|source| ReservationError::InvalidAttendeeData { index, source })?;
            if !seen.insert(normalized.email.clone()) {
                return Err(ReservationError::DuplicateAttendee { email: normalized.email });
            }
            Ok(normalized)
        })
        .collect()
}

async fn available(conn: &mut SqliteConnection, ticket_type_id: i64) -> Result<i64, ReservationError> {
    let available = sqlx::query_scalar::<_, i64>("SELECT available FROM ticket_types WHERE id = ?")
        .bind(ticket_type_id)
        .fetch_one(conn)
        .await?;
    Ok(available)
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    codes: &CodeGenerator,
    booking_id: &str,
    user_id: &str,
    ticket_type: &TicketType,
    attendees: &[AttendeeInfo],
    created_at: DateTime<Utc>,
) -> Result<Vec<ReservedTicket>, ReservationError> {
    let mut tickets = Vec::with_capacity(attendees.len());
    for attendee in attendees {
        let (reservation_id, code) =
            insert_with_fresh_code(conn, codes, booking_id, user_id, ticket_type, attendee, created_at).await?;
        tickets.push(ReservedTicket {
            reservation_id,
            code,
            status: ReservationStatus::Valid,
            attendee_email: attendee.email.clone(),
        });
    }
    Ok(tickets)
}

async fn insert_with_fresh_code(
    conn: &mut SqliteConnection,
    codes: &CodeGenerator,
    booking_id: &str,
    user_id: &str,
    ticket_type: &TicketType,
    attendee: &AttendeeInfo,
    created_at: DateTime<Utc>,
) -> Result<(i64, String), ReservationError> {
    for attempt in 1..=CODE_ATTEMPTS {
        let code = codes.next(ticket_type.event_id, user_id);
        let row = NewReservation {
            booking_id,
            user_id,
            ticket_type_id: ticket_type.id,
            event_id: ticket_type.event_id,
            attendee,
            code: &code,
            amount_cents: ticket_type.price_cents,
            created_at,
        };
        match ledger::insert(&mut *conn, &row).await {
            Ok(id) => return Ok((id, code)),
            Err(e) => match unique_violation(&e) {
                Some(UniqueViolation::Code) => {
                    debug!(attempt, "Code collision, drawing another");
                }
                Some(UniqueViolation::ValidAttendee) => {
                    return Err(ReservationError::DuplicateAttendee {
                        email: attendee.email.clone(),
                    });
                }
                None => return Err(e.into()),
            },
        }
    }
    Err(ReservationError::CodeSpaceExhausted(CODE_ATTEMPTS))
}
