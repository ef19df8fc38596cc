//! Cancellation: the mirror of allocation. A valid reservation becomes
//! cancelled and its unit returns to the pool in one transaction.
//!
//! The status flip is conditional on `status = 'valid'`, so of two racing
//! cancels (or a cancel racing a check-in) exactly one changes anything; the
//! loser reports the terminal state it found.

use billet_models::{BookingCancellation, CancellationResult, FailedCancellation, Reservation};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::error::ReservationError;
use crate::{ledger, registry};

pub async fn cancel(
    pool: &SqlitePool,
    reservation_id: i64,
    actor_id: &str,
    requested_at: DateTime<Utc>,
) -> Result<CancellationResult, ReservationError> {
    let reservation = ledger::get(pool, reservation_id).await?;
    if reservation.user_id != actor_id {
        return Err(ReservationError::NotOwner);
    }
    if reservation.status.is_terminal() {
        return Ok(already_terminal(&reservation));
    }
    let event = registry::get_event(pool, reservation.event_id).await?;
    if !event.cancellation_allowed {
        return Err(ReservationError::CancellationNotAllowed {
            policy: event.cancellation_policy,
        });
    }

    cancel_valid(pool, &reservation, actor_id, requested_at).await
}

async fn cancel_valid(
    pool: &SqlitePool,
    reservation: &Reservation,
    actor_id: &str,
    requested_at: DateTime<Utc>,
) -> Result<CancellationResult, ReservationError> {
    let mut tx = pool.begin().await?;

    let flipped = sqlx::query(
        "UPDATE reservations SET status = 'cancelled', cancelled_at = ?, cancelled_by = ? \
         WHERE id = ? AND status = 'valid'",
    )
    .bind(requested_at)
    .bind(actor_id)
    .bind(reservation.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if flipped == 0 {
        crate::roll_back(tx).await;
        let current = ledger::get(pool, reservation.id).await?;
        info!(reservation_id = reservation.id, status = %current.status, "Cancel lost race, already terminal");
        return Ok(already_terminal(&current));
    }

    let restored = sqlx::query(
        "UPDATE ticket_types SET available = available + 1 \
         WHERE id = ? AND available < total_capacity",
    )
    .bind(reservation.ticket_type_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if restored == 0 {
        crate::roll_back(tx).await;
        error!(
            reservation_id = reservation.id,
            ticket_type_id = reservation.ticket_type_id,
            "Capacity already at total while cancelling a valid reservation"
        );
        return Err(ReservationError::Inconsistent(format!(
            "ticket type {} has no room to restore a unit",
            reservation.ticket_type_id
        )));
    }

    sqlx::query(
        "UPDATE events SET participants_count = participants_count - 1 \
         WHERE id = ? AND participants_count > 0",
    )
    .bind(reservation.event_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(
        reservation_id = reservation.id,
        ticket_type_id = reservation.ticket_type_id,
        actor_id,
        "Reservation cancelled, capacity restored"
    );

    Ok(CancellationResult::Cancelled {
        reservation_id: reservation.id,
        at: requested_at,
    })
}

fn already_terminal(reservation: &Reservation) -> CancellationResult {
    CancellationResult::AlreadyTerminal {
        reservation_id: reservation.id,
        terminal_status: reservation.status,
        at: reservation.terminal_at(),
    }
}

/// Cancel every reservation of a booking, one at a time. Ownership and the
/// event's policy are checked once up front; after that each reservation
/// succeeds or fails on its own and the outcome is reported per row.
pub async fn cancel_booking(
    pool: &SqlitePool,
    booking_id: &str,
    actor_id: &str,
    requested_at: DateTime<Utc>,
) -> Result<BookingCancellation, ReservationError> {
    let reservations = ledger::list_for_booking(pool, booking_id).await?;
    if reservations.iter().any(|r| r.user_id != actor_id) {
        return Err(ReservationError::NotOwner);
    }
    let event = registry::get_event(pool, reservations[0].event_id).await?;
    if !event.cancellation_allowed && reservations.iter().any(|r| !r.status.is_terminal()) {
        return Err(ReservationError::CancellationNotAllowed {
            policy: event.cancellation_policy,
        });
    }

    let mut results = Vec::with_capacity(reservations.len());
    let mut failed = Vec::new();
    for reservation in &reservations {
        let outcome = if reservation.status.is_terminal() {
            Ok(already_terminal(reservation))
        } else {
            cancel_valid(pool, reservation, actor_id, requested_at).await
        };
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(reservation_id = reservation.id, error = %e, "Booking cancellation left a reservation untouched");
                failed.push(FailedCancellation {
                    reservation_id: reservation.id,
                    reason: e.to_string(),
                });
            }
        }
    }

    let cancellation = BookingCancellation {
        booking_id: booking_id.to_string(),
        results,
        failed,
    };
    info!(
        booking_id,
        cancelled = cancellation.cancelled_count(),
        failed = cancellation.failed.len(),
        "Booking cancellation processed"
    );
    Ok(cancellation)
}
