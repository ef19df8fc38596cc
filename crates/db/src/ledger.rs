//! Durable reservation rows. Rows are inserted by allocation and only ever
//! change status through conditional updates in cancellation and check-in.

use billet_models::{AttendeeInfo, Reservation};
use chrono::{DateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};

use crate::error::{Entity, ReservationError};

pub(crate) const RESERVATION_COLUMNS: &str = "id, booking_id, user_id, ticket_type_id, event_id, \
    attendee_first_name, attendee_last_name, attendee_email, attendee_phone, code, status, \
    amount_cents, created_at, cancelled_at, cancelled_by, redeemed_at";

pub(crate) struct NewReservation<'a> {
    pub booking_id: &'a str,
    pub user_id: &'a str,
    pub ticket_type_id: i64,
    pub event_id: i64,
    pub attendee: &'a AttendeeInfo,
    pub code: &'a str,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// Raw insert; callers map unique violations (code, valid attendee).
pub(crate) async fn insert<'e, E>(executor: E, row: &NewReservation<'_>) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO reservations (booking_id, user_id, ticket_type_id, event_id, \
            attendee_first_name, attendee_last_name, attendee_email, attendee_phone, \
            code, status, amount_cents, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'valid', ?, ?) RETURNING id",
    )
    .bind(row.booking_id)
    .bind(row.user_id)
    .bind(row.ticket_type_id)
    .bind(row.event_id)
    .bind(&row.attendee.first_name)
    .bind(&row.attendee.last_name)
    .bind(&row.attendee.email)
    .bind(&row.attendee.phone)
    .bind(row.code)
    .bind(row.amount_cents)
    .bind(row.created_at)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

pub async fn get<'e, E>(executor: E, reservation_id: i64) -> Result<Reservation, ReservationError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?");
    sqlx::query_as::<_, Reservation>(&sql)
        .bind(reservation_id)
        .fetch_optional(executor)
        .await?
        .ok_or(ReservationError::NotFound(Entity::Reservation))
}

/// Indexed lookup through the unique `code` column.
pub async fn find_by_code<'e, E>(executor: E, code: &str) -> Result<Option<Reservation>, ReservationError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE code = ?");
    let reservation = sqlx::query_as::<_, Reservation>(&sql)
        .bind(code)
        .fetch_optional(executor)
        .await?;
    Ok(reservation)
}

/// All reservations of one booking in creation order; unknown booking is `NotFound`.
pub async fn list_for_booking(
    pool: &SqlitePool,
    booking_id: &str,
) -> Result<Vec<Reservation>, ReservationError> {
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE booking_id = ? ORDER BY id");
    let reservations = sqlx::query_as::<_, Reservation>(&sql)
        .bind(booking_id)
        .fetch_all(pool)
        .await?;
    if reservations.is_empty() {
        return Err(ReservationError::NotFound(Entity::Booking));
    }
    Ok(reservations)
}

pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Reservation>, ReservationError> {
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE user_id = ? ORDER BY id DESC");
    let reservations = sqlx::query_as::<_, Reservation>(&sql)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(reservations)
}
