//! Events and the ticket types they own.
//!
//! Read access to ticket types and their live `available` count. The count is
//! written here only at creation; afterwards only [`crate::allocation`] and
//! [`crate::cancellation`] move it.

use billet_models::{Availability, Event, NewEvent, NewTicketType, TicketType};
use chrono::Utc;
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;

use crate::error::{Entity, ReservationError};

const EVENT_COLUMNS: &str = "id, name, starts_at, participants_count, cancellation_allowed, \
    cancellation_policy, created_at";

const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, price_cents, total_capacity, available, \
    max_per_person, created_at";

pub async fn create_event(pool: &SqlitePool, new: &NewEvent) -> Result<Event, ReservationError> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(ReservationError::InvalidDefinition("event name is required".into()));
    }
    let policy = new
        .cancellation_policy
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let sql = format!(
        "INSERT INTO events (name, starts_at, participants_count, cancellation_allowed, \
            cancellation_policy, created_at) \
         VALUES (?, ?, 0, ?, ?, ?) RETURNING {EVENT_COLUMNS}"
    );
    let event = sqlx::query_as::<_, Event>(&sql)
        .bind(name)
        .bind(new.starts_at)
        .bind(new.cancellation_allowed)
        .bind(policy)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
    info!(event_id = event.id, starts_at = %event.starts_at, "Event registered: {}", event.name);
    Ok(event)
}

pub async fn get_event<'e, E>(executor: E, event_id: i64) -> Result<Event, ReservationError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
    sqlx::query_as::<_, Event>(&sql)
        .bind(event_id)
        .fetch_optional(executor)
        .await?
        .ok_or(ReservationError::NotFound(Entity::Event))
}

pub async fn create_ticket_type(
    pool: &SqlitePool,
    event_id: i64,
    new: &NewTicketType,
) -> Result<TicketType, ReservationError> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(ReservationError::InvalidDefinition("ticket type name is required".into()));
    }
    if new.price_cents < 0 {
        return Err(ReservationError::InvalidDefinition("price cannot be negative".into()));
    }
    if new.total_capacity < 0 {
        return Err(ReservationError::InvalidDefinition("capacity cannot be negative".into()));
    }
    if new.max_per_person < 1 {
        return Err(ReservationError::InvalidDefinition("max per person must be at least 1".into()));
    }
    get_event(pool, event_id).await?;

    let sql = format!(
        "INSERT INTO ticket_types (event_id, name, price_cents, total_capacity, available, \
            max_per_person, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {TICKET_TYPE_COLUMNS}"
    );
    let ticket_type = sqlx::query_as::<_, TicketType>(&sql)
        .bind(event_id)
        .bind(name)
        .bind(new.price_cents)
        .bind(new.total_capacity)
        .bind(new.total_capacity)
        .bind(new.max_per_person)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
    info!(
        ticket_type_id = ticket_type.id,
        event_id,
        capacity = ticket_type.total_capacity,
        "Ticket type created: {}",
        ticket_type.name
    );
    Ok(ticket_type)
}

pub async fn get<'e, E>(executor: E, ticket_type_id: i64) -> Result<TicketType, ReservationError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = ?");
    sqlx::query_as::<_, TicketType>(&sql)
        .bind(ticket_type_id)
        .fetch_optional(executor)
        .await?
        .ok_or(ReservationError::NotFound(Entity::TicketType))
}

/// Ticket types of an event, cheapest first.
pub async fn list_for_event(
    pool: &SqlitePool,
    event_id: i64,
) -> Result<Vec<TicketType>, ReservationError> {
    get_event(pool, event_id).await?;
    let sql = format!(
        "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE event_id = ? \
         ORDER BY price_cents, id"
    );
    let ticket_types = sqlx::query_as::<_, TicketType>(&sql)
        .bind(event_id)
        .fetch_all(pool)
        .await?;
    Ok(ticket_types)
}

/// Capacity and reservation counts for one ticket type, read in one statement.
pub async fn availability(
    pool: &SqlitePool,
    ticket_type_id: i64,
) -> Result<Availability, ReservationError> {
    sqlx::query_as::<_, Availability>(
        "SELECT t.id AS ticket_type_id, t.total_capacity, t.available, \
            COALESCE(SUM(r.status = 'valid'), 0) AS valid, \
            COALESCE(SUM(r.status = 'redeemed'), 0) AS redeemed, \
            COALESCE(SUM(r.status = 'cancelled'), 0) AS cancelled \
         FROM ticket_types t \
         LEFT JOIN reservations r ON r.ticket_type_id = t.id \
         WHERE t.id = ? \
         GROUP BY t.id",
    )
    .bind(ticket_type_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ReservationError::NotFound(Entity::TicketType))
}
