#![allow(dead_code)]

use billet_db::{PoolSettings, connect, migrate, registry};
use billet_models::{AttendeeInfo, Event, NewEvent, NewTicketType, TicketType};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// The returned `TempDir` owns the database file; keep it alive for the test.
pub async fn pool() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("billet.db").display());
    let settings = PoolSettings {
        max_connections: 8,
        busy_timeout: std::time::Duration::from_secs(30),
    };
    let pool = connect(&url, settings).await.expect("connect");
    migrate(&pool).await.expect("migrate");
    (pool, dir)
}

pub async fn event(pool: &SqlitePool) -> Event {
    let new = NewEvent {
        name: "Soirée d'intégration".into(),
        starts_at: Utc::now() + Duration::days(3),
        cancellation_allowed: true,
        cancellation_policy: None,
    };
    registry::create_event(pool, &new).await.expect("event")
}

pub async fn ticket_type(
    pool: &SqlitePool,
    event_id: i64,
    name: &str,
    capacity: i64,
    max_per_person: i64,
) -> TicketType {
    let new = NewTicketType {
        name: name.into(),
        price_cents: 0,
        total_capacity: capacity,
        max_per_person,
    };
    registry::create_ticket_type(pool, event_id, &new)
        .await
        .expect("ticket type")
}

pub fn attendee(tag: &str) -> AttendeeInfo {
    AttendeeInfo::new("Prénom", tag, &format!("{tag}@etu.campus.fr"))
}
