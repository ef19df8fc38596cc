use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};

pub mod allocation;
pub mod cancellation;
pub mod checkin;
pub mod codes;
mod error;
pub mod ledger;
pub mod registry;

pub use allocation::reserve;
pub use cancellation::{cancel, cancel_booking};
pub use checkin::check_in;
pub use codes::CodeGenerator;
pub use error::{Entity, ReservationError};

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Open (creating if needed) the store. WAL lets readers proceed while one
/// writer holds the lock; writers queue on the busy timeout.
pub async fn connect(database_url: &str, settings: PoolSettings) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(settings.busy_timeout)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await?;
    info!("Connected to database: {database_url}");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Migrations applied");
    Ok(())
}

/// Abandon a transaction on a refusal path. A failed rollback is logged and
/// swallowed so the refusal itself reaches the caller.
pub(crate) async fn roll_back(tx: Transaction<'_, Sqlite>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed, connection will discard the transaction");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, SubsecRound, Utc};
    use sqlx::SqlitePool;

    use billet_models::{Event, NewEvent, NewTicketType, TicketType};

    use tempfile::TempDir;

    use crate::{PoolSettings, connect, migrate, registry};

    /// Fresh file-backed database so that every pooled connection sees the
    /// same data. The database and its WAL files go away with the `TempDir`.
    pub async fn pool() -> (SqlitePool, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("billet.db").display());
        let pool = connect(&url, PoolSettings::default()).await.unwrap();
        migrate(&pool).await.unwrap();
        (pool, dir)
    }

    /// Millisecond precision so values compare equal after a store round trip.
    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }

    pub async fn event(pool: &SqlitePool, cancellation_allowed: bool) -> Event {
        let new = NewEvent {
            name: "Gala BDE".into(),
            starts_at: now() + Duration::days(7),
            cancellation_allowed,
            cancellation_policy: (!cancellation_allowed).then(|| "Aucun remboursement".to_string()),
        };
        registry::create_event(pool, &new).await.unwrap()
    }

    pub async fn ticket_type(
        pool: &SqlitePool,
        event_id: i64,
        capacity: i64,
        max_per_person: i64,
    ) -> TicketType {
        let new = NewTicketType {
            name: "Standard".into(),
            price_cents: 1500,
            total_capacity: capacity,
            max_per_person,
        };
        registry::create_ticket_type(pool, event_id, &new).await.unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roll_back_discards_writes_and_frees_the_lock() {
        let (pool, _dir) = test_support::pool().await;
        let event = test_support::event(&pool, true).await;

        let mut tx = pool.begin().await.unwrap();
        sqlx::query("UPDATE events SET participants_count = 99 WHERE id = ?")
            .bind(event.id)
            .execute(&mut *tx)
            .await
            .unwrap();
        roll_back(tx).await;

        let event = registry::get_event(&pool, event.id).await.unwrap();
        assert_eq!(event.participants_count, 0);

        // The write lock is released: a new writer gets through immediately.
        let created = test_support::ticket_type(&pool, event.id, 3, 1).await;
        assert_eq!(created.available, 3);
    }
}
