//! Gate check-in. Redemption is a single conditional update keyed on the
//! code, the presented event and `status = 'valid'`; of two devices scanning
//! the same code at once, one redeems and the other sees `AlreadyRedeemed`.

use billet_models::{CheckInResult, Reservation, ReservationStatus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::codes;
use crate::error::{Entity, ReservationError};
use crate::ledger::{self, RESERVATION_COLUMNS};

pub async fn check_in(
    pool: &SqlitePool,
    code: &str,
    event_id: i64,
    scanned_at: DateTime<Utc>,
) -> Result<CheckInResult, ReservationError> {
    let code = codes::normalize(code);

    let sql = format!(
        "UPDATE reservations SET status = 'redeemed', redeemed_at = ? \
         WHERE code = ? AND event_id = ? AND status = 'valid' \
         RETURNING {RESERVATION_COLUMNS}"
    );
    let redeemed = sqlx::query_as::<_, Reservation>(&sql)
        .bind(scanned_at)
        .bind(&code)
        .bind(event_id)
        .fetch_optional(pool)
        .await?;

    if let Some(reservation) = redeemed {
        info!(reservation_id = reservation.id, event_id, "Ticket redeemed");
        return Ok(CheckInResult::Redeemed {
            reservation_id: reservation.id,
            attendee_name: reservation.attendee_name(),
            ticket_type_id: reservation.ticket_type_id,
            redeemed_at: reservation.redeemed_at.unwrap_or(scanned_at),
        });
    }

    let Some(reservation) = ledger::find_by_code(pool, &code).await? else {
        warn!(event_id, "Unknown code presented");
        return Err(ReservationError::NotFound(Entity::Code));
    };

    if reservation.event_id != event_id {
        warn!(
            reservation_id = reservation.id,
            presented_at = event_id,
            ticket_event = reservation.event_id,
            "Ticket presented at the wrong event"
        );
        return Ok(CheckInResult::WrongEvent {
            reservation_id: reservation.id,
            event_id: reservation.event_id,
        });
    }

    match reservation.status {
        ReservationStatus::Redeemed => {
            warn!(
                reservation_id = reservation.id,
                redeemed_at = ?reservation.redeemed_at,
                "Code scanned again after redemption"
            );
            Ok(CheckInResult::AlreadyRedeemed {
                reservation_id: reservation.id,
                redeemed_at: reservation.redeemed_at,
            })
        }
        ReservationStatus::Cancelled => {
            warn!(reservation_id = reservation.id, "Cancelled ticket presented");
            Ok(CheckInResult::Invalid {
                reservation_id: reservation.id,
                cancelled_at: reservation.cancelled_at,
            })
        }
        // The conditional update saw this row in another state a moment ago;
        // nothing transitions back to valid, so this cannot be reached.
        ReservationStatus::Valid => Err(ReservationError::Inconsistent(format!(
            "reservation {} is valid but could not be redeemed",
            reservation.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CodeGenerator, cancel, registry, reserve, test_support};
    use billet_models::AttendeeInfo;
    use chrono::Duration;

    async fn one_ticket(pool: &SqlitePool) -> billet_models::ReservationBatch {
        let event = test_support::event(pool, true).await;
        let tt = test_support::ticket_type(pool, event.id, 2, 2).await;
        let attendee = AttendeeInfo::new("Hugo", "Bernard", "hugo@campus.fr");
        reserve(pool, &CodeGenerator::new(), "user-a", tt.id, &[attendee], test_support::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn second_scan_reports_original_time() {
        let (pool, _dir) = test_support::pool().await;
        let batch = one_ticket(&pool).await;
        let code = &batch.tickets[0].code;

        let first_scan = test_support::now();
        let first = check_in(&pool, code, batch.event_id, first_scan).await.unwrap();
        assert!(matches!(
            first,
            CheckInResult::Redeemed { ref attendee_name, redeemed_at, .. }
                if attendee_name == "Hugo Bernard" && redeemed_at == first_scan
        ));

        let second = check_in(&pool, code, batch.event_id, first_scan + Duration::minutes(3))
            .await
            .unwrap();
        assert_eq!(
            second,
            CheckInResult::AlreadyRedeemed {
                reservation_id: batch.tickets[0].reservation_id,
                redeemed_at: Some(first_scan),
            }
        );

        // Redemption keeps the unit consumed.
        let a = registry::availability(&pool, batch.ticket_type_id).await.unwrap();
        assert_eq!((a.available, a.valid, a.redeemed), (1, 0, 1));
    }

    #[tokio::test]
    async fn code_lookup_ignores_case_and_whitespace() {
        let (pool, _dir) = test_support::pool().await;
        let batch = one_ticket(&pool).await;
        let scanned = format!("  {} ", batch.tickets[0].code.to_lowercase());
        let result = check_in(&pool, &scanned, batch.event_id, test_support::now()).await.unwrap();
        assert!(matches!(result, CheckInResult::Redeemed { .. }));
    }

    #[tokio::test]
    async fn wrong_gate() {
        let (pool, _dir) = test_support::pool().await;
        let batch = one_ticket(&pool).await;
        let other = test_support::event(&pool, true).await;

        let result = check_in(&pool, &batch.tickets[0].code, other.id, test_support::now())
            .await
            .unwrap();
        assert_eq!(
            result,
            CheckInResult::WrongEvent {
                reservation_id: batch.tickets[0].reservation_id,
                event_id: batch.event_id,
            }
        );
        // Still usable at the right gate.
        let result = check_in(&pool, &batch.tickets[0].code, batch.event_id, test_support::now())
            .await
            .unwrap();
        assert!(matches!(result, CheckInResult::Redeemed { .. }));
    }

    #[tokio::test]
    async fn cancelled_ticket_is_invalid() {
        let (pool, _dir) = test_support::pool().await;
        let batch = one_ticket(&pool).await;
        let ticket = &batch.tickets[0];
        cancel(&pool, ticket.reservation_id, "user-a", test_support::now()).await.unwrap();

        let result = check_in(&pool, &ticket.code, batch.event_id, test_support::now()).await.unwrap();
        assert!(matches!(result, CheckInResult::Invalid { cancelled_at: Some(_), .. }));
    }

    #[tokio::test]
    async fn unknown_code() {
        let (pool, _dir) = test_support::pool().await;
        let batch = one_ticket(&pool).await;
        let err = check_in(&pool, "ZZZZZ-ZZZZZ", batch.event_id, test_support::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::NotFound(Entity::Code)));
    }

    #[tokio::test]
    async fn concurrent_scans_redeem_once() {
        let (pool, _dir) = test_support::pool().await;
        let batch = one_ticket(&pool).await;
        let code = batch.tickets[0].code.clone();
        let event_id = batch.event_id;

        let scans: Vec<_> = (0..10)
            .map(|_| {
                let pool = pool.clone();
                let code = code.clone();
                tokio::spawn(async move { check_in(&pool, &code, event_id, test_support::now()).await })
            })
            .collect();

        let mut redeemed = 0;
        let mut repeated = 0;
        for scan in scans {
            match scan.await.unwrap().unwrap() {
                CheckInResult::Redeemed { .. } => redeemed += 1,
                CheckInResult::AlreadyRedeemed { .. } => repeated += 1,
                other => panic!("unexpected scan result {other:?}"),
            }
        }
        assert_eq!((redeemed, repeated), (1, 9));
    }
}
