//! `available + valid + redeemed == total_capacity` under random concurrent
//! interleavings of reserve, cancel and check-in.

mod common;

use std::sync::Arc;

use billet_db::{CodeGenerator, ReservationError, cancel, check_in, registry, reserve};
use chrono::Utc;
use proptest::prelude::*;
use proptest::test_runner::Config;
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
enum Op {
    Reserve { quantity: usize },
    Cancel { pick: usize },
    CheckIn { pick: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1_usize..=3).prop_map(|quantity| Op::Reserve { quantity }),
        2 => any::<usize>().prop_map(|pick| Op::Cancel { pick }),
        1 => any::<usize>().prop_map(|pick| Op::CheckIn { pick }),
    ]
}

async fn assert_conserved(pool: &SqlitePool, ticket_type_id: i64) {
    let a = registry::availability(pool, ticket_type_id).await.unwrap();
    assert!(a.available >= 0, "available went negative: {a:?}");
    assert!(a.is_conserved(), "conservation broken: {a:?}");
}

/// One actor replays its ops in order, checking the invariant after each.
async fn run_actor(
    pool: SqlitePool,
    codes: Arc<CodeGenerator>,
    actor: usize,
    event_id: i64,
    ticket_type_id: i64,
    ops: Vec<Op>,
) {
    let user = format!("actor-{actor}");
    let mut held: Vec<(i64, String)> = Vec::new();
    let mut serial = 0;

    for op in ops {
        match op {
            Op::Reserve { quantity } => {
                let attendees: Vec<_> = (0..quantity)
                    .map(|_| {
                        serial += 1;
                        common::attendee(&format!("a{actor}s{serial}"))
                    })
                    .collect();
                match reserve(&pool, &codes, &user, ticket_type_id, &attendees, Utc::now()).await {
                    Ok(batch) => {
                        assert!(batch.available >= 0);
                        held.extend(batch.tickets.into_iter().map(|t| (t.reservation_id, t.code)));
                    }
                    Err(ReservationError::CapacityExhausted { .. }) => {}
                    Err(other) => panic!("reserve failed: {other}"),
                }
            }
            Op::Cancel { pick } if !held.is_empty() => {
                let (id, _) = &held[pick % held.len()];
                cancel(&pool, *id, &user, Utc::now()).await.unwrap();
            }
            Op::CheckIn { pick } if !held.is_empty() => {
                let (_, code) = &held[pick % held.len()];
                check_in(&pool, code, event_id, Utc::now()).await.unwrap();
            }
            Op::Cancel { .. } | Op::CheckIn { .. } => {}
        }
        assert_conserved(&pool, ticket_type_id).await;
    }
}

proptest! {
    #![proptest_config(Config::with_cases(24))]
    #[test]
    fn capacity_is_conserved_under_interleavings(
        capacity in 1_i64..8,
        lanes in prop::collection::vec(prop::collection::vec(op(), 1..12), 2..4),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(3)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let (pool, _dir) = common::pool().await;
            let codes = Arc::new(CodeGenerator::new());
            let event = common::event(&pool).await;
            let tt = common::ticket_type(&pool, event.id, "Standard", capacity, 3).await;

            let actors: Vec<_> = lanes
                .into_iter()
                .enumerate()
                .map(|(actor, ops)| {
                    tokio::spawn(run_actor(pool.clone(), Arc::clone(&codes), actor, event.id, tt.id, ops))
                })
                .collect();
            for actor in actors {
                actor.await.unwrap();
            }

            let a = registry::availability(&pool, tt.id).await.unwrap();
            assert!(a.is_conserved());
            let event = registry::get_event(&pool, event.id).await.unwrap();
            assert_eq!(event.participants_count, a.valid + a.redeemed);
        });
    }
}
