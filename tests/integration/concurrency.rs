//! Races between placements, and between placement and the close tick.

use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Barrier};
use std::thread;

use tricolor::types::{GameError, Outcome, RoundStatus};

use crate::support::{at, game, t0};

#[tokio::test]
async fn test_two_concurrent_wagers_exceeding_balance() {
    let g = game(dec!(60), &[Outcome::Red]);
    g.scheduler.tick_at(t0());

    let barrier = Arc::new(Barrier::new(2));
    let tasks = (0..2).map(|_| {
        let scheduler = g.scheduler.clone();
        let barrier = barrier.clone();
        tokio::task::spawn_blocking(move || {
            barrier.wait();
            scheduler.place_wager_at("A", Outcome::Red, dec!(50), at(5))
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let short: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(ok, 1);
    assert_eq!(short, vec![&GameError::InsufficientFunds { needed: dec!(50), available: dec!(10) }]);
    assert_eq!(g.scheduler.balance("A").unwrap(), dec!(10));
    assert_eq!(g.scheduler.wagers_for("A").len(), 1);
}

#[test]
fn test_many_participants_place_in_parallel() {
    let g = game(dec!(100), &[Outcome::Green]);
    g.scheduler.tick_at(t0());

    thread::scope(|s| {
        for p in 0..16 {
            let scheduler = &g.scheduler;
            s.spawn(move || {
                let who = format!("p{p}");
                for i in 0..10 {
                    let outcome = Outcome::ALL[(p + i) % 3];
                    scheduler.place_wager_at(&who, outcome, dec!(1), at(1)).unwrap();
                }
            });
        }
    });

    assert_eq!(g.scheduler.wagers_for_round(1).len(), 160);
    for p in 0..16 {
        assert_eq!(g.scheduler.balance(&format!("p{p}")).unwrap(), dec!(90));
    }
}

#[test]
fn test_same_participant_hammered_never_overdraws() {
    let g = game(dec!(100), &[Outcome::Red]);
    g.scheduler.tick_at(t0());

    let barrier = Barrier::new(8);
    let accepted: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = &g.scheduler;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    (0..10)
                        .filter(|_| scheduler.place_wager_at("A", Outcome::Red, dec!(3), at(2)).is_ok())
                        .count()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    // 100 / 3 = 33 wagers fit; 1 remains.
    assert_eq!(accepted, 33);
    assert_eq!(g.scheduler.balance("A").unwrap(), dec!(1));
}

#[test]
fn test_close_and_place_race_never_persists_wager_on_closed_round() {
    for _ in 0..20 {
        let g = game(dec!(1000), &[Outcome::Violet]);
        g.scheduler.tick_at(t0());
        let barrier = Barrier::new(5);

        thread::scope(|s| {
            for p in 0..4 {
                let scheduler = &g.scheduler;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let who = format!("p{p}");
                    for _ in 0..50 {
                        // Placement clock sits just inside the window, so only
                        // the close transition can turn it away.
                        match scheduler.place_wager_at(&who, Outcome::Red, dec!(1), at(59)) {
                            Ok(w) => assert_eq!(w.round_number, 1),
                            Err(e) => assert_eq!(e, GameError::NoActiveRound),
                        }
                    }
                });
            }
            let scheduler = &g.scheduler;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                scheduler.tick_at(at(60));
            });
        });

        // Every accepted wager was settled with the round: none slipped
        // in after the close and stayed pending.
        let round = g.scheduler.latest_round().unwrap();
        assert_eq!(round.status, RoundStatus::Settled);
        let wagers = g.scheduler.wagers_for_round(1);
        assert!(wagers.iter().all(|w| !w.is_pending()));
        let entry = &g.scheduler.recent_rounds(1)[0];
        assert_eq!(entry.wager_count, wagers.len());
        assert!(entry.is_fully_settled());

        let staked: Decimal = wagers.iter().map(|w| w.stake).sum();
        let balances: Decimal = (0..4).map(|p| g.scheduler.balance(&format!("p{p}")).unwrap()).sum();
        assert_eq!(balances, dec!(4000) - staked);
    }
}

#[test]
fn test_concurrent_ticks_settle_once() {
    let g = game(dec!(100), &[Outcome::Red, Outcome::Green]);
    g.scheduler.tick_at(t0());
    g.scheduler.place_wager_at("A", Outcome::Red, dec!(10), at(1)).unwrap();

    let settled: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let scheduler = &g.scheduler;
                s.spawn(move || usize::from(scheduler.tick_at(at(61)).settlement.is_some()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(settled, 1);
    assert_eq!(g.scheduler.balance("A").unwrap(), dec!(110));
    assert_eq!(g.scheduler.recent_rounds(10).len(), 1);
}
