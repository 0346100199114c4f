//! Full round lifecycles driven through `RoundScheduler`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use tricolor::config::SettlementConfig;
use tricolor::engine::settlement::SettlementEngine;
use tricolor::ledger::{EntryKind, Ledger};
use tricolor::types::{GameError, Outcome, RoundStatus, WagerResult};
use tricolor::wagers::WagerStore;

use crate::faulty_ledger::FaultyLedger;
use crate::support::{at, game, game_with_ledger, t0};

#[test]
fn test_winning_wager_doubles_stake() {
    let g = game(dec!(100), &[Outcome::Green]);
    g.scheduler.tick_at(t0());

    let wager = assert_ok!(g.scheduler.place_wager_at("A", Outcome::Green, dec!(10), at(10)));
    assert_eq!(wager.round_number, 1);
    assert_eq!(g.scheduler.balance("A").unwrap(), dec!(90));

    g.scheduler.tick_at(at(60));

    assert_eq!(g.scheduler.balance("A").unwrap(), dec!(110));
    let settled = &g.scheduler.wagers_for("A")[0];
    assert_eq!(settled.result, WagerResult::Won);
    assert_eq!(settled.payout, dec!(20));
    assert_eq!(settled.settled_at, Some(at(60)));
}

#[test]
fn test_losing_wager_keeps_debit() {
    let g = game(dec!(100), &[Outcome::Violet]);
    g.scheduler.tick_at(t0());
    assert_ok!(g.scheduler.place_wager_at("A", Outcome::Green, dec!(10), at(10)));
    g.scheduler.tick_at(at(60));

    assert_eq!(g.scheduler.balance("A").unwrap(), dec!(90));
    assert_eq!(g.scheduler.wagers_for("A")[0].result, WagerResult::Lost);
    let kinds: Vec<EntryKind> = g.scheduler.ledger_entries("A").iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EntryKind::Opening, EntryKind::Stake]);
}

#[test]
fn test_wager_lands_in_round_accepting_at_call_time() {
    let g = game(dec!(100), &[Outcome::Red]);
    g.scheduler.tick_at(t0());
    g.scheduler.tick_at(at(60));
    g.scheduler.tick_at(at(65));

    let before = g.scheduler.balance("A").unwrap();
    let wager = assert_ok!(g.scheduler.place_wager_at("A", Outcome::Red, dec!(7.5), at(70)));
    assert_eq!(wager.round_number, 2);
    assert_eq!(g.scheduler.current_round().unwrap().number, 2);
    assert_eq!(g.scheduler.balance("A").unwrap(), before - dec!(7.5));
}

#[test]
fn test_insufficient_funds_mutates_nothing() {
    let g = game(dec!(100), &[Outcome::Red]);
    g.scheduler.tick_at(t0());
    assert_ok!(g.scheduler.place_wager_at("A", Outcome::Red, dec!(95), at(1)));

    let err = assert_err!(g.scheduler.place_wager_at("A", Outcome::Red, dec!(10), at(2)));
    assert_eq!(err, GameError::InsufficientFunds { needed: dec!(10), available: dec!(5) });
    assert_eq!(g.scheduler.balance("A").unwrap(), dec!(5));
    assert_eq!(g.scheduler.wagers_for("A").len(), 1);
    assert_eq!(g.scheduler.ledger_entries("A").len(), 2);
}

#[test]
fn test_settlement_is_idempotent() {
    let g = game(dec!(100), &[Outcome::Red]);
    g.scheduler.tick_at(t0());
    assert_ok!(g.scheduler.place_wager_at("A", Outcome::Red, dec!(10), at(1)));
    assert_ok!(g.scheduler.place_wager_at("B", Outcome::Green, dec!(10), at(1)));
    g.scheduler.tick_at(at(60));

    let balances = (g.scheduler.balance("A").unwrap(), g.scheduler.balance("B").unwrap());
    let results: Vec<_> = g.scheduler.wagers_for_round(1).iter().map(|w| w.result).collect();

    // Replay settlement over the same wagers and ledger.
    let store = Arc::new(WagerStore::from_wagers(g.scheduler.wagers_for_round(1)));
    let engine = SettlementEngine::new(g.ledger.clone(), store.clone(), dec!(2));
    let replay = engine.settle_round(1, Outcome::Red, at(61));
    assert_eq!(replay.skipped, 2);
    assert_eq!(replay.total_paid, Decimal::ZERO);

    assert_eq!((g.scheduler.balance("A").unwrap(), g.scheduler.balance("B").unwrap()), balances);
    let replayed: Vec<_> = store.for_round(1).iter().map(|w| w.result).collect();
    assert_eq!(replayed, results);
}

#[test]
fn test_conservation_across_round() {
    let g = game(dec!(500), &[Outcome::Green]);
    g.scheduler.tick_at(t0());
    let bets = [
        ("A", Outcome::Green, dec!(40)),
        ("B", Outcome::Red, dec!(25)),
        ("C", Outcome::Violet, dec!(12.5)),
        ("A", Outcome::Red, dec!(10)),
        ("D", Outcome::Green, dec!(3)),
    ];
    for (i, (who, outcome, stake)) in bets.iter().enumerate() {
        assert_ok!(g.scheduler.place_wager_at(who, *outcome, *stake, at(i as i64 + 1)));
    }
    let report = g.scheduler.tick_at(at(60)).settlement.unwrap();
    assert!(report.is_complete());

    let debits: Decimal = bets.iter().map(|(_, _, s)| *s).sum();
    let credits: Decimal = ["A", "B", "C", "D"]
        .iter()
        .flat_map(|p| g.scheduler.ledger_entries(p))
        .filter(|e| e.kind == EntryKind::Payout)
        .map(|e| e.amount)
        .sum();
    assert_eq!(debits - credits, report.house_net());
    assert_eq!(report.house_net(), dec!(90.5) - dec!(86));

    let total: Decimal = ["A", "B", "C", "D"].iter().map(|p| g.scheduler.balance(p).unwrap()).sum();
    assert_eq!(total, dec!(2000) - report.house_net());

    let entry = &g.scheduler.recent_rounds(1)[0];
    assert_eq!(entry.total_staked, debits);
    assert_eq!(entry.total_paid, credits);
    assert_eq!(entry.wager_count, 5);
}

#[test]
fn test_failed_payout_retried_then_resolved() {
    let ledger = Arc::new(FaultyLedger::new(dec!(100)));
    let scheduler = game_with_ledger(ledger.clone(), SettlementConfig::default(), Outcome::Red);
    scheduler.tick_at(t0());
    assert_ok!(scheduler.place_wager_at("A", Outcome::Red, dec!(10), at(1)));
    assert_ok!(scheduler.place_wager_at("B", Outcome::Red, dec!(10), at(1)));

    ledger.fail_credits_for("B");
    let report = scheduler.tick_at(at(60)).settlement.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].participant_id, "B");

    // The round is settled but flagged; the next round still follows.
    let entry = &scheduler.recent_rounds(1)[0];
    assert_eq!(entry.unsettled_wagers, 1);
    assert!(!entry.is_fully_settled());
    assert_eq!(scheduler.latest_round().unwrap().status, RoundStatus::Settled);
    assert_eq!(scheduler.pending_retries().len(), 1);
    assert_eq!(scheduler.balance("A").unwrap(), dec!(110));
    assert_eq!(scheduler.balance("B").unwrap(), dec!(90));

    ledger.heal();
    let retry = scheduler.retry_settlements_at(at(70));
    assert_eq!(retry.resolved, 1);
    assert_eq!(scheduler.balance("B").unwrap(), dec!(110));
    assert!(scheduler.pending_retries().is_empty());
    assert!(scheduler.settlement_alerts().is_empty());
}

#[test]
fn test_failed_payout_escalates_after_retry_limit() {
    let ledger = Arc::new(FaultyLedger::new(dec!(100)));
    let settlement = SettlementConfig {
        max_retries: 3,
        ..SettlementConfig::default()
    };
    let scheduler = game_with_ledger(ledger.clone(), settlement, Outcome::Red);
    scheduler.tick_at(t0());
    let wager = assert_ok!(scheduler.place_wager_at("A", Outcome::Red, dec!(10), at(1)));

    ledger.fail_all_credits();
    scheduler.tick_at(at(60));
    for s in 0..3 {
        scheduler.retry_settlements_at(at(70 + s));
    }

    let alerts = scheduler.settlement_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].wager_id, wager.id);
    assert_eq!(alerts[0].attempts, 3);
    assert!(scheduler.pending_retries().is_empty());
    // One attempt during settlement plus three retries.
    assert_eq!(ledger.credit_attempts(), 4);
    assert_eq!(scheduler.wagers_for("A")[0].result, WagerResult::Pending);
    assert_eq!(ledger.balance("A").unwrap(), dec!(90));
}

#[test]
fn test_rounds_keep_cycling_with_history_newest_first() {
    let g = game(dec!(100), &[Outcome::Red, Outcome::Green, Outcome::Violet]);
    let mut now = t0();
    for _ in 0..3 {
        g.scheduler.tick_at(now);
        now += chrono::Duration::seconds(60);
        g.scheduler.tick_at(now);
        now += chrono::Duration::seconds(5);
    }

    let history = g.scheduler.recent_rounds(10);
    let summary: Vec<(u64, Outcome)> = history.iter().map(|e| (e.round_number, e.outcome)).collect();
    assert_eq!(
        summary,
        vec![(3, Outcome::Violet), (2, Outcome::Green), (1, Outcome::Red)]
    );
    assert_eq!(g.scheduler.recent_rounds(2).len(), 2);
    assert_eq!(g.journal.entries().len(), 9);
}
