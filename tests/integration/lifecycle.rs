//! Round lifecycle scenarios: start, end, scoring, prizes, retries.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use roundkeeper::engine::lifecycle::RankingSource;
use roundkeeper::engine::{DistributionOutcome, TransitionOutcome, UniverseLocker};
use roundkeeper::scoring::SlotMultipliers;
use roundkeeper::storage::ScoreRow;
use roundkeeper::types::{EntryStatus, Ineligible, RosterError, RoundStatus, SettlementError};

use crate::harness::*;

// ---------------------------------------------------------------------------
// End-to-end rounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fifty_thirty_twenty_payout() {
    let h = Harness::new(unit_multipliers()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Confirmed, 1).await;
    h.enter(&round, "carol", roster_with("LTC"), EntryStatus::Confirmed, 2).await;

    let started = h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    assert_eq!(started, TransitionOutcome::Transitioned);

    h.set_price("LINK", dec!(112.5));
    h.set_price("TRX", dec!(104));
    h.set_price("LTC", dec!(97));

    let ended = h.lifecycle.end_round(&round.id, round_end() + Duration::hours(2)).await.unwrap();
    assert_eq!(ended, TransitionOutcome::Transitioned);

    let ranked = h.store.ranked_teams(&round.id).await.unwrap();
    let scores: Vec<Decimal> = ranked.iter().map(|t| t.total_score).collect();
    assert_eq!(scores, vec![dec!(12.5), dec!(4), dec!(-3)]);
    assert_eq!(ranked[0].participant_id, "alice");

    let record = h.store.prize_record(&round.id).await.unwrap().unwrap();
    let amounts: Vec<Decimal> = record.prizes.iter().map(|p| p.amount).collect();
    assert_eq!(amounts, vec![dec!(5.0), dec!(3.0), dec!(2.0)]);
    assert_eq!(record.total_paid, dec!(10.0));

    let done = h.store.require_round(&round.id).await.unwrap();
    assert_eq!(done.status, RoundStatus::Completed);
    assert!(done.distributed);
}

#[tokio::test]
async fn test_feed_miss_contributes_zero() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();

    for symbol in FLAT.iter().chain(MOVERS.iter()) {
        h.set_price(symbol, dec!(110));
    }
    h.feed.hide(&asset_id("LINK"));

    let ended = h.lifecycle.end_round(&round.id, round_end()).await.unwrap();
    assert_eq!(ended, TransitionOutcome::Transitioned);

    // +10% on nine assets: 2.0 + 4*1.2 + 3*1.3 + 1.5 = 12.2 → 122; LINK adds 0.
    let ranked = h.store.ranked_teams(&round.id).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].total_score, dec!(122));

    let entries = h.store.draft_entries(&round.id).await.unwrap();
    let link = entries.iter().find(|e| e.symbol.as_str() == "LINK").unwrap();
    assert_eq!(link.price_at_end, None);
}

#[tokio::test]
async fn test_start_failure_does_not_block_end() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let now = round_end() + Duration::hours(2);

    let r2 = h.weekly_round().await;
    h.enter(&r2, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.lifecycle.start_round(&r2.id, round_start()).await.unwrap();

    let r1 = h.round(now - Duration::hours(2), now + Duration::days(5), dec!(10)).await;

    h.feed.set_top_assets_down(true);
    h.set_price("LINK", dec!(150));

    let starts = h.orchestrator.start_due_rounds(now).await.unwrap();
    assert!(starts.succeeded.is_empty());
    assert_eq!(starts.errors.len(), 1);
    assert_eq!(starts.errors[0].round_id, r1.id);
    assert_eq!(starts.errors[0].kind, "upstream_unavailable");
    assert!(starts.errors[0].retryable);

    let ends = h.orchestrator.end_due_rounds(now).await.unwrap();
    assert_eq!(ends.succeeded, vec![r2.id.clone()]);
    assert!(ends.errors.is_empty());

    let r1_now = h.store.require_round(&r1.id).await.unwrap();
    assert_eq!(r1_now.status, RoundStatus::Pending);
    assert!(!h.store.is_universe_locked(&r1.id).await.unwrap());

    let r2_now = h.store.require_round(&r2.id).await.unwrap();
    assert_eq!(r2_now.status, RoundStatus::Completed);
    assert!(r2_now.distributed);

    // Feed recovers; the next tick picks R1 up.
    h.feed.set_top_assets_down(false);
    let retry = h.orchestrator.start_due_rounds(now + Duration::minutes(5)).await.unwrap();
    assert_eq!(retry.succeeded, vec![r1.id.clone()]);
    assert_eq!(h.store.require_round(&r1.id).await.unwrap().status, RoundStatus::Active);
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_and_end_are_idempotent() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;

    assert_eq!(
        h.lifecycle.start_round(&round.id, round_start()).await.unwrap(),
        TransitionOutcome::Transitioned
    );
    assert_eq!(
        h.lifecycle.start_round(&round.id, round_start()).await.unwrap(),
        TransitionOutcome::AlreadyProcessed
    );
    assert_eq!(h.feed.top_asset_calls(), 1);

    assert_eq!(
        h.lifecycle.end_round(&round.id, round_end()).await.unwrap(),
        TransitionOutcome::Transitioned
    );
    assert_eq!(
        h.lifecycle.end_round(&round.id, round_end()).await.unwrap(),
        TransitionOutcome::AlreadyProcessed
    );
    assert_eq!(h.feed.market_data_calls(), 1);
    assert_eq!(h.prize_record_count(&round.id).await, 1);

    // A second scheduler pass finds nothing due.
    let again = h.orchestrator.end_due_rounds(round_end()).await.unwrap();
    assert_eq!(again.total(), 0);
}

#[tokio::test]
async fn test_transitions_respect_the_clock() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;

    let early = h.lifecycle.start_round(&round.id, round_start() - Duration::minutes(1)).await;
    assert!(matches!(
        early,
        Err(SettlementError::NotEligible { reason: Ineligible::NotStarted { .. }, .. })
    ));

    let not_active = h.lifecycle.end_round(&round.id, round_end()).await;
    assert!(matches!(
        not_active,
        Err(SettlementError::NotEligible { reason: Ineligible::NotActive { .. }, .. })
    ));

    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    let not_ended = h.lifecycle.end_round(&round.id, round_end() - Duration::seconds(1)).await;
    assert!(matches!(
        not_ended,
        Err(SettlementError::NotEligible { reason: Ineligible::NotEnded { .. }, .. })
    ));
    assert_eq!(h.store.require_round(&round.id).await.unwrap().status, RoundStatus::Active);
}

#[tokio::test]
async fn test_end_failure_leaves_round_active() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();

    h.feed.set_market_data_down(true);
    let failed = h.lifecycle.end_round(&round.id, round_end()).await;
    assert!(matches!(failed, Err(SettlementError::UpstreamUnavailable(_))));

    let still = h.store.require_round(&round.id).await.unwrap();
    assert_eq!(still.status, RoundStatus::Active);
    assert!(!still.distributed);
    assert!(!h.store.has_end_snapshot(&round.id).await.unwrap());

    h.feed.set_market_data_down(false);
    assert_eq!(
        h.lifecycle.end_round(&round.id, round_end()).await.unwrap(),
        TransitionOutcome::Transitioned
    );
}

// ---------------------------------------------------------------------------
// Universe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_locked_universe_is_immutable() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    let before = h.store.draft_entries(&round.id).await.unwrap();
    assert_eq!(before.len(), 12);

    // The market reshuffles.
    h.feed.relist(&[("shiny-coin", "SHINY"), ("btc-coin", "BTC")]);
    h.set_price("BTC", dec!(5));

    let locker = UniverseLocker::new(h.store.clone(), h.feed.clone(), 100, std::time::Duration::from_secs(1));
    let relock = locker.lock(&round.id, round_start() + Duration::hours(1)).await;
    assert!(matches!(relock, Err(SettlementError::AlreadyLocked(_))));
    assert_eq!(h.feed.top_asset_calls(), 1);

    let after = h.store.draft_entries(&round.id).await.unwrap();
    assert_eq!(before, after);
    let btc = after.iter().find(|e| e.symbol.as_str() == "BTC").unwrap();
    assert_eq!(btc.price_at_lock, Some(dec!(100)));
    assert_eq!(btc.market_cap_rank, Some(1));
}

// ---------------------------------------------------------------------------
// Scoring properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_final_ranking_is_deterministic() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Confirmed, 1).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    h.set_price("LINK", dec!(90));
    h.set_price("TRX", dec!(133.3));
    h.set_price("BTC", dec!(101.7));
    let now = round_end();
    h.lifecycle.end_round(&round.id, now).await.unwrap();

    // Live prices move after the end; the final ranking must not.
    h.set_price("LINK", dec!(500));

    let first = h.lifecycle.compute_ranking(&round.id, true, now).await.unwrap();
    let second = h.lifecycle.compute_ranking(&round.id, false, now).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.source, RankingSource::FinalSnapshot);

    let persisted = h.store.ranked_teams(&round.id).await.unwrap();
    let recomputed: Vec<_> = first.teams.iter().map(|s| s.team.clone()).collect();
    assert_eq!(recomputed, persisted);
    assert_eq!(persisted[0].participant_id, "bob");
}

#[tokio::test]
async fn test_dense_ranking_with_ties() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    // carol and dave hold identical rosters; dave submitted first.
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Confirmed, 1).await;
    h.enter(&round, "dave", roster_with("LTC"), EntryStatus::Confirmed, 2).await;
    h.enter(&round, "carol", roster_with("LTC"), EntryStatus::Confirmed, 3).await;
    h.enter(&round, "erin", roster_with("LINK"), EntryStatus::Confirmed, 4).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    h.set_price("TRX", dec!(120));
    h.set_price("LTC", dec!(110));
    h.lifecycle.end_round(&round.id, round_end()).await.unwrap();

    let ranked = h.store.ranked_teams(&round.id).await.unwrap();
    let ranks: Vec<u32> = ranked.iter().map(|t| t.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    let order: Vec<&str> = ranked.iter().map(|t| t.participant_id.as_str()).collect();
    assert_eq!(order, vec!["bob", "dave", "carol", "alice", "erin"]);
}

#[tokio::test]
async fn test_zero_start_price_contributes_zero() {
    let h = Harness::new(SlotMultipliers::default()).await;
    h.set_price("LINK", Decimal::ZERO);
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();

    h.set_price("LINK", dec!(50));
    h.lifecycle.end_round(&round.id, round_end()).await.unwrap();

    let ranked = h.store.ranked_teams(&round.id).await.unwrap();
    assert_eq!(ranked[0].total_score, Decimal::ZERO);
}

#[tokio::test]
async fn test_malformed_roster_excluded_not_fatal() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    let bad = h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Confirmed, 1).await;

    sqlx::query("UPDATE rosters SET symbols = ?1 WHERE id = ?2")
        .bind(r#"["BTC","BTC"]"#)
        .bind(&bad.id)
        .execute(h.store.pool())
        .await
        .unwrap();

    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    h.set_price("TRX", dec!(101));
    assert_eq!(
        h.lifecycle.end_round(&round.id, round_end()).await.unwrap(),
        TransitionOutcome::Transitioned
    );

    let ranked = h.store.ranked_teams(&round.id).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].participant_id, "bob");

    let alice = h.store.roster_for(&round.id, "alice").await.unwrap().unwrap();
    assert_eq!(alice.total_score, Some(Decimal::ZERO));
    assert_eq!(alice.rank, None);

    let record = h.store.prize_record(&round.id).await.unwrap().unwrap();
    assert_eq!(record.prizes.len(), 1);
    assert_eq!(record.prizes[0].amount, dec!(5));
}

#[tokio::test]
async fn test_live_ranking_persists_while_active() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Confirmed, 1).await;

    let pending = h.lifecycle.compute_ranking(&round.id, true, draft_day()).await;
    assert!(matches!(
        pending,
        Err(SettlementError::NotEligible { reason: Ineligible::NotActive { .. }, .. })
    ));

    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    h.set_price("LINK", dec!(120));
    let midweek = round_start() + Duration::days(2);

    let live = h.lifecycle.compute_ranking(&round.id, true, midweek).await.unwrap();
    assert_eq!(live.source, RankingSource::Live);
    assert_eq!(live.teams[0].team.participant_id, "alice");
    assert_eq!(live.teams[0].team.total_score, dec!(30));
    assert_eq!(live.teams[0].breakdown.len(), 10);

    let calls = h.feed.market_data_calls();
    let stored = h.lifecycle.compute_ranking(&round.id, false, midweek).await.unwrap();
    assert_eq!(stored.source, RankingSource::Persisted);
    assert_eq!(h.feed.market_data_calls(), calls);
    let stored_teams: Vec<_> = stored.teams.iter().map(|s| s.team.clone()).collect();
    let live_teams: Vec<_> = live.teams.iter().map(|s| s.team.clone()).collect();
    assert_eq!(stored_teams, live_teams);

    // An outage mid-week changes nothing stored.
    h.feed.set_market_data_down(true);
    let down = h.lifecycle.compute_ranking(&round.id, true, midweek).await;
    assert!(matches!(down, Err(SettlementError::UpstreamUnavailable(_))));
    assert_eq!(h.store.ranked_teams(&round.id).await.unwrap(), stored_teams);
}

// ---------------------------------------------------------------------------
// Entries & rosters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unconfirmed_entries_do_not_score_until_confirmed() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Pending, 1).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();

    let live = h.lifecycle.compute_ranking(&round.id, true, round_start()).await.unwrap();
    assert_eq!(live.teams.len(), 1);

    let status = h.lifecycle.confirm_entry("entry-bob", Some("sig-123")).await.unwrap();
    assert_eq!(status, EntryStatus::Confirmed);
    let again = h.lifecycle.confirm_entry("entry-bob", None).await.unwrap();
    assert_eq!(again, EntryStatus::Confirmed);
    assert!(matches!(
        h.lifecycle.confirm_entry("entry-nobody", None).await,
        Err(SettlementError::EntryNotFound(_))
    ));

    let live = h.lifecycle.compute_ranking(&round.id, true, round_start()).await.unwrap();
    assert_eq!(live.teams.len(), 2);
}

#[tokio::test]
async fn test_roster_submission_guards() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;

    let weekday = h
        .lifecycle
        .submit_roster(&round.id, "alice", "Alice", roster_with("LINK"), round_start() + Duration::days(1))
        .await;
    assert!(matches!(
        weekday,
        Err(SettlementError::NotEligible { reason: Ineligible::EditWindowClosed, .. })
    ));

    let mut short = roster_with("LINK");
    short.pop();
    let malformed = h.lifecycle.submit_roster(&round.id, "alice", "Alice", short, draft_day()).await;
    assert!(matches!(malformed, Err(SettlementError::MalformedRoster { .. })));

    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    let late = h
        .lifecycle
        .submit_roster(&round.id, "alice", "Alice", roster_with("LINK"), round_end())
        .await;
    assert!(matches!(
        late,
        Err(SettlementError::NotEligible {
            reason: Ineligible::DraftClosed { status: RoundStatus::Active },
            ..
        })
    ));
    assert!(h.store.roster_for(&round.id, "alice").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Prizes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_distribution_exactly_once() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Confirmed, 1).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    h.lifecycle.end_round(&round.id, round_end()).await.unwrap();

    let stored = h.store.prize_record(&round.id).await.unwrap().unwrap();
    let outcome = h.lifecycle.distribute_prizes(&round.id, round_end()).await.unwrap();
    assert_eq!(outcome, DistributionOutcome::AlreadyRecorded(stored.clone()));
    assert_eq!(h.prize_record_count(&round.id).await, 1);
    assert!(stored.total_paid <= round.prize_pool);
    assert!(h.store.require_round(&round.id).await.unwrap().distributed);
}

#[tokio::test]
async fn test_recovery_distribution_for_undistributed_round() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    let alice = h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();

    // Completed with a ranking but without its payout.
    let rows = vec![ScoreRow { roster_id: alice.id.clone(), total_score: dec!(3), rank: Some(1) }];
    assert!(h.store.finalize_round(&round.id, &rows, None, round_end()).await.unwrap());

    let preview = h.lifecycle.calculate_prize_distribution(&round.id).await.unwrap();
    assert_eq!(preview.total_paid, dec!(5));
    assert!(!preview.distributed);
    assert_eq!(h.prize_record_count(&round.id).await, 0);

    let first = h.lifecycle.distribute_prizes(&round.id, round_end()).await.unwrap();
    assert!(matches!(first, DistributionOutcome::Recorded(_)));
    let second = h.lifecycle.distribute_prizes(&round.id, round_end()).await.unwrap();
    assert_eq!(second, DistributionOutcome::AlreadyRecorded(first.record().clone()));
    assert_eq!(h.prize_record_count(&round.id).await, 1);
}

#[tokio::test]
async fn test_round_without_teams_completes_undistributed() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Failed, 0).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();

    assert_eq!(
        h.lifecycle.end_round(&round.id, round_end()).await.unwrap(),
        TransitionOutcome::Transitioned
    );
    let done = h.store.require_round(&round.id).await.unwrap();
    assert_eq!(done.status, RoundStatus::Completed);
    assert!(!done.distributed);

    let pay = h.lifecycle.distribute_prizes(&round.id, round_end()).await;
    assert!(matches!(
        pay,
        Err(SettlementError::NotEligible { reason: Ineligible::NoRankedTeams, .. })
    ));
    let preview = h.lifecycle.calculate_prize_distribution(&round.id).await;
    assert!(matches!(preview, Err(SettlementError::NotEligible { .. })));
    assert_eq!(h.prize_record_count(&round.id).await, 0);
}

#[tokio::test]
async fn test_distribute_before_completion_is_refused() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    h.lifecycle.compute_ranking(&round.id, true, round_start()).await.unwrap();

    let early = h.lifecycle.distribute_prizes(&round.id, round_start()).await;
    assert!(matches!(
        early,
        Err(SettlementError::NotEligible { reason: Ineligible::NotCompleted { .. }, .. })
    ));
    assert_eq!(h.prize_record_count(&round.id).await, 0);
}

#[tokio::test]
async fn test_late_confirmation_does_not_change_final_ranking() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Pending, 1).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    h.set_price("TRX", dec!(150));
    h.lifecycle.end_round(&round.id, round_end()).await.unwrap();

    // Bob's payment clears after the round has paid out.
    h.lifecycle.confirm_entry("entry-bob", Some("sig-late")).await.unwrap();

    let persisted = h.store.ranked_teams(&round.id).await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].participant_id, "alice");

    for live in [false, true] {
        let report = h.lifecycle.compute_ranking(&round.id, live, round_end()).await.unwrap();
        let teams: Vec<_> = report.teams.iter().map(|s| s.team.clone()).collect();
        assert_eq!(teams, persisted);
        assert_eq!(report.teams[0].breakdown.len(), 10);
        assert_eq!(report.last_updated, Some(round_end()));
    }

    let record = h.store.prize_record(&round.id).await.unwrap().unwrap();
    assert_eq!(record.prizes.len(), 1);
    assert_eq!(record.prizes[0].participant_id, "alice");
}

#[tokio::test]
async fn test_persisted_ranking_reports_scoring_time() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();

    let before = h.lifecycle.compute_ranking(&round.id, false, round_start()).await.unwrap();
    assert_eq!(before.last_updated, None);

    let scored_at = round_start() + Duration::hours(6);
    h.lifecycle.compute_ranking(&round.id, true, scored_at).await.unwrap();

    let later = scored_at + Duration::days(1);
    let stored = h.lifecycle.compute_ranking(&round.id, false, later).await.unwrap();
    assert_eq!(stored.source, RankingSource::Persisted);
    assert_eq!(stored.last_updated, Some(scored_at));
}

// ---------------------------------------------------------------------------
// Draft universe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rosters_are_drafted_from_the_locked_universe() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    assert!(!h.store.is_universe_locked(&round.id).await.unwrap());

    let outsider = h
        .lifecycle
        .submit_roster(&round.id, "mallory", "Mallory", roster_with("NOTACOIN"), draft_day())
        .await;
    assert!(matches!(
        outsider,
        Err(SettlementError::MalformedRoster { source: RosterError::NotInUniverse(ref s), .. }) if s == "NOTACOIN"
    ));
    assert!(h.store.is_universe_locked(&round.id).await.unwrap());
    assert!(h.store.roster_for(&round.id, "mallory").await.unwrap().is_none());

    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Confirmed, 60).await;
    assert_eq!(h.feed.top_asset_calls(), 1);

    // TRX drops out of the top list before the round starts; bob's pick
    // keeps the price it was drafted at.
    let ids: Vec<String> = FLAT.iter().map(|s| asset_id(s)).collect();
    let listing: Vec<(&str, &str)> = ids.iter().map(String::as_str).zip(FLAT).collect();
    h.feed.relist(&listing);
    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    h.set_price("TRX", dec!(200));
    h.lifecycle.end_round(&round.id, round_end()).await.unwrap();

    // +100% in an attack slot.
    let ranked = h.store.ranked_teams(&round.id).await.unwrap();
    assert_eq!(ranked[0].participant_id, "bob");
    assert_eq!(ranked[0].total_score, dec!(150));
}

#[tokio::test]
async fn test_open_draft_freezes_universe_once() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;

    assert_eq!(
        h.lifecycle.open_draft(&round.id, draft_day()).await.unwrap(),
        TransitionOutcome::Transitioned
    );
    assert_eq!(
        h.lifecycle.open_draft(&round.id, draft_day()).await.unwrap(),
        TransitionOutcome::AlreadyProcessed
    );
    assert_eq!(h.feed.top_asset_calls(), 1);

    h.lifecycle.start_round(&round.id, round_start()).await.unwrap();
    assert_eq!(h.feed.top_asset_calls(), 1);
    assert!(matches!(
        h.lifecycle.open_draft(&round.id, round_start()).await,
        Err(SettlementError::NotEligible { reason: Ineligible::DraftClosed { .. }, .. })
    ));
}

// ---------------------------------------------------------------------------
// Overlapping triggers
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_transitions_apply_once() {
    let h = Harness::new(SlotMultipliers::default()).await;
    let round = h.weekly_round().await;
    h.enter(&round, "alice", roster_with("LINK"), EntryStatus::Confirmed, 0).await;
    h.enter(&round, "bob", roster_with("TRX"), EntryStatus::Confirmed, 1).await;

    let (a, b) = tokio::join!(
        h.lifecycle.start_round(&round.id, round_start()),
        h.lifecycle.start_round(&round.id, round_start()),
    );
    let starts = [a.unwrap(), b.unwrap()];
    assert_eq!(starts.iter().filter(|o| **o == TransitionOutcome::Transitioned).count(), 1);
    assert_eq!(starts.iter().filter(|o| **o == TransitionOutcome::AlreadyProcessed).count(), 1);

    h.set_price("LINK", dec!(120));
    let (a, b) = tokio::join!(
        h.lifecycle.end_round(&round.id, round_end()),
        h.lifecycle.end_round(&round.id, round_end()),
    );
    let ends = [a.unwrap(), b.unwrap()];
    assert_eq!(ends.iter().filter(|o| **o == TransitionOutcome::Transitioned).count(), 1);
    assert_eq!(ends.iter().filter(|o| **o == TransitionOutcome::AlreadyProcessed).count(), 1);

    assert_eq!(h.prize_record_count(&round.id).await, 1);
    let done = h.store.require_round(&round.id).await.unwrap();
    assert_eq!(done.status, RoundStatus::Completed);
    assert!(done.distributed);
}
