use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal_macros::dec;

use mundero_duels::{
    AwardPayload, DuelConfig, DuelDifficulty, DuelError, DuelEvent, DuelId, DuelMetric, DuelService,
    DuelStatus, DuelStore, DuelTemplate, InMemoryReputation, InvitationStatus, ManualClock,
    ReputationError, ReputationEvent, ReputationSink, Rewards, StaticIdentity, UserId,
};

struct World {
    service: DuelService,
    store: Arc<DuelStore>,
    clock: ManualClock,
    ledger: Arc<InMemoryReputation>,
}

fn world() -> World {
    let clock = ManualClock::default();
    let ledger = Arc::new(InMemoryReputation::new());
    let config = DuelConfig {
        reward_retry_backoff_ms: 1,
        ..Default::default()
    };
    let store = Arc::new(DuelStore::new(config, Arc::new(clock.clone()), ledger.clone()));
    let service = DuelService::new(store.clone(), Arc::new(StaticIdentity::new(a())));
    World {
        service,
        store,
        clock,
        ledger,
    }
}

fn a() -> UserId {
    UserId::new("A")
}

fn b() -> UserId {
    UserId::new("B")
}

fn likes_template() -> DuelTemplate {
    DuelTemplate::custom(
        "Most likes in 24 hours",
        DuelMetric::LikesReceived,
        24,
        DuelDifficulty::Easy,
        Some(Rewards {
            winner: 150,
            participant: 50,
        }),
    )
}

fn start_duel(w: &World, challenger: UserId, opponent: UserId) -> DuelId {
    let (duel, invitation) = w
        .service
        .create_duel(&likes_template(), challenger, opponent, None)
        .unwrap();
    w.service.accept_invitation(&invitation.id).unwrap();
    duel.id
}

async fn wait_for_awards(ledger: &InMemoryReputation, expected: usize) {
    for _ in 0..100 {
        if ledger.award_count() >= expected {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_winner_takes_winner_reward() {
    let w = world();
    let (duel, invitation) = w
        .service
        .create_duel(&likes_template(), a(), b(), Some("Bring it".to_string()))
        .unwrap();
    assert_eq!(duel.status, DuelStatus::Pending);
    assert_eq!(invitation.status, InvitationStatus::Pending);

    let active = w.service.accept_invitation(&invitation.id).unwrap();
    assert_eq!(active.status, DuelStatus::Active);
    assert!(active.started_at.is_some());

    w.service.update_progress(&duel.id, &a(), 10).unwrap();
    w.service.update_progress(&duel.id, &b(), 7).unwrap();

    w.clock.advance(Duration::hours(24) + Duration::seconds(1));
    w.store.sweep();

    let finished = w.service.get_duel(&duel.id).unwrap();
    assert_eq!(finished.status, DuelStatus::Finished);
    assert_eq!(finished.winner_id, Some(a()));
    assert!(!finished.is_draw);

    assert_eq!(w.service.get_user_stats(&a()).total_points_earned, 150);
    assert_eq!(w.service.get_user_stats(&b()).total_points_earned, 50);

    wait_for_awards(&w.ledger, 2).await;
    assert_eq!(w.ledger.points_of(&a()), 150);
    assert_eq!(w.ledger.points_of(&b()), 50);
}

#[tokio::test]
async fn test_equal_progress_is_a_draw() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    w.service.update_progress(&duel_id, &a(), 5).unwrap();
    w.service.update_progress(&duel_id, &b(), 5).unwrap();

    w.clock.advance(Duration::hours(24) + Duration::seconds(1));
    w.store.sweep();

    let duel = w.service.get_duel(&duel_id).unwrap();
    assert!(duel.is_draw);
    assert!(duel.winner_id.is_none());

    wait_for_awards(&w.ledger, 2).await;
    assert_eq!(w.ledger.points_of(&a()), 50);
    assert_eq!(w.ledger.points_of(&b()), 50);
    assert!(w
        .ledger
        .awards()
        .iter()
        .all(|award| award.event == ReputationEvent::DuelDrawn));
}

#[test]
fn test_declined_duel_rejects_progress() {
    let w = world();
    let (duel, invitation) = w.service.create_duel(&likes_template(), a(), b(), None).unwrap();

    w.service.decline_invitation(&invitation.id).unwrap();

    assert_eq!(w.service.get_duel(&duel.id).unwrap().status, DuelStatus::Cancelled);
    assert_eq!(
        w.store.get_invitation(&invitation.id).unwrap().status,
        InvitationStatus::Declined
    );
    let result = w.service.update_progress(&duel.id, &a(), 3);
    assert!(matches!(result, Err(DuelError::InvalidTransition { .. })));
    assert!(result.unwrap_err().is_rejection());
}

#[test]
fn test_spectator_added_once() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    let c = UserId::new("C");

    assert!(w.service.add_spectator(&duel_id, &c).unwrap());
    assert!(!w.service.add_spectator(&duel_id, &c).unwrap());

    let duel = w.service.get_duel(&duel_id).unwrap();
    assert_eq!(duel.spectators.iter().filter(|s| **s == c).count(), 1);
}

#[test]
fn test_non_participant_cannot_cancel() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    let before = w.service.get_duel(&duel_id).unwrap();

    let result = w.service.cancel_duel(&duel_id, &UserId::new("D"));
    assert!(matches!(result, Err(DuelError::NotParticipant { .. })));
    assert_eq!(w.service.get_duel(&duel_id).unwrap(), before);
}

#[test]
fn test_stats_count_every_duel_but_rate_only_finished() {
    let w = world();
    let opponents = ["B", "C", "D"];
    let scores = [(9, 1), (4, 2), (3, 3)];
    for (opponent, (mine, theirs)) in opponents.iter().zip(scores) {
        let duel_id = start_duel(&w, a(), UserId::new(*opponent));
        w.service.update_progress(&duel_id, &a(), mine).unwrap();
        w.service.update_progress(&duel_id, &UserId::new(*opponent), theirs).unwrap();
    }
    w.clock.advance(Duration::hours(25));
    assert_eq!(w.store.sweep().finished.len(), 3);

    start_duel(&w, UserId::new("E"), a());

    let stats = w.service.get_user_stats(&a());
    assert_eq!(stats.total_duels, 4);
    assert_eq!(stats.active_duels, 1);
    assert_eq!((stats.wins, stats.losses, stats.draws), (2, 0, 1));
    assert_eq!(stats.win_rate, dec!(66.7));
    assert_eq!(stats.total_points_earned, 150 + 150 + 50);
}

#[test]
fn test_progress_keys_stay_fixed() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    let _ = w.service.update_progress(&duel_id, &UserId::new("intruder"), 4);
    w.service.update_progress(&duel_id, &b(), 1).unwrap();
    w.service.cancel_duel(&duel_id, &b()).unwrap();

    let duel = w.service.get_duel(&duel_id).unwrap();
    let keys: Vec<&UserId> = duel.progress.keys().collect();
    assert_eq!(keys, vec![&a(), &b()]);
}

#[test]
fn test_terminal_states_are_sticky() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    w.clock.advance(Duration::hours(25));
    w.store.sweep();
    let finished = w.service.get_duel(&duel_id).unwrap();
    let invitation = w.store.invitation_for_duel(&duel_id).unwrap();

    assert!(w.service.update_progress(&duel_id, &a(), 1).is_err());
    assert!(w.service.accept_invitation(&invitation.id).is_err());
    assert!(w.service.decline_invitation(&invitation.id).is_err());
    assert!(w.service.cancel_duel(&duel_id, &a()).is_err());
    assert_eq!(w.service.get_duel(&duel_id).unwrap(), finished);
}

#[test]
fn test_finished_duels_have_exactly_one_result() {
    let w = world();
    for (x, y) in [(3, 1), (2, 2), (0, 7)] {
        let duel_id = start_duel(&w, a(), b());
        w.service.update_progress(&duel_id, &a(), x).unwrap();
        w.service.update_progress(&duel_id, &b(), y).unwrap();
    }
    w.clock.advance(Duration::hours(25));
    w.store.sweep();

    for duel in w.service.list_duels(&Default::default()) {
        assert_eq!(duel.status, DuelStatus::Finished);
        assert!(duel.winner_id.is_some() != duel.is_draw);
    }
}

#[tokio::test]
async fn test_double_sweep_pays_once() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    w.service.update_progress(&duel_id, &a(), 2).unwrap();

    w.clock.advance(Duration::hours(25));
    assert_eq!(w.store.sweep().finished, vec![duel_id]);
    let after_first = w.service.get_duel(&duel_id).unwrap();

    w.clock.advance(Duration::hours(1));
    assert!(w.store.sweep().is_empty());
    assert_eq!(w.service.get_duel(&duel_id).unwrap(), after_first);

    wait_for_awards(&w.ledger, 2).await;
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert_eq!(w.ledger.award_count(), 2);
}

#[test]
fn test_time_window_edges() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());

    w.clock.advance(Duration::hours(24) - Duration::seconds(1));
    assert!(w.store.sweep().finished.is_empty());
    assert_eq!(w.service.get_duel(&duel_id).unwrap().status, DuelStatus::Active);

    w.clock.advance(Duration::seconds(2));
    assert_eq!(w.store.sweep().finished, vec![duel_id]);
}

#[test]
fn test_duration_must_be_positive_and_bounded() {
    let w = world();

    let mut instant = likes_template();
    instant.duration_hours = 0;
    assert!(matches!(
        w.service.create_duel(&instant, a(), b(), None),
        Err(DuelError::InvalidDuration { hours: 0, .. })
    ));

    let endless = DuelTemplate::custom("Endless", DuelMetric::LikesReceived, u32::MAX, DuelDifficulty::Easy, None);
    let err = w.service.create_duel(&endless, a(), b(), None).unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(w.store.duel_count(), 0);

    // The sweep keeps resolving other duels
    let duel_id = start_duel(&w, a(), b());
    w.clock.advance(Duration::hours(25));
    assert_eq!(w.store.sweep().finished, vec![duel_id]);
}

#[test]
fn test_counters_near_u64_limits() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    w.service.update_progress(&duel_id, &a(), u64::MAX - 1).unwrap();

    let duel = w.service.get_duel(&duel_id).unwrap();
    let view = w.service.duel_progress(&duel, Some(&b()));
    assert_eq!(view.difference, i64::MIN);
    assert!(!view.is_winning);
    assert_eq!(w.service.lead_indicator(&duel).leader(), Some(&a()));
    assert!(w.service.velocity(&duel, &a()).is_some());
    assert_eq!(w.service.predict(&duel).predicted_winner, Some(a()));

    w.service.update_progress(&duel_id, &b(), u64::MAX).unwrap();
    w.clock.advance(Duration::hours(25));
    w.store.sweep();
    let finished = w.service.get_duel(&duel_id).unwrap();
    assert_eq!(finished.winner_id, Some(b()));
}

#[test]
fn test_sync_sweep_still_pays_out() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    w.service.update_progress(&duel_id, &a(), 10).unwrap();

    w.clock.advance(Duration::hours(25));
    assert_eq!(w.store.sweep().finished, vec![duel_id]);

    for _ in 0..100 {
        if w.ledger.award_count() >= 2 {
            break;
        }
        std::thread::sleep(StdDuration::from_millis(10));
    }
    assert_eq!(w.ledger.points_of(&a()), 150);
    assert_eq!(w.ledger.points_of(&b()), 50);
}

#[test]
fn test_milestones_accumulate() {
    let w = world();
    let duel_id = start_duel(&w, a(), b());
    let values = [1, 4, 9, 16, 25];
    for value in values {
        w.service.update_progress(&duel_id, &a(), value).unwrap();
    }

    let duel = w.service.get_duel(&duel_id).unwrap();
    let milestones = &duel.progress_of(&a()).unwrap().milestones;
    assert_eq!(milestones.len(), values.len() + 1);
    assert_eq!(milestones[0], 0);
    assert!(milestones.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_unanswered_invitation_expires() {
    let w = world();
    let (duel, invitation) = w.service.create_duel(&likes_template(), a(), b(), None).unwrap();

    w.clock.advance(Duration::hours(24) + Duration::minutes(1));
    let report = w.store.sweep();
    assert_eq!(report.expired, vec![invitation.id]);
    assert_eq!(w.service.get_duel(&duel.id).unwrap().status, DuelStatus::Cancelled);
    assert!(matches!(
        w.service.accept_invitation(&invitation.id),
        Err(DuelError::InvitationNotPending(_))
    ));
}

#[test]
fn test_subscribers_see_each_mutation() {
    let w = world();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let subscription = w.service.subscribe(move |event| {
        if !matches!(event, DuelEvent::SweepCompleted { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let duel_id = start_duel(&w, a(), b());
    w.service.update_progress(&duel_id, &a(), 1).unwrap();
    w.service.cancel_duel(&duel_id, &a()).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 4);

    drop(subscription);
    start_duel(&w, a(), b());
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

struct BrokenSink {
    calls: AtomicUsize,
}

#[async_trait]
impl ReputationSink for BrokenSink {
    async fn award(
        &self,
        _user_id: &UserId,
        _event: ReputationEvent,
        _payload: AwardPayload,
    ) -> Result<(), ReputationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ReputationError::Unavailable("maintenance".to_string()))
    }
}

#[tokio::test]
async fn test_sink_failure_does_not_block_finish() {
    let clock = ManualClock::default();
    let sink = Arc::new(BrokenSink {
        calls: AtomicUsize::new(0),
    });
    let config = DuelConfig {
        reward_retry_attempts: 2,
        reward_retry_backoff_ms: 1,
        ..Default::default()
    };
    let store = Arc::new(DuelStore::new(config, Arc::new(clock.clone()), sink.clone()));
    let service = DuelService::new(store.clone(), Arc::new(StaticIdentity::anonymous()));

    let (duel, invitation) = service.create_duel(&likes_template(), a(), b(), None).unwrap();
    service.accept_invitation(&invitation.id).unwrap();
    clock.advance(Duration::hours(25));
    store.sweep();

    assert_eq!(service.get_duel(&duel.id).unwrap().status, DuelStatus::Finished);

    for _ in 0..100 {
        if sink.calls.load(Ordering::SeqCst) >= 4 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
}
