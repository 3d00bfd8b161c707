//! Synthetic duel activity against a virtual clock

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use mundero_duels::{
    Clock, DuelConfig, DuelService, DuelStatus, DuelStore, InMemoryReputation, LeaderboardEntry,
    ManualClock, StaticIdentity, UserDuelStats, UserId,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub players: usize,
    pub duels: usize,
    pub hours: i64,
    pub step_minutes: i64,
    /// Percent
    pub accept_rate: u32,
    pub seed: u64,
    pub top: usize,
}

#[derive(Debug, Serialize)]
pub struct PlayerReport {
    pub user_id: UserId,
    pub stats: UserDuelStats,
    /// Points the reputation ledger actually received
    pub ledger_points: u64,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub simulated_until: DateTime<Utc>,
    pub events_seen: usize,
    pub duels_by_status: BTreeMap<String, usize>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub players: Vec<PlayerReport>,
}

pub struct Simulator {
    params: SimulationParams,
    clock: ManualClock,
    ledger: Arc<InMemoryReputation>,
    store: Arc<DuelStore>,
    service: DuelService,
    players: Vec<UserId>,
}

impl Simulator {
    pub fn new(config: DuelConfig, params: SimulationParams) -> Self {
        let clock = ManualClock::default();
        let ledger = Arc::new(InMemoryReputation::new());
        let store = Arc::new(DuelStore::new(config, Arc::new(clock.clone()), ledger.clone()));

        let players: Vec<UserId> = (1..=params.players)
            .map(|i| UserId::new(format!("player-{i:02}")))
            .collect();
        let identity = Arc::new(
            players
                .first()
                .cloned()
                .map(StaticIdentity::new)
                .unwrap_or_default(),
        );
        let service = DuelService::new(store.clone(), identity);

        Self {
            params,
            clock,
            ledger,
            store,
            service,
            players,
        }
    }

    pub fn store(&self) -> &Arc<DuelStore> {
        &self.store
    }

    pub async fn run(&self) -> anyhow::Result<SimulationReport> {
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        let _subscription = self.service.subscribe(move |event| {
            counter.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event = event.event_type(), "Duel event");
        });

        self.store.start()?;
        self.seed_duels(&mut rng)?;

        let step = Duration::minutes(self.params.step_minutes);
        let end = self.clock.now() + Duration::hours(self.params.hours);
        while self.clock.now() < end {
            self.clock.advance(step);
            self.tick(&mut rng);

            let report = self.store.sweep();
            if !report.is_empty() {
                tracing::info!(
                    at = %self.clock.now(),
                    finished = report.finished.len(),
                    expired = report.expired.len(),
                    "Sweep resolved duels"
                );
            }
            tokio::task::yield_now().await;
        }

        // Let reward deliveries drain
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        self.store.stop().await;

        Ok(self.report(events.load(Ordering::Relaxed)))
    }

    fn seed_duels(&self, rng: &mut StdRng) -> anyhow::Result<()> {
        let templates = self.service.templates().list_all();

        for _ in 0..self.params.duels {
            let mut pair = self.players.choose_multiple(rng, 2);
            let (Some(challenger), Some(opponent)) = (pair.next(), pair.next()) else {
                continue;
            };
            let Some(template) = templates.choose(rng) else {
                anyhow::bail!("template catalog is empty");
            };

            let is_public = rng.gen_bool(0.7);
            let (duel, invitation) = self.service.create_duel_with(
                template,
                challenger.clone(),
                opponent.clone(),
                Some(format!("{} - you're on!", template.objective)),
                is_public,
            )?;

            if rng.gen_range(0..100) < self.params.accept_rate {
                self.service.accept_invitation(&invitation.id)?;
                if is_public {
                    let watcher = self
                        .players
                        .iter()
                        .find(|p| !duel.is_participant(p))
                        .cloned();
                    if let Some(watcher) = watcher {
                        self.service.add_spectator(&duel.id, &watcher)?;
                    }
                }
            } else {
                self.service.decline_invitation(&invitation.id)?;
            }
        }

        Ok(())
    }

    /// Random activity for every active duel
    fn tick(&self, rng: &mut StdRng) {
        for duel in self.service.list_duels(&Default::default()) {
            if duel.status != DuelStatus::Active {
                continue;
            }
            for user in [&duel.challenger_id, &duel.opponent_id] {
                if !rng.gen_bool(0.4) {
                    continue;
                }
                let value = duel.current_of(user) + rng.gen_range(1..=3);
                match self.service.update_progress(&duel.id, user, value) {
                    Ok(()) => {}
                    Err(e) if e.is_rejection() => {
                        tracing::debug!(duel_id = %duel.id, user_id = %user, error = %e, "Progress rejected");
                    }
                    Err(e) => {
                        tracing::warn!(duel_id = %duel.id, user_id = %user, error = %e, "Progress update failed");
                    }
                }
            }

            if let Some(updated) = self.service.get_duel(&duel.id) {
                tracing::debug!(
                    duel_id = %duel.id,
                    lead = %self.service.lead_indicator(&updated).message(),
                    confidence = %self.service.predict(&updated).confidence,
                    remaining_hours = self.service.time_remaining(&updated).hours,
                    "Duel standing"
                );
            }
        }
    }

    fn report(&self, events_seen: usize) -> SimulationReport {
        let mut duels_by_status = BTreeMap::new();
        for duel in self.service.list_duels(&Default::default()) {
            *duels_by_status.entry(format!("{:?}", duel.status)).or_insert(0) += 1;
        }

        let players = self
            .players
            .iter()
            .map(|user| PlayerReport {
                user_id: user.clone(),
                stats: self.service.get_user_stats(user),
                ledger_points: self.ledger.points_of(user),
            })
            .collect();

        SimulationReport {
            seed: self.params.seed,
            simulated_until: self.clock.now(),
            events_seen,
            duels_by_status,
            leaderboard: self.service.leaderboard(self.params.top),
            players,
        }
    }
}
