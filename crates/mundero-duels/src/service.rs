//! # Duel Service
//!
//! Command/query façade used by UI code. Commands delegate to the
//! [`DuelStore`]; queries aggregate store snapshots into stats, leaderboards
//! and display heuristics.
//!
//! "Who is asking" comes from an injected [`IdentityProvider`] rather than
//! being looked up here.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::{DuelMetric, DuelTemplate, TemplateCatalog};
use crate::duel::{Duel, DuelInvitation, DuelOutcome, DuelStatus};
use crate::error::{DuelError, DuelResult};
use crate::events::{DuelEvent, Subscription};
use crate::insights::{LeadIndicator, OutcomePrediction, ProgressView, TimeRemaining, Velocity};
use crate::store::DuelStore;
use crate::{DuelId, InvitationId, UserId};

// ============================================================================
// Identity
// ============================================================================

/// Supplies the id of the user driving the current request
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// Fixed, swappable identity
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user: RwLock<Option<UserId>>,
}

impl StaticIdentity {
    pub fn new(user: UserId) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn set(&self, user: Option<UserId>) {
        *self.user.write() = user;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.read().clone()
    }
}

// ============================================================================
// Query types
// ============================================================================

/// Filters for [`DuelService::list_duels`]; empty matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuelFilter {
    pub user: Option<UserId>,
    pub status: Option<DuelStatus>,
}

impl DuelFilter {
    pub fn for_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_status(mut self, status: DuelStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Aggregate duel record for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDuelStats {
    /// Every duel the user takes part in, any status
    pub total_duels: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    /// Wins over finished duels, percent with one decimal
    pub win_rate: Decimal,
    pub total_points_earned: u64,
    pub active_duels: u64,
}

/// Leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: UserId,
    pub points: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
}

#[derive(Default)]
struct Tally {
    points: u64,
    wins: u64,
    losses: u64,
    draws: u64,
}

// ============================================================================
// Service
// ============================================================================

/// Duel command/query façade
pub struct DuelService {
    store: Arc<DuelStore>,
    identity: Arc<dyn IdentityProvider>,
    catalog: TemplateCatalog,
}

impl DuelService {
    pub fn new(store: Arc<DuelStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            catalog: TemplateCatalog::builtin(),
        }
    }

    pub fn with_catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn store(&self) -> &Arc<DuelStore> {
        &self.store
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.identity.current_user_id()
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Create a public duel and invite the opponent
    pub fn create_duel(
        &self,
        template: &DuelTemplate,
        challenger: UserId,
        opponent: UserId,
        message: Option<String>,
    ) -> DuelResult<(Duel, DuelInvitation)> {
        self.create_duel_with(template, challenger, opponent, message, true)
    }

    pub fn create_duel_with(
        &self,
        template: &DuelTemplate,
        challenger: UserId,
        opponent: UserId,
        message: Option<String>,
        is_public: bool,
    ) -> DuelResult<(Duel, DuelInvitation)> {
        self.store
            .create_duel(template, challenger, opponent, message, is_public)
    }

    pub fn create_duel_from_slug(
        &self,
        slug: &str,
        challenger: UserId,
        opponent: UserId,
        message: Option<String>,
    ) -> DuelResult<(Duel, DuelInvitation)> {
        let template = self
            .catalog
            .get(slug)
            .ok_or_else(|| DuelError::UnknownTemplate(slug.to_string()))?
            .clone();
        self.create_duel(&template, challenger, opponent, message)
    }

    pub fn accept_invitation(&self, invitation_id: &InvitationId) -> DuelResult<Duel> {
        self.store.accept_invitation(invitation_id)
    }

    pub fn decline_invitation(&self, invitation_id: &InvitationId) -> DuelResult<Duel> {
        self.store.decline_invitation(invitation_id)
    }

    pub fn cancel_duel(&self, duel_id: &DuelId, requester: &UserId) -> DuelResult<Duel> {
        self.store.cancel_duel(duel_id, requester)
    }

    pub fn update_progress(&self, duel_id: &DuelId, user: &UserId, value: u64) -> DuelResult<()> {
        self.store.update_progress(duel_id, user, value)
    }

    pub fn add_spectator(&self, duel_id: &DuelId, user: &UserId) -> DuelResult<bool> {
        self.store.add_spectator(duel_id, user)
    }

    pub fn remove_spectator(&self, duel_id: &DuelId, user: &UserId) -> DuelResult<bool> {
        self.store.remove_spectator(duel_id, user)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn get_duel(&self, duel_id: &DuelId) -> Option<Duel> {
        self.store.get_duel(duel_id)
    }

    /// Matching duels, newest first
    pub fn list_duels(&self, filter: &DuelFilter) -> Vec<Duel> {
        self.store.list_duels(filter.user.as_ref(), filter.status)
    }

    /// The current user's duels; empty when nobody is signed in
    pub fn my_duels(&self, status: Option<DuelStatus>) -> Vec<Duel> {
        match self.current_user() {
            Some(user) => self.store.list_duels(Some(&user), status),
            None => Vec::new(),
        }
    }

    /// Open invitations addressed to the current user
    pub fn my_invitations(&self) -> Vec<DuelInvitation> {
        match self.current_user() {
            Some(user) => self.store.pending_invitations_for(&user),
            None => Vec::new(),
        }
    }

    pub fn get_user_stats(&self, user: &UserId) -> UserDuelStats {
        let duels = self.store.list_duels(Some(user), None);

        let mut stats = UserDuelStats {
            total_duels: duels.len() as u64,
            wins: 0,
            losses: 0,
            draws: 0,
            win_rate: Decimal::ZERO,
            total_points_earned: 0,
            active_duels: 0,
        };

        let mut finished = 0u64;
        for duel in &duels {
            match duel.status {
                DuelStatus::Active => stats.active_duels += 1,
                DuelStatus::Finished => {
                    finished += 1;
                    match duel.outcome() {
                        Some(DuelOutcome::Draw { .. }) => stats.draws += 1,
                        Some(DuelOutcome::Victory { winner, .. }) if winner == *user => stats.wins += 1,
                        Some(DuelOutcome::Victory { .. }) => stats.losses += 1,
                        None => {}
                    }
                    stats.total_points_earned += duel.points_for(user);
                }
                DuelStatus::Pending | DuelStatus::Cancelled => {}
            }
        }

        if finished > 0 {
            stats.win_rate = (Decimal::from(stats.wins * 100) / Decimal::from(finished)).round_dp(1);
        }
        stats
    }

    /// Users ranked by points earned in finished duels, wins breaking ties
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut tallies: HashMap<UserId, Tally> = HashMap::new();

        for duel in self.store.list_duels(None, Some(DuelStatus::Finished)) {
            let Some(outcome) = duel.outcome() else {
                continue;
            };
            for (user, _, points) in outcome.payouts(&duel.rewards) {
                let tally = tallies.entry(user.clone()).or_default();
                tally.points += points;
                match &outcome {
                    DuelOutcome::Draw { .. } => tally.draws += 1,
                    DuelOutcome::Victory { winner, .. } if *winner == user => tally.wins += 1,
                    DuelOutcome::Victory { .. } => tally.losses += 1,
                }
            }
        }

        let mut rows: Vec<(UserId, Tally)> = tallies.into_iter().collect();
        rows.sort_by(|(a_user, a), (b_user, b)| {
            b.points
                .cmp(&a.points)
                .then_with(|| b.wins.cmp(&a.wins))
                .then_with(|| a_user.cmp(b_user))
        });

        rows.into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (user_id, tally))| LeaderboardEntry {
                rank: i as u32 + 1,
                user_id,
                points: tally.points,
                wins: tally.wins,
                losses: tally.losses,
                draws: tally.draws,
            })
            .collect()
    }

    /// Standing of `user`, or of the current user when `None`
    pub fn duel_progress(&self, duel: &Duel, user: Option<&UserId>) -> ProgressView {
        match user {
            Some(user) => ProgressView::of(duel, user),
            None => self
                .current_user()
                .map(|user| ProgressView::of(duel, &user))
                .unwrap_or_default(),
        }
    }

    pub fn time_remaining(&self, duel: &Duel) -> TimeRemaining {
        TimeRemaining::at(duel, self.store.now())
    }

    pub fn lead_indicator(&self, duel: &Duel) -> LeadIndicator {
        LeadIndicator::of(duel)
    }

    pub fn velocity(&self, duel: &Duel, user: &UserId) -> Option<Velocity> {
        duel.progress_of(user).map(Velocity::of)
    }

    pub fn predict(&self, duel: &Duel) -> OutcomePrediction {
        OutcomePrediction::for_duel(duel)
    }

    // ------------------------------------------------------------------------
    // Catalogs & notifications
    // ------------------------------------------------------------------------

    pub fn templates(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn metrics(&self) -> &'static [DuelMetric] {
        &DuelMetric::ALL
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DuelEvent) + Send + Sync + 'static,
    {
        self.store.notifier().subscribe(callback)
    }
}
