//! # Duel Model
//!
//! Records owned by the [`DuelStore`](crate::DuelStore) and the transition
//! rules between their states.
//!
//! ## Duel Lifecycle
//!
//! ```text
//!           accept                 time expiry
//! Pending ─────────► Active ───────────────────► Finished
//!    │                  │
//!    │ decline/expiry   │ cancel
//!    ▼                  ▼
//! Cancelled ◄──────────┘
//! ```
//!
//! `Finished` and `Cancelled` are terminal: nothing mutates a duel after it
//! reaches either of them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{DuelCategory, DuelDifficulty, DuelMetric, DuelTemplate};
use crate::error::{DuelError, DuelResult};
use crate::reputation::ReputationEvent;
use crate::{DuelId, InvitationId, UserId};

// ============================================================================
// Status
// ============================================================================

/// Duel lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelStatus {
    /// Waiting for the opponent to answer the invitation
    Pending,
    /// Both parties are competing
    Active,
    /// Time window elapsed, result computed
    Finished,
    /// Declined, expired or cancelled by a participant
    Cancelled,
}

impl DuelStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    pub fn valid_transitions(&self) -> &'static [DuelStatus] {
        match self {
            Self::Pending => &[Self::Active, Self::Cancelled],
            Self::Active => &[Self::Finished, Self::Cancelled],
            Self::Finished | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: DuelStatus) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Invitation lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    /// Response window elapsed without an answer
    Expired,
    /// The challenger cancelled the duel before an answer
    Withdrawn,
}

// ============================================================================
// Rewards & Progress
// ============================================================================

/// Point amounts fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewards {
    pub winner: u64,
    pub participant: u64,
}

impl Rewards {
    /// Base payout (100 / 40) scaled by the difficulty multiplier
    pub fn for_difficulty(difficulty: DuelDifficulty) -> Self {
        let multiplier = difficulty.reward_multiplier();
        Self {
            winner: 100 * multiplier / 100,
            participant: 40 * multiplier / 100,
        }
    }
}

/// Cumulative metric count for one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub current: u64,
    pub last_updated: DateTime<Utc>,
    /// Every value `current` has taken, starting at 0
    pub milestones: Vec<u64>,
}

impl ProgressRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current: 0,
            last_updated: now,
            milestones: vec![0],
        }
    }

    fn record(&mut self, value: u64, now: DateTime<Utc>) {
        self.current = value;
        self.last_updated = now;
        self.milestones.push(value);
    }
}

/// Result of a finished duel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DuelOutcome {
    Victory { winner: UserId, loser: UserId },
    Draw { participants: [UserId; 2] },
}

impl DuelOutcome {
    /// Point awards implied by this outcome
    pub fn payouts(&self, rewards: &Rewards) -> Vec<(UserId, ReputationEvent, u64)> {
        match self {
            Self::Victory { winner, loser } => vec![
                (winner.clone(), ReputationEvent::DuelWon, rewards.winner),
                (loser.clone(), ReputationEvent::DuelLost, rewards.participant),
            ],
            Self::Draw { participants } => participants
                .iter()
                .map(|p| (p.clone(), ReputationEvent::DuelDrawn, rewards.participant))
                .collect(),
        }
    }
}

// ============================================================================
// Duel
// ============================================================================

/// A timed 1v1 competition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duel {
    pub id: DuelId,
    pub challenger_id: UserId,
    pub opponent_id: UserId,
    pub objective: String,
    pub metric: DuelMetric,
    pub duration_hours: u32,
    pub status: DuelStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: BTreeMap<UserId, ProgressRecord>,
    pub winner_id: Option<UserId>,
    pub is_draw: bool,
    pub rewards: Rewards,
    pub category: DuelCategory,
    pub difficulty: DuelDifficulty,
    pub is_public: bool,
    pub spectators: BTreeSet<UserId>,
    /// Catalog slug of the template this duel was created from
    pub template: String,
}

impl Duel {
    /// Seed a pending duel from a template
    ///
    /// Callers must have checked that `challenger != opponent`.
    pub fn from_template(
        template: &DuelTemplate,
        challenger: UserId,
        opponent: UserId,
        is_public: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let mut progress = BTreeMap::new();
        progress.insert(challenger.clone(), ProgressRecord::new(now));
        progress.insert(opponent.clone(), ProgressRecord::new(now));

        Self {
            id: DuelId::new(),
            challenger_id: challenger,
            opponent_id: opponent,
            objective: template.objective.clone(),
            metric: template.metric,
            duration_hours: template.duration_hours,
            status: DuelStatus::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            progress,
            winner_id: None,
            is_draw: false,
            rewards: template.rewards,
            category: template.category,
            difficulty: template.difficulty,
            is_public,
            spectators: BTreeSet::new(),
            template: template.slug.clone(),
        }
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.challenger_id == *user || self.opponent_id == *user
    }

    pub fn opponent_of(&self, user: &UserId) -> Option<&UserId> {
        if self.challenger_id == *user {
            Some(&self.opponent_id)
        } else if self.opponent_id == *user {
            Some(&self.challenger_id)
        } else {
            None
        }
    }

    pub fn progress_of(&self, user: &UserId) -> Option<&ProgressRecord> {
        self.progress.get(user)
    }

    pub fn current_of(&self, user: &UserId) -> u64 {
        self.progress_of(user).map(|p| p.current).unwrap_or(0)
    }

    /// `None` if the hour count does not fit a [`Duration`]
    pub fn duration(&self) -> Option<Duration> {
        Duration::try_hours(self.duration_hours as i64)
    }

    /// When the time window closes
    ///
    /// `None` until started, or when the window runs past the representable
    /// date range.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.started_at?.checked_add_signed(self.duration()?)
    }

    /// Active and past its time window
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DuelStatus::Active && self.ends_at().is_some_and(|end| now >= end)
    }

    fn transition(&mut self, target: DuelStatus, action: &'static str) -> DuelResult<()> {
        if !self.status.can_transition_to(target) {
            return Err(DuelError::InvalidTransition {
                from: self.status,
                action,
            });
        }
        self.status = target;
        Ok(())
    }

    /// Pending → Active
    pub fn activate(&mut self, now: DateTime<Utc>) -> DuelResult<()> {
        self.transition(DuelStatus::Active, "activate")?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Pending → Cancelled after a declined or expired invitation
    pub fn abandon(&mut self) -> DuelResult<()> {
        if self.status != DuelStatus::Pending {
            return Err(DuelError::InvalidTransition {
                from: self.status,
                action: "abandon",
            });
        }
        self.transition(DuelStatus::Cancelled, "abandon")
    }

    /// Pending/Active → Cancelled at a participant's request
    pub fn cancel(&mut self, requester: &UserId) -> DuelResult<()> {
        if !self.is_participant(requester) {
            return Err(DuelError::NotParticipant {
                duel: self.id,
                user: requester.clone(),
            });
        }
        self.transition(DuelStatus::Cancelled, "cancel")
    }

    /// Overwrite a participant's cumulative value and append a milestone
    pub fn record_progress(
        &mut self,
        user: &UserId,
        value: u64,
        now: DateTime<Utc>,
        allow_decrease: bool,
    ) -> DuelResult<()> {
        if self.status != DuelStatus::Active {
            return Err(DuelError::InvalidTransition {
                from: self.status,
                action: "update progress of",
            });
        }

        if self.is_due(now) {
            return Err(DuelError::WindowClosed(self.id));
        }

        let duel = self.id;
        let record = self.progress.get_mut(user).ok_or_else(|| DuelError::NotParticipant {
            duel,
            user: user.clone(),
        })?;

        if value < record.current && !allow_decrease {
            return Err(DuelError::ProgressRegression {
                current: record.current,
                attempted: value,
            });
        }

        record.record(value, now);
        Ok(())
    }

    /// Close the duel if its window has elapsed
    ///
    /// Returns `None` when the duel is not due (including when it is already
    /// finished), so a duel can never be finalized twice.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Option<DuelOutcome> {
        if !self.is_due(now) {
            return None;
        }

        let challenger = self.current_of(&self.challenger_id);
        let opponent = self.current_of(&self.opponent_id);

        let outcome = match challenger.cmp(&opponent) {
            std::cmp::Ordering::Greater => DuelOutcome::Victory {
                winner: self.challenger_id.clone(),
                loser: self.opponent_id.clone(),
            },
            std::cmp::Ordering::Less => DuelOutcome::Victory {
                winner: self.opponent_id.clone(),
                loser: self.challenger_id.clone(),
            },
            std::cmp::Ordering::Equal => DuelOutcome::Draw {
                participants: [self.challenger_id.clone(), self.opponent_id.clone()],
            },
        };

        match &outcome {
            DuelOutcome::Victory { winner, .. } => {
                self.winner_id = Some(winner.clone());
                self.is_draw = false;
            }
            DuelOutcome::Draw { .. } => {
                self.winner_id = None;
                self.is_draw = true;
            }
        }
        self.status = DuelStatus::Finished;
        self.finished_at = Some(now);

        Some(outcome)
    }

    /// Outcome of a finished duel
    pub fn outcome(&self) -> Option<DuelOutcome> {
        if self.status != DuelStatus::Finished {
            return None;
        }
        if self.is_draw {
            return Some(DuelOutcome::Draw {
                participants: [self.challenger_id.clone(), self.opponent_id.clone()],
            });
        }
        let winner = self.winner_id.clone()?;
        let loser = self.opponent_of(&winner)?.clone();
        Some(DuelOutcome::Victory { winner, loser })
    }

    /// Points credited to `user` by this duel (0 unless finished)
    pub fn points_for(&self, user: &UserId) -> u64 {
        self.outcome()
            .map(|outcome| {
                outcome
                    .payouts(&self.rewards)
                    .into_iter()
                    .filter(|(recipient, _, _)| recipient == user)
                    .map(|(_, _, points)| points)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Returns `true` if the spectator was newly added
    pub fn add_spectator(&mut self, user: UserId) -> DuelResult<bool> {
        if !self.is_public || self.status != DuelStatus::Active {
            return Err(DuelError::SpectatingClosed(self.id));
        }
        if self.is_participant(&user) {
            return Err(DuelError::ParticipantCannotSpectate);
        }
        Ok(self.spectators.insert(user))
    }

    /// Returns `true` if the spectator was present
    pub fn remove_spectator(&mut self, user: &UserId) -> bool {
        self.spectators.remove(user)
    }
}

// ============================================================================
// Invitation
// ============================================================================

/// Handshake gating a pending duel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelInvitation {
    pub id: InvitationId,
    pub duel_id: DuelId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl DuelInvitation {
    pub fn for_duel(duel: &Duel, message: Option<String>, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: InvitationId::new(),
            duel_id: duel.id,
            from_user_id: duel.challenger_id.clone(),
            to_user_id: duel.opponent_id.clone(),
            status: InvitationStatus::Pending,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            responded_at: None,
            message,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending
    }

    /// Still pending but past its response window
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now >= self.expires_at
    }

    fn resolve(&mut self, status: InvitationStatus, now: DateTime<Utc>) -> DuelResult<()> {
        if !self.is_pending() {
            return Err(DuelError::InvitationNotPending(self.id));
        }
        self.status = status;
        self.responded_at = Some(now);
        Ok(())
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> DuelResult<()> {
        self.resolve(InvitationStatus::Accepted, now)
    }

    pub fn decline(&mut self, now: DateTime<Utc>) -> DuelResult<()> {
        self.resolve(InvitationStatus::Declined, now)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> DuelResult<()> {
        self.resolve(InvitationStatus::Expired, now)
    }

    pub fn withdraw(&mut self, now: DateTime<Utc>) -> DuelResult<()> {
        self.resolve(InvitationStatus::Withdrawn, now)
    }
}
