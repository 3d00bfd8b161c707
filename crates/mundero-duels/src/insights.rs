//! # Duel Insights
//!
//! Read-only views computed from a [`Duel`] snapshot for display: per-user
//! progress, time remaining, lead bands, velocity and a naive outcome
//! prediction.
//!
//! None of these feed back into resolution. A duel's winner is decided only
//! by the final `current` values when the store finalizes it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::duel::{Duel, ProgressRecord};
use crate::UserId;

// ============================================================================
// Progress
// ============================================================================

/// One participant's standing against the other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressView {
    pub current: u64,
    pub opponent: u64,
    pub is_winning: bool,
    /// `current - opponent`, saturated to the `i64` range
    pub difference: i64,
}

impl ProgressView {
    /// Standing of `user`; all zeros if `user` is not a participant
    pub fn of(duel: &Duel, user: &UserId) -> Self {
        let Some(opponent_id) = duel.opponent_of(user) else {
            return Self::default();
        };
        let current = duel.current_of(user);
        let opponent = duel.current_of(opponent_id);
        Self {
            current,
            opponent,
            is_winning: current > opponent,
            difference: (i128::from(current) - i128::from(opponent))
                .clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64,
        }
    }
}

// ============================================================================
// Time
// ============================================================================

/// Countdown for a duel's time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRemaining {
    pub hours: i64,
    pub minutes: i64,
    pub is_expired: bool,
    /// Elapsed share of the window, 0-100
    pub percentage: Decimal,
}

impl TimeRemaining {
    pub fn at(duel: &Duel, now: DateTime<Utc>) -> Self {
        let (Some(started), Some(ends)) = (duel.started_at, duel.ends_at()) else {
            return Self {
                hours: 0,
                minutes: 0,
                is_expired: true,
                percentage: Decimal::ZERO,
            };
        };

        let total_ms = (ends - started).num_milliseconds();
        let elapsed_ms = (now - started).num_milliseconds();
        let percentage = if total_ms > 0 {
            (Decimal::from(elapsed_ms) * dec!(100) / Decimal::from(total_ms))
                .max(Decimal::ZERO)
                .min(dec!(100))
                .round_dp(1)
        } else {
            dec!(100)
        };

        let remaining = ends - now;
        if remaining <= chrono::Duration::zero() {
            return Self {
                hours: 0,
                minutes: 0,
                is_expired: true,
                percentage,
            };
        }

        Self {
            hours: remaining.num_hours(),
            minutes: remaining.num_minutes() % 60,
            is_expired: false,
            percentage,
        }
    }
}

// ============================================================================
// Lead
// ============================================================================

/// Qualitative gap between the two participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "band", rename_all = "snake_case")]
pub enum LeadIndicator {
    Tie,
    /// Ahead by exactly one
    NarrowLead { leader: UserId },
    Ahead { leader: UserId, by: u64 },
    /// Ahead by five or more
    Dominant { leader: UserId, by: u64 },
}

impl LeadIndicator {
    pub fn of(duel: &Duel) -> Self {
        let challenger = duel.current_of(&duel.challenger_id);
        let opponent = duel.current_of(&duel.opponent_id);
        let (leader, by) = match challenger.cmp(&opponent) {
            std::cmp::Ordering::Equal => return Self::Tie,
            std::cmp::Ordering::Greater => (duel.challenger_id.clone(), challenger - opponent),
            std::cmp::Ordering::Less => (duel.opponent_id.clone(), opponent - challenger),
        };

        match by {
            1 => Self::NarrowLead { leader },
            by if by >= 5 => Self::Dominant { leader, by },
            by => Self::Ahead { leader, by },
        }
    }

    pub fn leader(&self) -> Option<&UserId> {
        match self {
            Self::Tie => None,
            Self::NarrowLead { leader } | Self::Ahead { leader, .. } | Self::Dominant { leader, .. } => {
                Some(leader)
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Tie => "It's a tie!".to_string(),
            Self::NarrowLead { leader } => format!("{leader} has a narrow lead"),
            Self::Ahead { leader, by } => format!("{leader} is ahead by {by}"),
            Self::Dominant { leader, by } => format!("{leader} is dominating by {by}"),
        }
    }
}

// ============================================================================
// Velocity
// ============================================================================

/// Recent pace of one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Velocity {
    Accelerating,
    HighPace,
    Progressing,
    Flat,
    Decelerating,
}

impl Velocity {
    const WINDOW: usize = 3;

    /// Classify the trailing window of a milestone history
    pub fn from_milestones(milestones: &[u64]) -> Self {
        let window = &milestones[milestones.len().saturating_sub(Self::WINDOW)..];
        let (Some(&first), Some(&last)) = (window.first(), window.last()) else {
            return Self::Flat;
        };
        if last < first {
            return Self::Decelerating;
        }

        let delta = last - first;
        if delta >= 10 {
            return Self::Accelerating;
        }
        if delta >= 5 {
            return Self::HighPace;
        }

        if let &[a, b, c] = window {
            let earlier = b.saturating_sub(a);
            let latest = c.saturating_sub(b);
            if latest.saturating_mul(2) < earlier {
                return Self::Decelerating;
            }
        }

        if delta >= 1 {
            Self::Progressing
        } else {
            Self::Flat
        }
    }

    pub fn of(record: &ProgressRecord) -> Self {
        Self::from_milestones(&record.milestones)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accelerating => "Accelerating",
            Self::HighPace => "High pace",
            Self::Progressing => "Progressing",
            Self::Flat => "Flat",
            Self::Decelerating => "Slowing down",
        }
    }
}

// ============================================================================
// Prediction
// ============================================================================

/// Linear-extrapolation guess at the winner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomePrediction {
    /// `None` predicts a tie
    pub predicted_winner: Option<UserId>,
    /// 50-95
    pub confidence: Decimal,
    pub challenger_velocity: Decimal,
    pub opponent_velocity: Decimal,
}

impl OutcomePrediction {
    const TIE_GAP: Decimal = dec!(0.1);
    const BASE_CONFIDENCE: Decimal = dec!(50);
    const MAX_CONFIDENCE: Decimal = dec!(95);

    pub fn for_duel(duel: &Duel) -> Self {
        let challenger_velocity = Self::velocity_of(duel.progress_of(&duel.challenger_id));
        let opponent_velocity = Self::velocity_of(duel.progress_of(&duel.opponent_id));
        let gap = (challenger_velocity - opponent_velocity).abs();

        if gap < Self::TIE_GAP {
            return Self {
                predicted_winner: None,
                confidence: Self::BASE_CONFIDENCE,
                challenger_velocity,
                opponent_velocity,
            };
        }

        let predicted_winner = if challenger_velocity > opponent_velocity {
            duel.challenger_id.clone()
        } else {
            duel.opponent_id.clone()
        };
        let confidence = (Self::BASE_CONFIDENCE + gap * dec!(10))
            .min(Self::MAX_CONFIDENCE)
            .round_dp(1);

        Self {
            predicted_winner: Some(predicted_winner),
            confidence,
            challenger_velocity,
            opponent_velocity,
        }
    }

    /// `(current - milestones[0]) / milestone count`
    fn velocity_of(record: Option<&ProgressRecord>) -> Decimal {
        let Some(record) = record else {
            return Decimal::ZERO;
        };
        let Some(&start) = record.milestones.first() else {
            return Decimal::ZERO;
        };
        let gained = Decimal::from(record.current) - Decimal::from(start);
        gained / Decimal::from(record.milestones.len() as u64)
    }
}
