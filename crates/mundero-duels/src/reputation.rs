//! Reputation sink - where duel outcomes turn into points
//!
//! The duel core never owns point balances. It hands each payout to a
//! [`ReputationSink`] on a background task and moves on; delivery failures
//! are retried a bounded number of times and then logged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::catalog::DuelMetric;
use crate::{DuelId, UserId};

/// Reputation sink errors
#[derive(Debug, Clone, Error)]
pub enum ReputationError {
    #[error("Reputation service unavailable: {0}")]
    Unavailable(String),

    #[error("Award rejected: {0}")]
    Rejected(String),
}

/// Kind of reputation event produced by a duel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationEvent {
    DuelWon,
    DuelLost,
    DuelDrawn,
}

impl ReputationEvent {
    pub fn action_key(&self) -> &'static str {
        match self {
            Self::DuelWon => "duel_won",
            Self::DuelLost => "duel_lost",
            Self::DuelDrawn => "duel_drawn",
        }
    }
}

/// Data attached to an award
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardPayload {
    pub duel_id: DuelId,
    pub metric: DuelMetric,
    pub points: u64,
}

/// Receives point awards when duels conclude
#[async_trait]
pub trait ReputationSink: Send + Sync {
    async fn award(
        &self,
        user_id: &UserId,
        event: ReputationEvent,
        payload: AwardPayload,
    ) -> Result<(), ReputationError>;
}

/// Logged award
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardRecord {
    pub user_id: UserId,
    pub event: ReputationEvent,
    pub payload: AwardPayload,
    pub recorded_at: DateTime<Utc>,
}

/// In-process point ledger
#[derive(Debug, Default)]
pub struct InMemoryReputation {
    balances: RwLock<HashMap<UserId, u64>>,
    log: RwLock<Vec<AwardRecord>>,
}

impl InMemoryReputation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points_of(&self, user: &UserId) -> u64 {
        self.balances.read().get(user).copied().unwrap_or(0)
    }

    pub fn awards(&self) -> Vec<AwardRecord> {
        self.log.read().clone()
    }

    pub fn award_count(&self) -> usize {
        self.log.read().len()
    }
}

#[async_trait]
impl ReputationSink for InMemoryReputation {
    async fn award(
        &self,
        user_id: &UserId,
        event: ReputationEvent,
        payload: AwardPayload,
    ) -> Result<(), ReputationError> {
        *self.balances.write().entry(user_id.clone()).or_insert(0) += payload.points;
        self.log.write().push(AwardRecord {
            user_id: user_id.clone(),
            event,
            payload,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

/// One payout waiting to be delivered
#[derive(Debug, Clone)]
pub(crate) struct PendingAward {
    pub user_id: UserId,
    pub event: ReputationEvent,
    pub payload: AwardPayload,
}

/// Deliver awards with bounded retry
///
/// Returns the number of awards that were delivered.
pub(crate) async fn deliver_awards(
    sink: Arc<dyn ReputationSink>,
    awards: Vec<PendingAward>,
    attempts: u32,
    backoff: impl Fn(u32) -> std::time::Duration,
) -> usize {
    let attempts = attempts.max(1);
    let mut delivered = 0;

    for award in awards {
        for attempt in 1..=attempts {
            match sink
                .award(&award.user_id, award.event, award.payload.clone())
                .await
            {
                Ok(()) => {
                    debug!(
                        user_id = %award.user_id,
                        duel_id = %award.payload.duel_id,
                        points = award.payload.points,
                        event = award.event.action_key(),
                        "Reward delivered"
                    );
                    delivered += 1;
                    break;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        user_id = %award.user_id,
                        duel_id = %award.payload.duel_id,
                        attempt,
                        error = %e,
                        "Reward delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => {
                    error!(
                        user_id = %award.user_id,
                        duel_id = %award.payload.duel_id,
                        points = award.payload.points,
                        error = %e,
                        "Reward delivery abandoned"
                    );
                }
            }
        }
    }

    delivered
}
