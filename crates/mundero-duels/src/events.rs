//! Change notification for duel consumers
//!
//! Every committed mutation produces exactly one [`DuelEvent`]. Consumers
//! either register a callback ([`ChangeNotifier::subscribe`]) or take a
//! broadcast receiver ([`ChangeNotifier::subscribe_channel`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::duel::DuelStatus;
use crate::{DuelId, InvitationId, UserId};

/// Events emitted after duel state changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DuelEvent {
    DuelCreated {
        duel_id: DuelId,
        invitation_id: InvitationId,
        challenger_id: UserId,
        opponent_id: UserId,
        timestamp: DateTime<Utc>,
    },

    InvitationAccepted {
        duel_id: DuelId,
        invitation_id: InvitationId,
        timestamp: DateTime<Utc>,
    },

    InvitationDeclined {
        duel_id: DuelId,
        invitation_id: InvitationId,
        timestamp: DateTime<Utc>,
    },

    /// An accept attempt found the response window already closed
    InvitationExpired {
        duel_id: DuelId,
        invitation_id: InvitationId,
        timestamp: DateTime<Utc>,
    },

    DuelCancelled {
        duel_id: DuelId,
        cancelled_by: UserId,
        previous_status: DuelStatus,
        timestamp: DateTime<Utc>,
    },

    ProgressUpdated {
        duel_id: DuelId,
        user_id: UserId,
        value: u64,
        timestamp: DateTime<Utc>,
    },

    SpectatorJoined {
        duel_id: DuelId,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    SpectatorLeft {
        duel_id: DuelId,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// One sweep tick's worth of finalized duels and expired invitations
    SweepCompleted {
        finished: Vec<DuelId>,
        expired: Vec<InvitationId>,
        timestamp: DateTime<Utc>,
    },
}

impl DuelEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DuelCreated { .. } => "duel_created",
            Self::InvitationAccepted { .. } => "invitation_accepted",
            Self::InvitationDeclined { .. } => "invitation_declined",
            Self::InvitationExpired { .. } => "invitation_expired",
            Self::DuelCancelled { .. } => "duel_cancelled",
            Self::ProgressUpdated { .. } => "progress_updated",
            Self::SpectatorJoined { .. } => "spectator_joined",
            Self::SpectatorLeft { .. } => "spectator_left",
            Self::SweepCompleted { .. } => "sweep_completed",
        }
    }
}

type Callback = Arc<dyn Fn(&DuelEvent) + Send + Sync>;

struct Listeners {
    next_id: AtomicU64,
    callbacks: RwLock<HashMap<u64, Callback>>,
}

/// Fan-out point for [`DuelEvent`]s
pub struct ChangeNotifier {
    listeners: Arc<Listeners>,
    channel: broadcast::Sender<DuelEvent>,
}

impl ChangeNotifier {
    pub fn new(buffer: usize) -> Self {
        let (channel, _) = broadcast::channel(buffer.max(1));
        Self {
            listeners: Arc::new(Listeners {
                next_id: AtomicU64::new(1),
                callbacks: RwLock::new(HashMap::new()),
            }),
            channel,
        }
    }

    /// Register a callback; it stays attached while the returned handle lives
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DuelEvent) + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.callbacks.write().insert(id, Arc::new(callback));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscribe_channel(&self) -> broadcast::Receiver<DuelEvent> {
        self.channel.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.callbacks.read().len() + self.channel.receiver_count()
    }

    /// Deliver an event to every subscriber
    pub fn notify(&self, event: DuelEvent) {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking
        let callbacks: Vec<Callback> = self.listeners.callbacks.read().values().cloned().collect();
        for callback in callbacks {
            callback(&event);
        }
        // Ignore send errors (no receivers)
        let _ = self.channel.send(event);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Handle returned by [`ChangeNotifier::subscribe`]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.callbacks.write().remove(&self.id);
        }
    }
}
