//! Mundero Duels - 1v1 competitions between portal members
//!
//! Two users compete on a single activity metric (likes received, posts
//! created, ...) over a bounded time window. The crate owns the full duel
//! lifecycle:
//!
//! - **Catalogs**: metric metadata and predefined duel templates
//! - **Invitations**: the accept/decline handshake gating a pending duel
//! - **Live progress**: cumulative per-participant counters with milestone history
//! - **Resolution sweep**: periodic finalization of elapsed duels and expiry
//!   of unanswered invitations
//! - **Rewards**: best-effort point payouts through a reputation sink
//! - **Insights**: lead, velocity and outcome prediction heuristics
//!
//! # Architecture
//!
//! ```text
//! UI ──► DuelService ──► DuelStore ──► ChangeNotifier ──► subscribers
//!                           │
//!                           ├── sweep task (every 30s)
//!                           └── ReputationSink (fire-and-forget)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mundero_duels::{DuelConfig, DuelService, DuelStore, InMemoryReputation, StaticIdentity, SystemClock, UserId};
//!
//! let store = Arc::new(DuelStore::new(
//!     DuelConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(InMemoryReputation::new()),
//! ));
//! store.start()?;
//!
//! let service = DuelService::new(store.clone(), Arc::new(StaticIdentity::new(UserId::new("alice"))));
//! let (duel, invitation) = service.create_duel_from_slug(
//!     "likes-sprint",
//!     UserId::new("alice"),
//!     UserId::new("bob"),
//!     Some("Think you can beat me?".to_string()),
//! )?;
//! service.accept_invitation(&invitation.id)?;
//! ```

pub mod catalog;
pub mod clock;
pub mod config;
pub mod duel;
pub mod error;
pub mod events;
pub mod insights;
pub mod reputation;
pub mod service;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use catalog::{DuelCategory, DuelDifficulty, DuelMetric, DuelTemplate, MetricInfo, TemplateCatalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DuelConfig;
pub use duel::{Duel, DuelInvitation, DuelOutcome, DuelStatus, InvitationStatus, ProgressRecord, Rewards};
pub use error::{DuelError, DuelResult, ErrorKind};
pub use events::{ChangeNotifier, DuelEvent, Subscription};
pub use insights::{LeadIndicator, OutcomePrediction, ProgressView, TimeRemaining, Velocity};
pub use reputation::{AwardPayload, InMemoryReputation, ReputationError, ReputationEvent, ReputationSink};
pub use service::{DuelFilter, DuelService, IdentityProvider, LeaderboardEntry, StaticIdentity, UserDuelStats};
pub use store::{DuelStore, StoreSnapshot, SweepReport};

// ============================================================================
// Identifiers
// ============================================================================

/// Identity of a portal member, as issued by the external identity provider
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Generates UUID-backed record identifiers
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }
    };
}

define_id_type!(DuelId, "duel", "Unique identifier for a duel");
define_id_type!(InvitationId, "inv", "Unique identifier for a duel invitation");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_parse() {
        let id = DuelId::new();
        let text = id.to_string();
        assert!(text.starts_with("duel_"));
        assert_eq!(DuelId::parse(&text).unwrap(), id);
        assert_eq!(DuelId::parse(&id.0.to_string()).unwrap(), id);
    }

    #[test]
    fn test_user_id_is_transparent() {
        let user = UserId::new("alice");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"alice\"");
        assert_eq!(user.to_string(), "alice");
    }
}
