//! Error types for duel operations
//!
//! Domain-rule violations and infrastructure failures share one enum;
//! [`DuelError::kind`] tells them apart.

use thiserror::Error;

use crate::duel::DuelStatus;
use crate::{DuelId, InvitationId, UserId};

/// Result type for duel operations
pub type DuelResult<T> = Result<T, DuelError>;

/// Errors returned by the duel store and service
#[derive(Debug, Error)]
pub enum DuelError {
    // ========================================================================
    // Domain-rule violations
    // ========================================================================

    #[error("Duel not found: {0}")]
    DuelNotFound(DuelId),

    #[error("Invitation not found: {0}")]
    InvitationNotFound(InvitationId),

    #[error("Unknown duel template: {0}")]
    UnknownTemplate(String),

    #[error("Cannot {action} a duel in status {from:?}")]
    InvalidTransition { from: DuelStatus, action: &'static str },

    #[error("Invitation {0} has already been answered")]
    InvitationNotPending(InvitationId),

    #[error("Invitation {0} has expired")]
    InvitationExpired(InvitationId),

    #[error("User {user} is not a participant of duel {duel}")]
    NotParticipant { duel: DuelId, user: UserId },

    #[error("A user cannot challenge themselves")]
    SelfChallenge,

    #[error("Duel duration must be between 1 and {max} hours, got {hours}")]
    InvalidDuration { hours: u32, max: u32 },

    #[error("Progress cannot decrease: current {current}, attempted {attempted}")]
    ProgressRegression { current: u64, attempted: u64 },

    #[error("Duel {0} time window has closed")]
    WindowClosed(DuelId),

    #[error("Duel {0} is not open to spectators")]
    SpectatingClosed(DuelId),

    #[error("Participants cannot spectate their own duel")]
    ParticipantCannotSpectate,

    // ========================================================================
    // Infrastructure failures
    // ========================================================================

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Async runtime unavailable: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Broad classification of a [`DuelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request broke a duel rule; retrying will not help
    Rejected,
    /// Something underneath the duel core failed
    Infrastructure,
}

impl DuelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(_) | Self::Runtime(_) | Self::Io(_) | Self::Serialization(_) => {
                ErrorKind::Infrastructure
            }
            _ => ErrorKind::Rejected,
        }
    }

    /// True for "you can't do that" failures
    pub fn is_rejection(&self) -> bool {
        self.kind() == ErrorKind::Rejected
    }
}
