//! # Duel Store
//!
//! Authoritative repository of duels and invitations. It owns every state
//! transition and the periodic resolution sweep.
//!
//! ## Concurrency
//!
//! Records live in [`DashMap`]s, so each operation mutates one record under
//! its shard lock and readers only ever see whole snapshots. Operations that
//! touch both an invitation and its duel always lock the invitation first.
//! The sweep collects candidate ids, then re-checks status under the record
//! lock before finalizing; a duel selected as active but cancelled in the
//! meantime is skipped.
//!
//! ## Sweep
//!
//! One pass ([`DuelStore::sweep`]):
//! 1. expires pending invitations past their response window (duel → cancelled)
//! 2. finalizes active duels whose time window has elapsed
//! 3. emits a single [`DuelEvent::SweepCompleted`] if anything changed
//!
//! [`DuelStore::start`] runs the pass on a fixed interval until
//! [`DuelStore::stop`].

use std::path::Path;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::DuelTemplate;
use crate::clock::Clock;
use crate::config::DuelConfig;
use crate::duel::{Duel, DuelInvitation, DuelOutcome, DuelStatus};
use crate::error::{DuelError, DuelResult};
use crate::events::{ChangeNotifier, DuelEvent};
use crate::reputation::{deliver_awards, AwardPayload, PendingAward, ReputationSink};
use crate::{DuelId, InvitationId, UserId};

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Duels finalized in this pass
    pub finished: Vec<DuelId>,
    /// Invitations expired in this pass
    pub expired: Vec<InvitationId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.finished.is_empty() && self.expired.is_empty()
    }
}

/// Serializable copy of the store contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub duels: Vec<Duel>,
    pub invitations: Vec<DuelInvitation>,
    pub taken_at: DateTime<Utc>,
}

struct SweepTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Duel and invitation repository
pub struct DuelStore {
    config: DuelConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReputationSink>,
    duels: DashMap<DuelId, Duel>,
    invitations: DashMap<InvitationId, DuelInvitation>,
    /// duel → its invitation
    invitation_index: DashMap<DuelId, InvitationId>,
    notifier: ChangeNotifier,
    sweeper: Mutex<Option<SweepTask>>,
}

impl DuelStore {
    pub fn new(config: DuelConfig, clock: Arc<dyn Clock>, sink: Arc<dyn ReputationSink>) -> Self {
        let notifier = ChangeNotifier::new(config.event_buffer);
        Self {
            config,
            clock,
            sink,
            duels: DashMap::new(),
            invitations: DashMap::new(),
            invitation_index: DashMap::new(),
            notifier,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DuelConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Create a pending duel and its invitation
    pub fn create_duel(
        &self,
        template: &DuelTemplate,
        challenger: UserId,
        opponent: UserId,
        message: Option<String>,
        is_public: bool,
    ) -> DuelResult<(Duel, DuelInvitation)> {
        if challenger == opponent {
            return Err(DuelError::SelfChallenge);
        }
        let max = self.config.max_duration_hours;
        if template.duration_hours == 0 || template.duration_hours > max {
            return Err(DuelError::InvalidDuration {
                hours: template.duration_hours,
                max,
            });
        }

        let now = self.clock.now();
        let duel = Duel::from_template(template, challenger, opponent, is_public, now);
        let invitation = DuelInvitation::for_duel(&duel, message, self.config.invitation_ttl(), now);

        self.duels.insert(duel.id, duel.clone());
        self.invitations.insert(invitation.id, invitation.clone());
        self.invitation_index.insert(duel.id, invitation.id);

        info!(
            duel_id = %duel.id,
            challenger_id = %duel.challenger_id,
            opponent_id = %duel.opponent_id,
            template = %template.slug,
            "Duel created"
        );
        self.notifier.notify(DuelEvent::DuelCreated {
            duel_id: duel.id,
            invitation_id: invitation.id,
            challenger_id: duel.challenger_id.clone(),
            opponent_id: duel.opponent_id.clone(),
            timestamp: now,
        });

        Ok((duel, invitation))
    }

    /// Accept a pending invitation; the duel becomes active
    pub fn accept_invitation(&self, invitation_id: &InvitationId) -> DuelResult<Duel> {
        let now = self.clock.now();

        let mut invitation = self
            .invitations
            .get_mut(invitation_id)
            .ok_or(DuelError::InvitationNotFound(*invitation_id))?;
        if !invitation.is_pending() {
            return Err(DuelError::InvitationNotPending(*invitation_id));
        }

        let duel_id = invitation.duel_id;
        let mut duel = self
            .duels
            .get_mut(&duel_id)
            .ok_or(DuelError::DuelNotFound(duel_id))?;

        if invitation.is_overdue(now) {
            Self::expire_pair(&mut invitation, &mut duel, now);
            drop(duel);
            drop(invitation);

            self.notifier.notify(DuelEvent::InvitationExpired {
                duel_id,
                invitation_id: *invitation_id,
                timestamp: now,
            });
            return Err(DuelError::InvitationExpired(*invitation_id));
        }

        duel.activate(now)?;
        invitation.accept(now)?;
        let snapshot = duel.clone();
        drop(duel);
        drop(invitation);

        info!(duel_id = %duel_id, invitation_id = %invitation_id, "Duel invitation accepted");
        self.notifier.notify(DuelEvent::InvitationAccepted {
            duel_id,
            invitation_id: *invitation_id,
            timestamp: now,
        });

        Ok(snapshot)
    }

    /// Decline a pending invitation; the duel is cancelled
    pub fn decline_invitation(&self, invitation_id: &InvitationId) -> DuelResult<Duel> {
        let now = self.clock.now();

        let mut invitation = self
            .invitations
            .get_mut(invitation_id)
            .ok_or(DuelError::InvitationNotFound(*invitation_id))?;
        if !invitation.is_pending() {
            return Err(DuelError::InvitationNotPending(*invitation_id));
        }

        let duel_id = invitation.duel_id;
        let mut duel = self
            .duels
            .get_mut(&duel_id)
            .ok_or(DuelError::DuelNotFound(duel_id))?;

        duel.abandon()?;
        invitation.decline(now)?;
        let snapshot = duel.clone();
        drop(duel);
        drop(invitation);

        info!(duel_id = %duel_id, invitation_id = %invitation_id, "Duel invitation declined");
        self.notifier.notify(DuelEvent::InvitationDeclined {
            duel_id,
            invitation_id: *invitation_id,
            timestamp: now,
        });

        Ok(snapshot)
    }

    /// Cancel a pending or active duel at a participant's request
    pub fn cancel_duel(&self, duel_id: &DuelId, requester: &UserId) -> DuelResult<Duel> {
        let now = self.clock.now();

        let invitation_id = self.invitation_index.get(duel_id).map(|entry| *entry.value());
        let mut invitation = invitation_id.and_then(|id| self.invitations.get_mut(&id));
        let mut duel = self
            .duels
            .get_mut(duel_id)
            .ok_or(DuelError::DuelNotFound(*duel_id))?;

        let previous_status = duel.status;
        duel.cancel(requester)?;
        if let Some(invitation) = invitation.as_mut().filter(|i| i.is_pending()) {
            invitation.withdraw(now)?;
        }
        let snapshot = duel.clone();
        drop(duel);
        drop(invitation);

        info!(
            duel_id = %duel_id,
            user_id = %requester,
            previous_status = ?previous_status,
            "Duel cancelled"
        );
        self.notifier.notify(DuelEvent::DuelCancelled {
            duel_id: *duel_id,
            cancelled_by: requester.clone(),
            previous_status,
            timestamp: now,
        });

        Ok(snapshot)
    }

    /// Set a participant's cumulative metric value
    pub fn update_progress(&self, duel_id: &DuelId, user: &UserId, value: u64) -> DuelResult<()> {
        let now = self.clock.now();

        let mut duel = self
            .duels
            .get_mut(duel_id)
            .ok_or(DuelError::DuelNotFound(*duel_id))?;
        duel.record_progress(user, value, now, self.config.allow_progress_decrease)?;
        drop(duel);

        debug!(duel_id = %duel_id, user_id = %user, value, "Duel progress updated");
        self.notifier.notify(DuelEvent::ProgressUpdated {
            duel_id: *duel_id,
            user_id: user.clone(),
            value,
            timestamp: now,
        });

        Ok(())
    }

    /// Returns `true` if the user was newly added
    pub fn add_spectator(&self, duel_id: &DuelId, user: &UserId) -> DuelResult<bool> {
        let mut duel = self
            .duels
            .get_mut(duel_id)
            .ok_or(DuelError::DuelNotFound(*duel_id))?;
        let added = duel.add_spectator(user.clone())?;
        drop(duel);

        if added {
            debug!(duel_id = %duel_id, user_id = %user, "Spectator joined");
            self.notifier.notify(DuelEvent::SpectatorJoined {
                duel_id: *duel_id,
                user_id: user.clone(),
                timestamp: self.clock.now(),
            });
        }
        Ok(added)
    }

    /// Returns `true` if the user was watching
    pub fn remove_spectator(&self, duel_id: &DuelId, user: &UserId) -> DuelResult<bool> {
        let mut duel = self
            .duels
            .get_mut(duel_id)
            .ok_or(DuelError::DuelNotFound(*duel_id))?;
        let removed = duel.remove_spectator(user);
        drop(duel);

        if removed {
            debug!(duel_id = %duel_id, user_id = %user, "Spectator left");
            self.notifier.notify(DuelEvent::SpectatorLeft {
                duel_id: *duel_id,
                user_id: user.clone(),
                timestamp: self.clock.now(),
            });
        }
        Ok(removed)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_duel(&self, duel_id: &DuelId) -> Option<Duel> {
        self.duels.get(duel_id).map(|d| d.value().clone())
    }

    pub fn get_invitation(&self, invitation_id: &InvitationId) -> Option<DuelInvitation> {
        self.invitations.get(invitation_id).map(|i| i.value().clone())
    }

    pub fn invitation_for_duel(&self, duel_id: &DuelId) -> Option<DuelInvitation> {
        let invitation_id = self.invitation_index.get(duel_id).map(|entry| *entry.value())?;
        self.get_invitation(&invitation_id)
    }

    /// Duels matching the filters, newest first
    pub fn list_duels(&self, user: Option<&UserId>, status: Option<DuelStatus>) -> Vec<Duel> {
        let mut duels: Vec<Duel> = self
            .duels
            .iter()
            .filter(|d| user.map_or(true, |u| d.is_participant(u)))
            .filter(|d| status.map_or(true, |s| d.status == s))
            .map(|d| d.value().clone())
            .collect();
        duels.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        duels
    }

    /// Open invitations addressed to `user`, newest first
    pub fn pending_invitations_for(&self, user: &UserId) -> Vec<DuelInvitation> {
        let now = self.clock.now();
        let mut invitations: Vec<DuelInvitation> = self
            .invitations
            .iter()
            .filter(|i| i.to_user_id == *user && i.is_pending() && !i.is_overdue(now))
            .map(|i| i.value().clone())
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        invitations
    }

    pub fn duel_count(&self) -> usize {
        self.duels.len()
    }

    // ========================================================================
    // Sweep
    // ========================================================================

    /// Run one expiry + resolution pass at the clock's current time
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let overdue: Vec<InvitationId> = self
            .invitations
            .iter()
            .filter(|i| i.is_overdue(now))
            .map(|i| *i.key())
            .collect();
        for invitation_id in overdue {
            if self.expire_invitation(&invitation_id, now) {
                report.expired.push(invitation_id);
            }
        }

        let active: Vec<DuelId> = self
            .duels
            .iter()
            .filter(|d| d.status == DuelStatus::Active)
            .map(|d| *d.key())
            .collect();
        for duel_id in active {
            if self.finalize_duel(&duel_id, now) {
                report.finished.push(duel_id);
            }
        }

        if !report.is_empty() {
            debug!(
                finished = report.finished.len(),
                expired = report.expired.len(),
                "Sweep completed"
            );
            self.notifier.notify(DuelEvent::SweepCompleted {
                finished: report.finished.clone(),
                expired: report.expired.clone(),
                timestamp: now,
            });
        }

        report
    }

    fn expire_invitation(&self, invitation_id: &InvitationId, now: DateTime<Utc>) -> bool {
        let Some(mut invitation) = self.invitations.get_mut(invitation_id) else {
            return false;
        };
        // Answered since selection
        if !invitation.is_overdue(now) {
            return false;
        }

        let duel_id = invitation.duel_id;
        match self.duels.get_mut(&duel_id) {
            Some(mut duel) => Self::expire_pair(&mut invitation, &mut duel, now),
            None => {
                warn!(invitation_id = %invitation_id, duel_id = %duel_id, "Invitation references a missing duel");
                if let Err(e) = invitation.expire(now) {
                    warn!(invitation_id = %invitation_id, error = %e, "Failed to expire invitation");
                }
            }
        }
        true
    }

    fn expire_pair(invitation: &mut DuelInvitation, duel: &mut Duel, now: DateTime<Utc>) {
        if let Err(e) = invitation.expire(now) {
            warn!(invitation_id = %invitation.id, error = %e, "Failed to expire invitation");
            return;
        }
        if let Err(e) = duel.abandon() {
            warn!(duel_id = %duel.id, error = %e, "Expired invitation for a duel that is no longer pending");
            return;
        }
        info!(duel_id = %duel.id, invitation_id = %invitation.id, "Duel invitation expired");
    }

    fn finalize_duel(&self, duel_id: &DuelId, now: DateTime<Utc>) -> bool {
        let Some(mut duel) = self.duels.get_mut(duel_id) else {
            return false;
        };
        // Changed since selection
        if duel.status != DuelStatus::Active {
            return false;
        }
        if duel.started_at.is_none() {
            warn!(duel_id = %duel_id, "Active duel without a start time; skipping");
            return false;
        }
        if duel.ends_at().is_none() {
            warn!(
                duel_id = %duel_id,
                duration_hours = duel.duration_hours,
                "Active duel window is out of range; skipping"
            );
            return false;
        }

        let Some(outcome) = duel.finalize(now) else {
            return false;
        };
        let awards = Self::awards_for(&duel, &outcome);
        drop(duel);

        match &outcome {
            DuelOutcome::Victory { winner, .. } => {
                info!(duel_id = %duel_id, winner_id = %winner, "Duel finished")
            }
            DuelOutcome::Draw { .. } => info!(duel_id = %duel_id, "Duel finished in a draw"),
        }
        self.dispatch_rewards(awards);
        true
    }

    fn awards_for(duel: &Duel, outcome: &DuelOutcome) -> Vec<PendingAward> {
        outcome
            .payouts(&duel.rewards)
            .into_iter()
            .map(|(user_id, event, points)| PendingAward {
                user_id,
                event,
                payload: AwardPayload {
                    duel_id: duel.id,
                    metric: duel.metric,
                    points,
                },
            })
            .collect()
    }

    /// Hand payouts to the sink without waiting for them
    ///
    /// Runs on the caller's tokio runtime when there is one, otherwise on a
    /// short-lived thread with its own current-thread runtime.
    fn dispatch_rewards(&self, awards: Vec<PendingAward>) {
        if awards.is_empty() {
            return;
        }

        let sink = self.sink.clone();
        let config = self.config.clone();
        let delivery = async move {
            deliver_awards(sink, awards, config.reward_retry_attempts, |attempt| {
                config.reward_backoff(attempt)
            })
            .await
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(delivery);
            return;
        }

        let spawned = std::thread::Builder::new()
            .name("mundero-rewards".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => {
                        runtime.block_on(delivery);
                    }
                    Err(e) => error!(error = %e, "Failed to build runtime for reward delivery"),
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn reward delivery thread");
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the periodic sweep on the current tokio runtime
    ///
    /// Calling `start` on a running store does nothing.
    pub fn start(self: &Arc<Self>) -> DuelResult<()> {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DuelError::Runtime(e.to_string()))?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let store: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        store.sweep();
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Duel sweep task stopped");
        });

        info!(interval_secs = period.as_secs(), "Duel sweep started");
        *sweeper = Some(SweepTask { shutdown, handle });
        Ok(())
    }

    /// Stop the periodic sweep and wait for it to exit
    pub async fn stop(&self) {
        let task = self.sweeper.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Duel sweep task ended abnormally");
            }
            info!("Duel sweep stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn snapshot(&self) -> StoreSnapshot {
        let mut duels: Vec<Duel> = self.duels.iter().map(|d| d.value().clone()).collect();
        duels.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let mut invitations: Vec<DuelInvitation> = self.invitations.iter().map(|i| i.value().clone()).collect();
        invitations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        StoreSnapshot {
            duels,
            invitations,
            taken_at: self.clock.now(),
        }
    }

    /// Replace the store contents with a snapshot
    pub fn restore(&self, snapshot: StoreSnapshot) -> DuelResult<()> {
        for duel in &snapshot.duels {
            if duel.challenger_id == duel.opponent_id
                || duel.progress.len() != 2
                || !duel.progress.contains_key(&duel.challenger_id)
                || !duel.progress.contains_key(&duel.opponent_id)
            {
                return Err(DuelError::Storage(format!("duel {} has malformed participants", duel.id)));
            }
        }
        for invitation in &snapshot.invitations {
            if !snapshot.duels.iter().any(|d| d.id == invitation.duel_id) {
                return Err(DuelError::Storage(format!(
                    "invitation {} references unknown duel {}",
                    invitation.id, invitation.duel_id
                )));
            }
        }

        self.duels.clear();
        self.invitations.clear();
        self.invitation_index.clear();

        for duel in snapshot.duels {
            self.duels.insert(duel.id, duel);
        }
        for invitation in snapshot.invitations {
            self.invitation_index.insert(invitation.duel_id, invitation.id);
            self.invitations.insert(invitation.id, invitation);
        }

        info!(duels = self.duels.len(), invitations = self.invitations.len(), "Duel store restored");
        Ok(())
    }

    /// Write a JSON snapshot, replacing the file atomically
    pub fn save_to(&self, path: &Path) -> DuelResult<()> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot())?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load_from(&self, path: &Path) -> DuelResult<()> {
        let bytes = std::fs::read(path)?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        self.restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DuelDifficulty, DuelMetric, TemplateCatalog};
    use crate::clock::ManualClock;
    use crate::duel::InvitationStatus;
    use crate::reputation::InMemoryReputation;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        store: Arc<DuelStore>,
        clock: ManualClock,
        ledger: Arc<InMemoryReputation>,
    }

    fn harness() -> Harness {
        let clock = ManualClock::default();
        let ledger = Arc::new(InMemoryReputation::new());
        let store = Arc::new(DuelStore::new(
            DuelConfig::default(),
            Arc::new(clock.clone()),
            ledger.clone(),
        ));
        Harness { store, clock, ledger }
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn sprint() -> DuelTemplate {
        TemplateCatalog::builtin().get("likes-sprint").unwrap().clone()
    }

    fn active_duel(h: &Harness) -> Duel {
        let (_, invitation) = h.store.create_duel(&sprint(), alice(), bob(), None, true).unwrap();
        h.store.accept_invitation(&invitation.id).unwrap()
    }

    #[test]
    fn test_create_rejects_self_challenge() {
        let h = harness();
        let result = h.store.create_duel(&sprint(), alice(), alice(), None, true);
        assert!(matches!(result, Err(DuelError::SelfChallenge)));
        assert_eq!(h.store.duel_count(), 0);
    }

    #[test]
    fn test_accept_twice_fails() {
        let h = harness();
        let (duel, invitation) = h.store.create_duel(&sprint(), alice(), bob(), None, true).unwrap();
        assert_eq!(invitation.expires_at, duel.created_at + Duration::hours(24));

        let active = h.store.accept_invitation(&invitation.id).unwrap();
        assert_eq!(active.status, DuelStatus::Active);
        assert_eq!(active.started_at, Some(h.clock.now()));

        let again = h.store.accept_invitation(&invitation.id);
        assert!(matches!(again, Err(DuelError::InvitationNotPending(_))));
        assert!(matches!(
            h.store.decline_invitation(&invitation.id),
            Err(DuelError::InvitationNotPending(_))
        ));
    }

    #[test]
    fn test_cancel_pending_withdraws_invitation() {
        let h = harness();
        let (duel, invitation) = h.store.create_duel(&sprint(), alice(), bob(), None, true).unwrap();

        let cancelled = h.store.cancel_duel(&duel.id, &alice()).unwrap();
        assert_eq!(cancelled.status, DuelStatus::Cancelled);
        assert_eq!(h.store.get_invitation(&invitation.id).map(|i| i.status), Some(InvitationStatus::Withdrawn));
        assert!(h.store.accept_invitation(&invitation.id).is_err());
    }

    #[test]
    fn test_accept_after_window_expires_invitation() {
        let h = harness();
        let (duel, invitation) = h.store.create_duel(&sprint(), alice(), bob(), None, true).unwrap();
        h.clock.advance(Duration::hours(24) + Duration::seconds(1));

        let result = h.store.accept_invitation(&invitation.id);
        assert!(matches!(result, Err(DuelError::InvitationExpired(_))));
        assert_eq!(h.store.get_duel(&duel.id).unwrap().status, DuelStatus::Cancelled);
        assert_eq!(h.store.get_invitation(&invitation.id).map(|i| i.status), Some(InvitationStatus::Expired));
    }

    #[test]
    fn test_sweep_expires_unanswered_invitations() {
        let h = harness();
        let (duel, invitation) = h.store.create_duel(&sprint(), alice(), bob(), None, true).unwrap();
        assert_eq!(h.store.pending_invitations_for(&bob()).len(), 1);

        h.clock.advance(Duration::hours(23));
        assert!(h.store.sweep().is_empty());

        h.clock.advance(Duration::hours(2));
        let report = h.store.sweep();
        assert_eq!(report.expired, vec![invitation.id]);
        assert!(report.finished.is_empty());
        assert_eq!(h.store.get_duel(&duel.id).unwrap().status, DuelStatus::Cancelled);
        assert!(h.store.pending_invitations_for(&bob()).is_empty());
    }

    #[test]
    fn test_sweep_time_window_boundary() {
        let h = harness();
        let duel = active_duel(&h);

        h.clock.advance(Duration::hours(24) - Duration::milliseconds(1));
        assert!(h.store.sweep().finished.is_empty());
        assert_eq!(h.store.get_duel(&duel.id).unwrap().status, DuelStatus::Active);

        h.clock.advance(Duration::milliseconds(2));
        assert_eq!(h.store.sweep().finished, vec![duel.id]);
        assert_eq!(h.store.get_duel(&duel.id).unwrap().status, DuelStatus::Finished);
    }

    #[test]
    fn test_sweep_skips_cancelled_duels() {
        let h = harness();
        let duel = active_duel(&h);
        h.store.cancel_duel(&duel.id, &bob()).unwrap();

        h.clock.advance(Duration::hours(48));
        assert!(h.store.sweep().is_empty());
        assert_eq!(h.store.get_duel(&duel.id).unwrap().status, DuelStatus::Cancelled);
    }

    #[test]
    fn test_one_notification_per_mutation() {
        let h = harness();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _subscription = h.store.notifier().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let duel = active_duel(&h); // create + accept
        assert_eq!(count.load(Ordering::SeqCst), 2);

        h.store.update_progress(&duel.id, &alice(), 1).unwrap();
        h.store.add_spectator(&duel.id, &UserId::new("carol")).unwrap();
        h.store.add_spectator(&duel.id, &UserId::new("carol")).unwrap();
        h.store.remove_spectator(&duel.id, &UserId::new("dave")).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 4);

        // Rejected operations stay silent
        assert!(h.store.update_progress(&duel.id, &UserId::new("carol"), 1).is_err());
        assert_eq!(count.load(Ordering::SeqCst), 4);

        // Two duels finishing in one tick coalesce into one event
        let second = active_duel(&h);
        assert_eq!(count.load(Ordering::SeqCst), 6);
        h.clock.advance(Duration::hours(25));
        let report = h.store.sweep();
        assert_eq!(report.finished.len(), 2);
        assert!(report.finished.contains(&second.id));
        assert_eq!(count.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_rewards_dispatched_once() {
        let h = harness();
        let duel = active_duel(&h);
        h.store.update_progress(&duel.id, &alice(), 10).unwrap();
        h.store.update_progress(&duel.id, &bob(), 7).unwrap();

        h.clock.advance(Duration::hours(24) + Duration::seconds(1));
        assert_eq!(h.store.sweep().finished.len(), 1);
        assert!(h.store.sweep().is_empty());

        for _ in 0..50 {
            if h.ledger.award_count() >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(h.ledger.award_count(), 2);
        assert_eq!(h.ledger.points_of(&alice()), 150);
        assert_eq!(h.ledger.points_of(&bob()), 50);
    }

    #[test]
    fn test_rewards_delivered_without_runtime() {
        let h = harness();
        let duel = active_duel(&h);
        h.store.update_progress(&duel.id, &alice(), 10).unwrap();

        h.clock.advance(Duration::hours(25));
        assert_eq!(h.store.sweep().finished, vec![duel.id]);

        for _ in 0..100 {
            if h.ledger.award_count() >= 2 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(h.ledger.award_count(), 2);
        assert_eq!(h.ledger.points_of(&alice()), 150);
        assert_eq!(h.ledger.points_of(&bob()), 50);
    }

    #[test]
    fn test_create_rejects_out_of_range_duration() {
        let h = harness();
        let mut zero = sprint();
        zero.duration_hours = 0;
        let result = h.store.create_duel(&zero, alice(), bob(), None, true);
        assert!(matches!(result, Err(DuelError::InvalidDuration { hours: 0, max: 720 })));

        let huge = DuelTemplate::custom("Forever", DuelMetric::LikesReceived, u32::MAX, DuelDifficulty::Easy, None);
        let result = h.store.create_duel(&huge, alice(), bob(), None, true);
        assert!(matches!(result, Err(DuelError::InvalidDuration { .. })));

        let mut longest = sprint();
        longest.duration_hours = 720;
        assert!(h.store.create_duel(&longest, alice(), bob(), None, true).is_ok());
        assert_eq!(h.store.duel_count(), 1);
    }

    #[test]
    fn test_sweep_skips_restored_duel_with_unbounded_window() {
        let h = harness();
        let broken = active_duel(&h);
        let healthy = active_duel(&h);

        let mut snapshot = h.store.snapshot();
        for duel in snapshot.duels.iter_mut().filter(|d| d.id == broken.id) {
            duel.duration_hours = u32::MAX;
        }
        h.store.restore(snapshot).unwrap();

        h.clock.advance(Duration::hours(25));
        let report = h.store.sweep();
        assert_eq!(report.finished, vec![healthy.id]);
        assert_eq!(h.store.get_duel(&broken.id).unwrap().status, DuelStatus::Active);
        assert_eq!(h.store.get_duel(&healthy.id).unwrap().status, DuelStatus::Finished);
    }

    #[tokio::test]
    async fn test_background_sweep_lifecycle() {
        let clock = ManualClock::default();
        let config = DuelConfig {
            sweep_interval_secs: 1,
            ..Default::default()
        };
        let store = Arc::new(DuelStore::new(
            config,
            Arc::new(clock.clone()),
            Arc::new(InMemoryReputation::new()),
        ));
        let (duel, invitation) = store.create_duel(&sprint(), alice(), bob(), None, false).unwrap();
        store.accept_invitation(&invitation.id).unwrap();

        store.start().unwrap();
        store.start().unwrap();
        assert!(store.is_running());

        clock.advance(Duration::hours(25));
        let mut finished = false;
        for _ in 0..30 {
            if store.get_duel(&duel.id).unwrap().status == DuelStatus::Finished {
                finished = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(finished, "background sweep should finalize the elapsed duel");

        store.stop().await;
        assert!(!store.is_running());
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let h = harness();
        assert!(matches!(h.store.start(), Err(DuelError::Runtime(_))));
    }

    #[test]
    fn test_list_duels_newest_first() {
        let h = harness();
        let first = active_duel(&h);
        h.clock.advance(Duration::minutes(5));
        let (second, _) = h
            .store
            .create_duel(&sprint(), bob(), UserId::new("carol"), None, true)
            .unwrap();

        let all = h.store.list_duels(None, None);
        assert_eq!(all.iter().map(|d| d.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        assert_eq!(h.store.list_duels(Some(&alice()), None).len(), 1);
        assert_eq!(h.store.list_duels(Some(&bob()), Some(DuelStatus::Pending)).len(), 1);
        assert!(h.store.list_duels(Some(&UserId::new("zoe")), None).is_empty());
    }

    #[test]
    fn test_snapshot_round_trip_through_file() {
        let h = harness();
        let duel = active_duel(&h);
        h.store.update_progress(&duel.id, &alice(), 4).unwrap();

        let path = std::env::temp_dir().join(format!("mundero-duels-{}.json", duel.id));
        h.store.save_to(&path).unwrap();

        let other = harness();
        other.store.load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(other.store.get_duel(&duel.id), h.store.get_duel(&duel.id));
        assert!(other.store.invitation_for_duel(&duel.id).is_some());
    }

    #[test]
    fn test_restore_rejects_dangling_invitation() {
        let h = harness();
        active_duel(&h);
        let mut snapshot = h.store.snapshot();
        snapshot.duels.clear();

        let result = h.store.restore(snapshot);
        assert!(matches!(result, Err(DuelError::Storage(_))));
        assert_eq!(h.store.duel_count(), 1);
    }

    #[test]
    fn test_load_missing_file_is_infrastructure_error() {
        let h = harness();
        let err = h
            .store
            .load_from(Path::new("/nonexistent/mundero/duels.json"))
            .unwrap_err();
        assert!(!err.is_rejection());
    }
}
