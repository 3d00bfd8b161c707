//! Duel engine configuration
//!
//! Loaded from an optional config file plus `MUNDERO__*` environment
//! variables (e.g. `MUNDERO__SWEEP_INTERVAL_SECS=10`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime settings for the duel store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuelConfig {
    /// Seconds between resolution sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Response window for invitations
    #[serde(default = "default_invitation_ttl")]
    pub invitation_ttl_hours: u32,

    /// Delivery attempts per reward payout
    #[serde(default = "default_retry_attempts")]
    pub reward_retry_attempts: u32,

    /// Base delay between payout attempts (multiplied by attempt number)
    #[serde(default = "default_retry_backoff")]
    pub reward_retry_backoff_ms: u64,

    /// Longest time window a new duel may have
    #[serde(default = "default_max_duration")]
    pub max_duration_hours: u32,

    /// Accept progress values lower than the current one
    #[serde(default)]
    pub allow_progress_decrease: bool,

    /// Capacity of the broadcast change channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_invitation_ttl() -> u32 {
    24
}

fn default_max_duration() -> u32 {
    720
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    250
}

fn default_event_buffer() -> usize {
    256
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            invitation_ttl_hours: default_invitation_ttl(),
            reward_retry_attempts: default_retry_attempts(),
            reward_retry_backoff_ms: default_retry_backoff(),
            max_duration_hours: default_max_duration(),
            allow_progress_decrease: false,
            event_buffer: default_event_buffer(),
        }
    }
}

impl DuelConfig {
    /// Load configuration from `.env`, an optional file and the environment
    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("MUNDERO")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn invitation_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.invitation_ttl_hours as i64).unwrap_or(chrono::Duration::MAX)
    }

    pub fn reward_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reward_retry_backoff_ms.saturating_mul(attempt as u64))
    }
}
