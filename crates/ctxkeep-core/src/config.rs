//! Engine configuration.
//!
//! Defaults match a 180k-token context window with flash save at 80% usage.
//! [`CoreConfig::from_env`] overrides them from `CTXKEEP_*` variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CtxKeepError, Result};

pub const DEFAULT_TOKEN_BUDGET: u64 = 180_000;
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.8;
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(300);
pub const MAX_CHECKPOINT_NAME_LEN: usize = 100;
pub const MAX_CHECKPOINT_DESCRIPTION_LEN: usize = 500;

pub const ENV_TOKEN_BUDGET: &str = "CTXKEEP_TOKEN_BUDGET";
pub const ENV_COMPACTION_THRESHOLD: &str = "CTXKEEP_COMPACTION_THRESHOLD";
pub const ENV_SNAPSHOT_TIMEOUT_SECS: &str = "CTXKEEP_SNAPSHOT_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Token budget of one agent's context window
    pub token_budget: u64,
    /// Fraction of the budget at which flash save triggers, in (0, 1]
    pub compaction_threshold: f64,
    pub snapshot_timeout: Duration,
    pub max_name_len: usize,
    pub max_description_len: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            max_name_len: MAX_CHECKPOINT_NAME_LEN,
            max_description_len: MAX_CHECKPOINT_DESCRIPTION_LEN,
        }
    }
}

impl CoreConfig {
    /// Build from `CTXKEEP_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable or out-of-range values
    /// are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TOKEN_BUDGET) {
            match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => config.token_budget = v,
                _ => warn!(var = ENV_TOKEN_BUDGET, value = %raw, "ignoring invalid token budget"),
            }
        }

        if let Some(raw) = lookup(ENV_COMPACTION_THRESHOLD) {
            match raw.trim().parse::<f64>() {
                Ok(v) if v > 0.0 && v <= 1.0 => config.compaction_threshold = v,
                _ => warn!(
                    var = ENV_COMPACTION_THRESHOLD,
                    value = %raw,
                    "ignoring invalid compaction threshold"
                ),
            }
        }

        if let Some(raw) = lookup(ENV_SNAPSHOT_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => config.snapshot_timeout = Duration::from_secs(v),
                _ => warn!(
                    var = ENV_SNAPSHOT_TIMEOUT_SECS,
                    value = %raw,
                    "ignoring invalid snapshot timeout"
                ),
            }
        }

        config
    }

    pub fn with_token_budget(mut self, budget: u64) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_compaction_threshold(mut self, threshold: f64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_budget == 0 {
            return Err(CtxKeepError::Validation(
                "token budget must be positive".to_string(),
            ));
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(CtxKeepError::Validation(format!(
                "compaction threshold must be in (0, 1], got {}",
                self.compaction_threshold
            )));
        }
        if self.snapshot_timeout.is_zero() {
            return Err(CtxKeepError::Validation(
                "snapshot timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
