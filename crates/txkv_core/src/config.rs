//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Concurrency-control policy, fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    /// No locking at all.
    None,
    /// Optimistic, write locks only. Reads are never tracked.
    Optw,
    /// Optimistic, read and write locks.
    Optrw,
    /// Pessimistic, write locks only. Reads are never tracked.
    Pesw,
    /// Pessimistic, read and write locks.
    Pesrw,
}

impl ConcurrencyMode {
    /// All modes, in declaration order.
    pub const ALL: [ConcurrencyMode; 5] = [
        ConcurrencyMode::None,
        ConcurrencyMode::Optw,
        ConcurrencyMode::Optrw,
        ConcurrencyMode::Pesw,
        ConcurrencyMode::Pesrw,
    ];

    /// Returns true for the modes that block on conflict.
    #[must_use]
    pub const fn is_pessimistic(self) -> bool {
        matches!(self, ConcurrencyMode::Pesw | ConcurrencyMode::Pesrw)
    }

    /// Returns true for the modes that fail immediately on conflict.
    #[must_use]
    pub const fn is_optimistic(self) -> bool {
        matches!(self, ConcurrencyMode::Optw | ConcurrencyMode::Optrw)
    }

    /// Returns true if reads take shared locks.
    #[must_use]
    pub const fn tracks_reads(self) -> bool {
        matches!(self, ConcurrencyMode::Optrw | ConcurrencyMode::Pesrw)
    }

    /// Returns the lowercase name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConcurrencyMode::None => "none",
            ConcurrencyMode::Optw => "optw",
            ConcurrencyMode::Optrw => "optrw",
            ConcurrencyMode::Pesw => "pesw",
            ConcurrencyMode::Pesrw => "pesrw",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConcurrencyMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConcurrencyMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                CoreError::invalid_config(format!(
                    "unknown concurrency mode {s:?} (expected none, optw, optrw, pesw or pesrw)"
                ))
            })
    }
}

/// Configuration for a [`crate::ConcurrencyEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrency policy for every transaction.
    pub mode: ConcurrencyMode,

    /// Timeout applied when `begin` is called without one (None = no deadline).
    pub default_timeout: Option<Duration>,

    /// How often the background deadlock detector scans the wait-for graph.
    pub deadlock_check_interval: Duration,

    /// How often expired transactions are rolled back (ZERO = no reaper thread).
    pub reaper_interval: Duration,

    /// How often expired keys are swept (ZERO = no sweeper thread).
    pub expiry_sweep_interval: Duration,

    /// Largest transaction handle before allocation wraps back to 1.
    pub max_transaction_id: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ConcurrencyMode::Pesrw,
            default_timeout: None,
            deadlock_check_interval: Duration::from_millis(100),
            reaper_interval: Duration::from_millis(50),
            expiry_sweep_interval: Duration::from_secs(1),
            max_transaction_id: u64::from(u32::MAX),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency mode.
    #[must_use]
    pub const fn mode(mut self, mode: ConcurrencyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the default transaction timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the deadlock detector interval.
    #[must_use]
    pub const fn deadlock_check_interval(mut self, interval: Duration) -> Self {
        self.deadlock_check_interval = interval;
        self
    }

    /// Sets the reaper interval.
    #[must_use]
    pub const fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Sets the key expiry sweep interval.
    #[must_use]
    pub const fn expiry_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry_sweep_interval = interval;
        self
    }

    /// Sets the largest transaction handle.
    #[must_use]
    pub const fn max_transaction_id(mut self, max: u64) -> Self {
        self.max_transaction_id = max;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the handle space is empty or a pessimistic
    /// mode has no deadlock detector interval.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_transaction_id == 0 {
            return Err(CoreError::invalid_config(
                "max_transaction_id must be at least 1",
            ));
        }
        if self.mode.is_pessimistic() && self.deadlock_check_interval.is_zero() {
            return Err(CoreError::invalid_config(
                "pessimistic modes need a non-zero deadlock_check_interval",
            ));
        }
        Ok(())
    }
}
