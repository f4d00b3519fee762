use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default relative timeout of a freshly created transfer (24 hours).
pub const DEFAULT_TRANSFER_TIMEOUT: u64 = 60 * 60 * 24;
/// Lowest timeout a forwarded hop may carry (12 hours).
pub const MINIMUM_TRANSFER_TIMEOUT: u64 = DEFAULT_TRANSFER_TIMEOUT / 2;
/// Highest timeout a transfer may carry (48 hours).
pub const MAXIMUM_TRANSFER_TIMEOUT: u64 = DEFAULT_TRANSFER_TIMEOUT * 2;
/// Per-hop timeout decrement (72 minutes). Must stay well below the gap
/// between the default and the minimum so a path can fit ten hops.
pub const TRANSFER_DECREMENT: u64 = 60 * 72;

/// Default channel dispute timeout (48 hours).
pub const DEFAULT_CHANNEL_TIMEOUT: u64 = DEFAULT_TRANSFER_TIMEOUT * 2;
pub const MINIMUM_CHANNEL_TIMEOUT: u64 = DEFAULT_TRANSFER_TIMEOUT;
pub const MAXIMUM_CHANNEL_TIMEOUT: u64 = DEFAULT_TRANSFER_TIMEOUT * 14;

/// Number of collateral requests made before a forward is given up.
pub const DEFAULT_COLLATERAL_ATTEMPTS: u32 = 3;
/// Delay between collateral re-checks, in milliseconds.
pub const DEFAULT_COLLATERAL_RETRY_MS: u64 = 5_000;

/// Tunables of the forwarding engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// Seconds removed from the timeout at every hop.
    #[serde(default = "default_decrement")]
    pub transfer_decrement_secs: u64,
    /// Floor below which a hop is rejected instead of forwarded.
    #[serde(default = "default_min_timeout")]
    pub min_transfer_timeout_secs: u64,
    /// Collateral requests before failing with insufficient collateral.
    #[serde(default = "default_collateral_attempts")]
    pub collateral_attempts: u32,
    /// Wait between collateral re-checks.
    #[serde(default = "default_collateral_retry_ms")]
    pub collateral_retry_ms: u64,
}

fn default_decrement() -> u64 {
    TRANSFER_DECREMENT
}
fn default_min_timeout() -> u64 {
    MINIMUM_TRANSFER_TIMEOUT
}
fn default_collateral_attempts() -> u32 {
    DEFAULT_COLLATERAL_ATTEMPTS
}
fn default_collateral_retry_ms() -> u64 {
    DEFAULT_COLLATERAL_RETRY_MS
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            transfer_decrement_secs: default_decrement(),
            min_transfer_timeout_secs: default_min_timeout(),
            collateral_attempts: default_collateral_attempts(),
            collateral_retry_ms: default_collateral_retry_ms(),
        }
    }
}

impl ForwardingConfig {
    /// Timeout the outbound hop gets for a given inbound timeout, or `None`
    /// when it would fall below the floor.
    pub fn outbound_timeout(&self, inbound_timeout: u64) -> Option<u64> {
        inbound_timeout
            .checked_sub(self.transfer_decrement_secs)
            .filter(|t| *t >= self.min_transfer_timeout_secs)
    }

    /// How many hops a default-timeout payment can traverse.
    pub fn max_hops(&self) -> u64 {
        if self.transfer_decrement_secs == 0 {
            return 0;
        }
        DEFAULT_TRANSFER_TIMEOUT.saturating_sub(self.min_transfer_timeout_secs)
            / self.transfer_decrement_secs
    }

    pub fn collateral_retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.collateral_retry_ms)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.transfer_decrement_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "transfer_decrement_secs must be greater than zero".into(),
            ));
        }
        if self.min_transfer_timeout_secs == 0
            || self.min_transfer_timeout_secs >= MAXIMUM_TRANSFER_TIMEOUT
        {
            return Err(CoreError::InvalidConfig(format!(
                "min_transfer_timeout_secs must be in (0, {MAXIMUM_TRANSFER_TIMEOUT})"
            )));
        }
        if self.collateral_attempts == 0 {
            return Err(CoreError::InvalidConfig(
                "collateral_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
