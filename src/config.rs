//! Engine configuration with validation and defaults.

use crate::errors::{GameError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Round-engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Countdown ticks announced before a round starts running.
    pub countdown_ticks: u32,
    /// Spacing between countdown ticks (milliseconds).
    pub countdown_interval_ms: u64,
    /// Multiplier tick interval while a round is running (milliseconds).
    pub tick_interval_ms: u64,
    /// Round length used when the caller does not specify one (milliseconds).
    pub default_round_length_ms: u64,
    /// Include the crash multiplier in the `RoundStarted` event. Off by
    /// default: the outcome stays hidden until settlement.
    pub reveal_crash_on_start: bool,
    /// Maximum settled rounds retained in the history log.
    pub history_capacity: usize,
    /// Event broadcast channel capacity.
    pub event_capacity: usize,
    pub entropy: EntropyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 3,
            countdown_interval_ms: 1_000,
            tick_interval_ms: 100,
            default_round_length_ms: 8_000,
            reveal_crash_on_start: false,
            history_capacity: 500,
            event_capacity: 1_024,
            entropy: EntropyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate field ranges before the engine is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(GameError::InvalidInput(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.default_round_length_ms == 0 {
            return Err(GameError::InvalidInput(
                "default_round_length_ms must be positive".to_string(),
            ));
        }
        if self.countdown_ticks > 0 && self.countdown_interval_ms == 0 {
            return Err(GameError::InvalidInput(
                "countdown_interval_ms must be positive".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(GameError::InvalidInput(
                "history_capacity must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(GameError::InvalidInput(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_millis(self.countdown_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Configuration for the external client-seed source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntropyConfig {
    /// Endpoint returning a recent public block hash. `None` disables the
    /// fetch entirely and every round uses a locally generated seed.
    pub endpoint: Option<String>,
    /// Request timeout (milliseconds).
    pub timeout_ms: u64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 2_000,
        }
    }
}

impl EntropyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
