//! Prediction configuration.
//!
//! Loaded once at startup from TOML. Every section is optional and falls
//! back to defaults tuned for a 60 Hz simulation.
//!
//! ```toml
//! tick_rate = 60
//! history_size = 64
//!
//! [client.oversimulation]
//! step_budget_per_tick = 1
//!
//! [server]
//! use_buffering = true
//! buffer_full_threshold = 3
//!
//! [decider]
//! distance = 0.0001
//! correction = "resimulate"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Top-level configuration shared by client and authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// History depth in ticks for every per-entity and per-body buffer.
    pub history_size: usize,
    /// Track entity bodies with the physics coordinator when entities are added.
    pub auto_track_bodies: bool,
    /// Send one batched world state per connection instead of one per entity.
    pub world_state_batching: bool,
    /// Client-side behavior.
    pub client: ClientConfig,
    /// Authority-side input intake.
    pub server: ServerIntakeConfig,
    /// Divergence thresholds.
    pub decider: DeciderConfig,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            history_size: tickback_core::DEFAULT_HISTORY_SIZE,
            auto_track_bodies: true,
            world_state_batching: false,
            client: ClientConfig::default(),
            server: ServerIntakeConfig::default(),
            decider: DeciderConfig::default(),
        }
    }
}

impl PredictionConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input and
    /// [`ConfigError::InvalidValue`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`PredictionConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Fixed step duration in seconds.
    #[must_use]
    pub fn fixed_delta_time(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(invalid("tick_rate", "must be positive"));
        }
        if self.history_size < 2 {
            return Err(invalid("history_size", "must hold at least two ticks"));
        }
        if self.client.oversimulation.enabled && self.client.oversimulation.step_budget_per_tick == 0 {
            return Err(invalid(
                "client.oversimulation.step_budget_per_tick",
                "must be positive while the guard is enabled",
            ));
        }
        if self.server.catchup_sections == 0 {
            return Err(invalid("server.catchup_sections", "must be positive"));
        }
        if self.server.use_buffering && self.server.buffer_full_threshold > self.history_size {
            return Err(invalid(
                "server.buffer_full_threshold",
                format!("{} exceeds history_size {}", self.server.buffer_full_threshold, self.history_size),
            ));
        }
        let decider = &self.decider;
        for (field, value) in [
            ("decider.distance", decider.distance),
            ("decider.rotation_degrees", decider.rotation_degrees),
            ("decider.velocity_angle_degrees", decider.velocity_angle_degrees),
            ("decider.speed_delta", decider.speed_delta),
            ("decider.angular_velocity_delta", decider.angular_velocity_delta),
        ] {
            if value.is_nan() {
                return Err(invalid(field, "must be a number"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Client prediction behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Allow resimulation at all. When off, corrections are snaps.
    pub resimulation_enabled: bool,
    /// Allow snapping at all. When off, snap decisions are ignored.
    pub snap_enabled: bool,
    /// Demote a budget-blocked resimulation to a snap.
    pub snap_on_skip: bool,
    /// During replay, snap entities to authoritative states that exist for
    /// the replayed tick.
    pub use_available_server_ticks: bool,
    /// Only the locally controlled entity may request corrections.
    pub ignore_non_local_decisions: bool,
    /// Followers that carry input may not request corrections.
    pub ignore_controllable_follower_decisions: bool,
    /// Replay budget.
    pub oversimulation: OversimulationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resimulation_enabled: true,
            snap_enabled: true,
            snap_on_skip: true,
            use_available_server_ticks: false,
            ignore_non_local_decisions: false,
            ignore_controllable_follower_decisions: false,
            oversimulation: OversimulationConfig::default(),
        }
    }
}

/// Step-debt replay budget.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OversimulationConfig {
    /// When off, every resimulation request is granted.
    pub enabled: bool,
    /// Replayed steps repaid per predicted tick.
    pub step_budget_per_tick: u32,
}

impl Default for OversimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_budget_per_tick: 1,
        }
    }
}

/// Authority input intake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerIntakeConfig {
    /// Hold the entity idle until the queue has `buffer_full_threshold` inputs.
    pub use_buffering: bool,
    /// Queue fill that releases the pre-buffer.
    pub buffer_full_threshold: usize,
    /// Run extra drain passes when the backlog grows.
    pub catchup: bool,
    /// Queue capacity is split into this many sections for catch-up sizing.
    pub catchup_sections: usize,
    /// Fill missing ticks with the most recent known input.
    pub apply_stale_input: bool,
    /// Advance the authority tick even when no input is available.
    pub advance_without_input: bool,
}

impl Default for ServerIntakeConfig {
    fn default() -> Self {
        Self {
            use_buffering: true,
            buffer_full_threshold: 3,
            catchup: true,
            catchup_sections: 3,
            apply_stale_input: false,
            advance_without_input: false,
        }
    }
}

/// What a decider returns when a threshold is exceeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Replay from the diverged tick.
    #[default]
    Resimulate,
    /// Copy the authoritative state.
    Snap,
}

/// Divergence thresholds. A value of zero or below disables that check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeciderConfig {
    /// Position distance.
    pub distance: f32,
    /// Orientation angle in degrees.
    pub rotation_degrees: f32,
    /// Angle between velocity vectors in degrees.
    pub velocity_angle_degrees: f32,
    /// Difference of speeds.
    pub speed_delta: f32,
    /// Length of the angular velocity difference.
    pub angular_velocity_delta: f32,
    /// Correction requested when a threshold is exceeded.
    pub correction: CorrectionMode,
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            distance: 0.0001,
            rotation_degrees: 0.0001,
            velocity_angle_degrees: 0.0,
            speed_delta: 0.001,
            angular_velocity_delta: 0.001,
            correction: CorrectionMode::Resimulate,
        }
    }
}
