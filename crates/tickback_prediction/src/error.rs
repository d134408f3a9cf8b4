//! # Prediction Error Types
//!
//! Only configuration and API misuse are errors. Network anomalies are
//! diagnostics (see [`crate::events`]), never errors.

use thiserror::Error;
use tickback_core::{ConnectionId, EntityId};

use crate::manager::Role;

/// Setup-time configuration failures. Always fatal to initialization.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A collaborator required by the selected role was not supplied.
    #[error("missing {collaborator} required for {role:?} role")]
    MissingCollaborator {
        /// What is missing.
        collaborator: &'static str,
        /// Role that requires it.
        role: Role,
    },

    /// A configuration value is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration text is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Rewind requests the world history cannot satisfy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindError {
    /// Rewinding by zero ticks is meaningless.
    #[error("rewind distance must be at least one tick")]
    ZeroDistance,

    /// Not enough recorded ticks to reach the target.
    #[error("insufficient history: requested {requested} ticks, {available} available")]
    InsufficientHistory {
        /// Ticks requested.
        requested: u32,
        /// Ticks that can be rewound.
        available: u32,
    },
}

/// Failure reported by an outbound transport hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The peer is gone.
    #[error("connection {0} is closed")]
    Disconnected(ConnectionId),

    /// The transport refused or failed the send.
    #[error("send failed: {0}")]
    Send(String),
}

/// Misuse of the manager API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredictionError {
    /// Operation is only valid for another role.
    #[error("{operation} is not valid for the {role:?} role")]
    WrongRole {
        /// Operation attempted.
        operation: &'static str,
        /// Role of the manager.
        role: Role,
    },

    /// No entity registered under this id.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Entity id already registered.
    #[error("entity {0} is already registered")]
    DuplicateEntity(EntityId),
}

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, PredictionError>;
