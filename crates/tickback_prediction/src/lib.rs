//! # Tickback Prediction - Rollback Netcode
//!
//! Client-side prediction with server reconciliation for fixed-tick physics.
//!
//! ## Architecture
//!
//! - **Client**: predicts every tick from local input, compares each
//!   authoritative state with its own history, and snaps or replays
//! - **Server**: drains per-entity input queues that arrive late, out of
//!   order or not at all, and never waits for a client
//! - **Physics**: a controller owns the world clock; only it can move time
//!   backward, and only inside a bracketed replay window
//! - **Policy**: a decider says whether a prediction stands; a step-debt
//!   guard bounds how much replaying the client may do
//!
//! ## Timeline
//!
//! ```text
//! CLIENT                                   SERVER
//!   |  t: sample input, simulate             |
//!   |--- input(t) ------------------------->| queue[t]
//!   |  t+1, t+2, ... keep predicting         | drain queue, simulate
//!   |<-- state(t) ---------------------------|
//!   |  compare local[t] with state(t)        |
//!   |    equal     -> accept                 |
//!   |    diverged  -> rewind to t, replay    |
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tickback_prediction::{PredictionManager, Role, RewindablePhysicsController};
//!
//! let mut client = PredictionManager::builder(Role::Client)
//!     .controller(Box::new(RewindablePhysicsController::from_config(world, &config, events.clone())))
//!     .client_link(Box::new(link))
//!     .config(config)
//!     .build()?;
//!
//! client.add_entity(EntityId(1), body, vec![Box::new(mover)])?;
//! loop {
//!     client.tick();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod component;
pub mod config;
pub mod decider;
pub mod error;
pub mod events;
pub mod guard;
pub mod link;
pub mod manager;
pub mod physics;
pub mod server;
pub mod simulation;

pub use client::{CheckOutcome, ClientPredictedEntity, ClientStats};
pub use component::{ComponentSet, PredictableComponent};
pub use config::{
    ClientConfig, CorrectionMode, DeciderConfig, OversimulationConfig, PredictionConfig, ServerIntakeConfig,
};
pub use decider::{DeciderStats, PredictionDecision, ResimulationDecider, ThresholdDecider};
pub use error::{ConfigError, LinkError, PredictionError, RewindError};
pub use events::{CheckReport, DesyncReason, EventSink, PredictionEvent, SkipReason, TickTiming};
pub use guard::OversimulationGuard;
pub use link::{ClientLink, Inbound, Inbox, ServerLink};
pub use manager::{ManagerStats, PredictionManager, PredictionManagerBuilder, Role};
pub use physics::{KinematicPhysicsController, PhysicsController, PhysicsWorld, RewindablePhysicsController};
pub use server::{ServerPredictedEntity, ServerStats};

pub use tickback_core::{
    BodyHandle, BodyState, ConnectionId, EntityId, InputLayout, InputReader, InputRecord, InputWriter, Quaternion,
    StateRecord, Tick, Vec3, WorldStateRecord,
};
