//! Physics capabilities.
//!
//! The engine never integrates forces itself. It talks to two traits:
//!
//! - [`PhysicsWorld`]: the opaque integrator plus per-body state access.
//! - [`PhysicsController`]: owns a world and decides how time moves through
//!   it (forward one step, back `n` steps, replay inside a bracketed window).
//!
//! Two controller strategies are provided:
//!
//! | Strategy                         | Rewind                            |
//! |----------------------------------|-----------------------------------|
//! | [`RewindablePhysicsController`]  | restores every body from history  |
//! | [`KinematicPhysicsController`]   | freezes bystanders, replays focus |

mod kinematic;
mod rewindable;

pub use kinematic::KinematicPhysicsController;
pub use rewindable::RewindablePhysicsController;

use tickback_core::{BodyHandle, BodyState, Tick, Vec3};

use crate::error::RewindError;

/// Deterministic fixed-step integrator.
///
/// Identical starting state plus identical applied forces must yield
/// identical results; that is the only assumption the engine makes.
pub trait PhysicsWorld {
    /// Integrates one fixed step and clears accumulated forces.
    fn step(&mut self, dt: f32);

    /// Current state of `body`, `None` if the world does not know it.
    fn body_state(&self, body: BodyHandle) -> Option<BodyState>;

    /// Overwrites the state of `body`.
    fn set_body_state(&mut self, body: BodyHandle, state: BodyState);

    /// Accumulates a force for the next step.
    fn add_force(&mut self, body: BodyHandle, force: Vec3);

    /// Accumulates a torque for the next step.
    fn add_torque(&mut self, body: BodyHandle, torque: Vec3);

    /// Kinematic bodies keep their state through steps.
    fn set_kinematic(&mut self, body: BodyHandle, kinematic: bool);
}

/// Owner of the simulation clock and the only legal way to move the world
/// backward in time.
pub trait PhysicsController {
    /// Configures the controller for the authority or a client.
    fn setup(&mut self, is_authority: bool);

    /// Tick that the next [`PhysicsController::simulate`] call will produce.
    fn tick(&self) -> Tick;

    /// Advances the world one fixed step in real time.
    fn simulate(&mut self);

    /// Moves the clock back `ticks` and restores the world at that tick.
    ///
    /// On success the clock points at the first tick to replay.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError`] without mutating anything when the history
    /// cannot reach the target.
    fn rewind(&mut self, ticks: u32) -> Result<(), RewindError>;

    /// Opens a replay window.
    fn before_resimulate(&mut self);

    /// Marks `body` as one being replayed inside the open window.
    fn before_resimulate_body(&mut self, _body: BodyHandle) {}

    /// Advances the world one fixed step inside a replay window.
    fn resimulate(&mut self);

    /// Releases `body` after its replay.
    fn after_resimulate_body(&mut self, _body: BodyHandle) {}

    /// Closes the replay window and applies staged tracking changes.
    fn after_resimulate(&mut self);

    /// Starts recording `body`.
    fn track(&mut self, body: BodyHandle);

    /// Stops recording `body`.
    fn untrack(&mut self, body: BodyHandle);

    /// True if `body` is currently tracked.
    fn is_tracked(&self, body: BodyHandle) -> bool;

    /// Number of tracked bodies.
    fn tracked_count(&self) -> usize;

    /// Forgets all bodies and history and resets the clock.
    fn clear(&mut self);

    /// The controlled world.
    fn world(&self) -> &dyn PhysicsWorld;

    /// The controlled world, mutably.
    fn world_mut(&mut self) -> &mut dyn PhysicsWorld;
}
