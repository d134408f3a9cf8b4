//! Deterministic point-mass world.
//!
//! Semi-implicit Euler over a `BTreeMap`, so iteration order (and therefore
//! every result) depends only on body handles. Good enough to exercise the
//! rollback engine; real games plug in their own integrator.

use std::collections::BTreeMap;

use tickback_core::{BodyHandle, BodyState, Vec3};

use crate::physics::PhysicsWorld;

#[derive(Clone, Debug)]
struct PointMass {
    state: BodyState,
    inverse_mass: f32,
    force: Vec3,
    torque: Vec3,
    kinematic: bool,
}

/// Reference [`PhysicsWorld`] implementation.
#[derive(Clone, Debug, Default)]
pub struct PointMassWorld {
    bodies: BTreeMap<BodyHandle, PointMass>,
    next_handle: u32,
    gravity: Vec3,
    steps: u64,
}

impl PointMassWorld {
    /// Empty world without gravity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty world with constant acceleration `gravity`.
    #[must_use]
    pub fn with_gravity(gravity: Vec3) -> Self {
        Self {
            gravity,
            ..Self::default()
        }
    }

    /// Adds a unit-mass body.
    pub fn spawn(&mut self, state: BodyState) -> BodyHandle {
        self.spawn_with_mass(state, 1.0)
    }

    /// Adds a body of `mass` (clamped to a small positive value).
    pub fn spawn_with_mass(&mut self, state: BodyState, mass: f32) -> BodyHandle {
        let handle = BodyHandle(self.next_handle);
        self.next_handle += 1;
        self.bodies.insert(
            handle,
            PointMass {
                state,
                inverse_mass: 1.0 / mass.max(1e-6),
                force: Vec3::ZERO,
                torque: Vec3::ZERO,
                kinematic: false,
            },
        );
        handle
    }

    /// Removes a body.
    pub fn despawn(&mut self, body: BodyHandle) -> bool {
        self.bodies.remove(&body).is_some()
    }

    /// Number of bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// True if the world is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Steps integrated so far, replays included.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// True if `body` is currently kinematic.
    #[must_use]
    pub fn is_kinematic(&self, body: BodyHandle) -> bool {
        self.bodies.get(&body).is_some_and(|b| b.kinematic)
    }
}

impl PhysicsWorld for PointMassWorld {
    fn step(&mut self, dt: f32) {
        let gravity = self.gravity;
        for body in self.bodies.values_mut() {
            if !body.kinematic {
                let s = &mut body.state;
                s.velocity += (body.force * body.inverse_mass + gravity) * dt;
                s.position += s.velocity * dt;
                s.angular_velocity += body.torque * body.inverse_mass * dt;
                s.orientation = s.orientation.integrate(s.angular_velocity, dt);
            }
            body.force = Vec3::ZERO;
            body.torque = Vec3::ZERO;
        }
        self.steps += 1;
    }

    fn body_state(&self, body: BodyHandle) -> Option<BodyState> {
        self.bodies.get(&body).map(|b| b.state)
    }

    fn set_body_state(&mut self, body: BodyHandle, state: BodyState) {
        if let Some(b) = self.bodies.get_mut(&body) {
            b.state = state;
        }
    }

    fn add_force(&mut self, body: BodyHandle, force: Vec3) {
        if let Some(b) = self.bodies.get_mut(&body) {
            b.force += force;
        }
    }

    fn add_torque(&mut self, body: BodyHandle, torque: Vec3) {
        if let Some(b) = self.bodies.get_mut(&body) {
            b.torque += torque;
        }
    }

    fn set_kinematic(&mut self, body: BodyHandle, kinematic: bool) {
        if let Some(b) = self.bodies.get_mut(&body) {
            b.kinematic = kinematic;
        }
    }
}
