//! Snapshot-restore strategy without world history.
//!
//! Instead of rewinding every body, a replay window freezes the whole world
//! (all bodies kinematic, states saved), releases only the bodies being
//! replayed, and afterwards puts every bystander back exactly where it was.
//! Cheaper than full history, at the cost of bystanders not reacting to the
//! corrected trajectory during the replay.

use std::collections::{BTreeMap, BTreeSet};

use tickback_core::{BodyHandle, BodyState, Tick};

use super::{PhysicsController, PhysicsWorld};
use crate::config::PredictionConfig;
use crate::error::RewindError;
use crate::events::{EventSink, PredictionEvent};

const FIRST_TICK: Tick = Tick(1);

/// Controller that replays only the focused bodies.
#[derive(Debug)]
pub struct KinematicPhysicsController<W> {
    world: W,
    fixed_delta_time: f32,
    /// Maximum replay depth (matches the entities' local history).
    max_rewind: u32,
    tick: Tick,
    bodies: BTreeSet<BodyHandle>,
    saved: BTreeMap<BodyHandle, BodyState>,
    replayed: BTreeSet<BodyHandle>,
    resimulating: bool,
    events: EventSink,
}

impl<W: PhysicsWorld> KinematicPhysicsController<W> {
    /// Creates a controller allowing replays up to `max_rewind` ticks deep.
    #[must_use]
    pub fn new(world: W, max_rewind: u32, fixed_delta_time: f32, events: EventSink) -> Self {
        Self {
            world,
            fixed_delta_time,
            max_rewind,
            tick: FIRST_TICK,
            bodies: BTreeSet::new(),
            saved: BTreeMap::new(),
            replayed: BTreeSet::new(),
            resimulating: false,
            events,
        }
    }

    /// Creates a controller sized from `config`.
    #[must_use]
    pub fn from_config(world: W, config: &PredictionConfig, events: EventSink) -> Self {
        Self::new(
            world,
            u32::try_from(config.history_size).unwrap_or(u32::MAX),
            config.fixed_delta_time(),
            events,
        )
    }

    /// The concrete world.
    #[must_use]
    pub fn inner(&self) -> &W {
        &self.world
    }

    /// The concrete world, mutably.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.world
    }

    fn freeze(&mut self, body: BodyHandle) {
        if let Some(state) = self.world.body_state(body) {
            self.saved.insert(body, state);
        }
        self.world.set_kinematic(body, true);
    }
}

impl<W: PhysicsWorld> PhysicsController for KinematicPhysicsController<W> {
    fn setup(&mut self, is_authority: bool) {
        tracing::info!("kinematic physics ready: authority={is_authority}");
    }

    fn tick(&self) -> Tick {
        self.tick
    }

    fn simulate(&mut self) {
        self.world.step(self.fixed_delta_time);
        self.tick = self.tick.next();
    }

    fn rewind(&mut self, ticks: u32) -> Result<(), RewindError> {
        if ticks == 0 {
            return Err(RewindError::ZeroDistance);
        }
        let available = self.tick.since(FIRST_TICK).min(self.max_rewind);
        if ticks > available {
            self.events.emit(PredictionEvent::RewindRejected {
                requested: ticks,
                available,
            });
            return Err(RewindError::InsufficientHistory {
                requested: ticks,
                available,
            });
        }
        // Bodies are restored by the entities being replayed; only the clock moves.
        let from = self.tick;
        let target = self.tick - ticks;
        self.tick = target.next();
        self.events.emit(PredictionEvent::Rewound { from, to: target });
        Ok(())
    }

    fn before_resimulate(&mut self) {
        self.resimulating = true;
        let bodies: Vec<BodyHandle> = self.bodies.iter().copied().collect();
        for body in bodies {
            self.freeze(body);
        }
    }

    fn before_resimulate_body(&mut self, body: BodyHandle) {
        self.replayed.insert(body);
        self.world.set_kinematic(body, false);
    }

    fn resimulate(&mut self) {
        self.simulate();
    }

    fn after_resimulate(&mut self) {
        for (body, state) in std::mem::take(&mut self.saved) {
            self.world.set_kinematic(body, false);
            if !self.replayed.contains(&body) {
                self.world.set_body_state(body, state);
            }
        }
        self.replayed.clear();
        self.resimulating = false;
    }

    fn track(&mut self, body: BodyHandle) {
        if self.bodies.insert(body) {
            if self.resimulating {
                self.freeze(body);
            }
            self.events.emit(PredictionEvent::BodyTracked {
                body,
                spawn_tick: self.tick,
            });
        }
    }

    fn untrack(&mut self, body: BodyHandle) {
        if self.bodies.remove(&body) {
            if self.saved.remove(&body).is_some() {
                self.world.set_kinematic(body, false);
            }
            self.events.emit(PredictionEvent::BodyUntracked { body });
        }
    }

    fn is_tracked(&self, body: BodyHandle) -> bool {
        self.bodies.contains(&body)
    }

    fn tracked_count(&self) -> usize {
        self.bodies.len()
    }

    fn clear(&mut self) {
        self.bodies.clear();
        self.saved.clear();
        self.replayed.clear();
        self.resimulating = false;
        self.tick = FIRST_TICK;
    }

    fn world(&self) -> &dyn PhysicsWorld {
        &self.world
    }

    fn world_mut(&mut self) -> &mut dyn PhysicsWorld {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::PointMassWorld;
    use tickback_core::Vec3;

    #[test]
    fn test_bystanders_restored_after_replay() {
        let mut world = PointMassWorld::new();
        let mover = world.spawn(BodyState::at(Vec3::ZERO));
        let bystander = world.spawn(BodyState {
            velocity: Vec3::X,
            ..BodyState::default()
        });
        let mut c = KinematicPhysicsController::new(world, 32, 1.0, EventSink::new());
        c.track(mover);
        c.track(bystander);

        for _ in 0..4 {
            c.simulate();
        }
        let bystander_before = c.inner().body_state(bystander);
        assert_eq!(bystander_before.map(|s| s.position), Some(Vec3::new(4.0, 0.0, 0.0)));

        assert!(c.rewind(2).is_ok());
        assert_eq!(c.tick(), Tick(4));
        c.before_resimulate();
        c.before_resimulate_body(mover);
        c.world_mut().set_body_state(mover, BodyState {
            velocity: Vec3::Y,
            ..BodyState::default()
        });
        c.resimulate();
        // Frozen during the window
        assert_eq!(c.inner().body_state(bystander), bystander_before);
        c.after_resimulate_body(mover);
        c.after_resimulate();

        assert_eq!(c.tick(), Tick(5));
        assert_eq!(c.inner().body_state(bystander), bystander_before);
        assert_eq!(c.inner().body_state(mover).map(|s| s.position), Some(Vec3::Y));

        // Released again
        c.simulate();
        assert_eq!(c.inner().body_state(bystander).map(|s| s.position), Some(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn test_rewind_bounds() {
        let mut c = KinematicPhysicsController::new(PointMassWorld::new(), 2, 1.0, EventSink::new());
        c.simulate();
        c.simulate();
        c.simulate();
        assert!(c.rewind(3).is_err());
        assert!(c.rewind(2).is_ok());
        assert_eq!(c.tick(), Tick(3));
    }
}
