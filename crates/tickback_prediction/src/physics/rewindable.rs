//! Rewindable world: per-body history with spawn-aware replay.
//!
//! ```text
//!   real time ─────────────────────────────────►
//!   tick       1    2    3    4    5    6
//!   body A     ●────●────●────●────●────●      tracked at 1
//!   body B                         ●────●      tracked at 5 (spawn tick 5)
//!
//!   rewind to 3:  A ← history[3]
//!                 B ← OUT_OF_BOUNDS  (not spawned yet)
//!   replay 4, 5:  after step 5, B ← history[5]   (spawn restore)
//! ```
//!
//! Tracking changes requested while a replay window is open are staged and
//! applied when it closes: untracks first, then tracks.

use std::collections::{BTreeMap, BTreeSet};

use tickback_core::{BodyHandle, BodyState, RingBuffer, Tick};

use super::{PhysicsController, PhysicsWorld};
use crate::config::PredictionConfig;
use crate::error::RewindError;
use crate::events::{EventSink, PredictionEvent};

/// First tick produced by a fresh controller.
const FIRST_TICK: Tick = Tick(1);

/// One recorded body state.
#[derive(Clone, Copy, Debug)]
struct HistoryEntry {
    tick: Tick,
    state: BodyState,
}

/// Controller that records every tracked body each tick and can restore the
/// whole world to any retained tick.
#[derive(Debug)]
pub struct RewindablePhysicsController<W> {
    world: W,
    fixed_delta_time: f32,
    history_size: usize,
    /// Tick the next step produces.
    tick: Tick,
    /// Clock in real (non-rewound) time.
    real_tick: Tick,
    history: BTreeMap<BodyHandle, RingBuffer<Option<HistoryEntry>>>,
    spawn_ticks: BTreeMap<BodyHandle, Tick>,
    spawned_at: BTreeMap<Tick, BTreeSet<BodyHandle>>,
    pending_tracks: Vec<BodyHandle>,
    pending_untracks: Vec<BodyHandle>,
    resimulating: bool,
    is_authority: bool,
    events: EventSink,
}

impl<W: PhysicsWorld> RewindablePhysicsController<W> {
    /// Creates a controller keeping `history_size` ticks per body.
    ///
    /// # Panics
    ///
    /// Panics if `history_size` is zero.
    #[must_use]
    pub fn new(world: W, history_size: usize, fixed_delta_time: f32, events: EventSink) -> Self {
        assert!(history_size > 0, "history size must be non-zero");
        Self {
            world,
            fixed_delta_time,
            history_size,
            tick: FIRST_TICK,
            real_tick: FIRST_TICK,
            history: BTreeMap::new(),
            spawn_ticks: BTreeMap::new(),
            spawned_at: BTreeMap::new(),
            pending_tracks: Vec::new(),
            pending_untracks: Vec::new(),
            resimulating: false,
            is_authority: false,
            events,
        }
    }

    /// Creates a controller sized from `config`.
    #[must_use]
    pub fn from_config(world: W, config: &PredictionConfig, events: EventSink) -> Self {
        Self::new(world, config.history_size, config.fixed_delta_time(), events)
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

    /// Tick in real time, unaffected by rewinds.
    #[must_use]
    pub fn real_tick(&self) -> Tick {
        self.real_tick
    }

    /// True while a replay window is open.
    #[must_use]
    pub fn is_resimulating(&self) -> bool {
        self.resimulating
    }

    /// True if configured for the authority.
    #[must_use]
    pub fn is_authority(&self) -> bool {
        self.is_authority
    }

    /// Spawn tick recorded for `body`.
    #[must_use]
    pub fn spawn_tick(&self, body: BodyHandle) -> Option<Tick> {
        self.spawn_ticks.get(&body).copied()
    }

    /// Recorded state of `body` at `tick`, if retained.
    #[must_use]
    pub fn recorded_state(&self, body: BodyHandle, tick: Tick) -> Option<BodyState> {
        let buffer = self.history.get(&body)?;
        match buffer.get(tick.slot(self.history_size)) {
            Some(entry) if entry.tick == tick => Some(entry.state),
            _ => None,
        }
    }

    /// Ticks a rewind can currently reach back.
    #[must_use]
    pub fn rewindable_ticks(&self) -> u32 {
        self.tick.since(FIRST_TICK).min(self.history_size as u32)
    }

    fn step(&mut self) {
        self.world.step(self.fixed_delta_time);
        if self.resimulating {
            self.restore_spawned(self.tick);
        }
        self.sample_world(self.tick);
        self.tick = self.tick.next();
        if !self.resimulating {
            self.real_tick = self.tick;
        }
    }

    fn sample_world(&mut self, tick: Tick) {
        let slot = tick.slot(self.history_size);
        for (body, buffer) in &mut self.history {
            if let Some(state) = self.world.body_state(*body) {
                buffer.set(slot, Some(HistoryEntry { tick, state }));
            }
        }
    }

    /// Puts bodies spawned at `tick` back on their real-time state.
    fn restore_spawned(&mut self, tick: Tick) {
        let Some(bodies) = self.spawned_at.get(&tick) else {
            return;
        };
        let slot = tick.slot(self.history_size);
        for body in bodies {
            let entry = self.history.get(body).and_then(|buffer| *buffer.get(slot));
            match entry {
                Some(entry) if entry.tick == tick => self.world.set_body_state(*body, entry.state),
                _ => self.events.emit(PredictionEvent::HistoryMissing { body: *body, tick }),
            }
        }
    }

    fn apply_world_state(&mut self, target: Tick) {
        let slot = target.slot(self.history_size);
        for (body, buffer) in &self.history {
            let spawn_tick = self.spawn_ticks.get(body).copied().unwrap_or(FIRST_TICK);
            if spawn_tick > target {
                self.world.set_body_state(*body, BodyState::OUT_OF_BOUNDS);
                self.events.emit(PredictionEvent::BodyOutOfBounds { body: *body, spawn_tick });
                continue;
            }
            match buffer.get(slot) {
                Some(entry) if entry.tick == target => self.world.set_body_state(*body, entry.state),
                _ => self.events.emit(PredictionEvent::HistoryMissing { body: *body, tick: target }),
            }
        }
    }

    fn apply_track(&mut self, body: BodyHandle) {
        self.forget(body);
        let spawn_tick = self.real_tick;
        self.history.insert(body, RingBuffer::new(self.history_size));
        self.spawn_ticks.insert(body, spawn_tick);
        self.spawned_at.entry(spawn_tick).or_default().insert(body);
        self.events.emit(PredictionEvent::BodyTracked { body, spawn_tick });
    }

    fn apply_untrack(&mut self, body: BodyHandle) {
        if self.forget(body) {
            self.events.emit(PredictionEvent::BodyUntracked { body });
        }
    }

    /// Drops history and spawn bookkeeping for `body`.
    fn forget(&mut self, body: BodyHandle) -> bool {
        let tracked = self.history.remove(&body).is_some();
        if let Some(spawn_tick) = self.spawn_ticks.remove(&body) {
            if let Some(bodies) = self.spawned_at.get_mut(&spawn_tick) {
                bodies.remove(&body);
                if bodies.is_empty() {
                    self.spawned_at.remove(&spawn_tick);
                }
            }
        }
        tracked
    }
}

impl<W: PhysicsWorld> PhysicsController for RewindablePhysicsController<W> {
    fn setup(&mut self, is_authority: bool) {
        self.is_authority = is_authority;
        tracing::info!(
            "rewindable physics ready: authority={is_authority}, history={} ticks",
            self.history_size
        );
    }

    fn tick(&self) -> Tick {
        self.tick
    }

    fn simulate(&mut self) {
        self.step();
    }

    fn rewind(&mut self, ticks: u32) -> Result<(), RewindError> {
        if ticks == 0 {
            return Err(RewindError::ZeroDistance);
        }
        let available = self.rewindable_ticks();
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

        let from = self.tick;
        let target = self.tick - ticks;
        self.apply_world_state(target);
        self.tick = target.next();
        self.events.emit(PredictionEvent::Rewound { from, to: target });
        Ok(())
    }

    fn before_resimulate(&mut self) {
        self.resimulating = true;
    }

    fn resimulate(&mut self) {
        self.step();
    }

    fn after_resimulate(&mut self) {
        self.resimulating = false;
        for body in std::mem::take(&mut self.pending_untracks) {
            self.apply_untrack(body);
        }
        for body in std::mem::take(&mut self.pending_tracks) {
            self.apply_track(body);
        }
    }

    fn track(&mut self, body: BodyHandle) {
        if self.resimulating {
            self.pending_tracks.push(body);
            self.events.emit(PredictionEvent::TrackDeferred { body, track: true });
        } else {
            self.apply_track(body);
        }
    }

    fn untrack(&mut self, body: BodyHandle) {
        if self.resimulating {
            self.pending_untracks.push(body);
            self.events.emit(PredictionEvent::TrackDeferred { body, track: false });
        } else {
            self.apply_untrack(body);
        }
    }

    fn is_tracked(&self, body: BodyHandle) -> bool {
        self.history.contains_key(&body)
    }

    fn tracked_count(&self) -> usize {
        self.history.len()
    }

    fn clear(&mut self) {
        self.history.clear();
        self.spawn_ticks.clear();
        self.spawned_at.clear();
        self.pending_tracks.clear();
        self.pending_untracks.clear();
        self.resimulating = false;
        self.tick = FIRST_TICK;
        self.real_tick = FIRST_TICK;
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

    fn controller() -> (RewindablePhysicsController<PointMassWorld>, BodyHandle) {
        let mut world = PointMassWorld::new();
        let body = world.spawn(BodyState::at(Vec3::ZERO));
        let mut c = RewindablePhysicsController::new(world, 16, 0.1, EventSink::new());
        c.track(body);
        (c, body)
    }

    #[test]
    fn test_clock_starts_at_one() {
        let (c, body) = controller();
        assert_eq!(c.tick(), Tick(1));
        assert_eq!(c.spawn_tick(body), Some(Tick(1)));
    }

    #[test]
    fn test_simulate_records_each_tick() {
        let (mut c, body) = controller();
        for _ in 0..3 {
            c.world_mut().add_force(body, Vec3::X);
            c.simulate();
        }
        assert_eq!(c.tick(), Tick(4));
        assert!(c.recorded_state(body, Tick(1)).is_some());
        assert!(c.recorded_state(body, Tick(3)).is_some());
        assert!(c.recorded_state(body, Tick(4)).is_none());
    }

    #[test]
    fn test_rewind_rejects_zero_and_too_far() {
        let (mut c, _) = controller();
        for _ in 0..3 {
            c.simulate();
        }
        assert_eq!(c.rewind(0), Err(RewindError::ZeroDistance));
        assert_eq!(
            c.rewind(4),
            Err(RewindError::InsufficientHistory {
                requested: 4,
                available: 3
            })
        );
        assert_eq!(c.tick(), Tick(4));
        assert!(c.rewind(3).is_ok());
        assert_eq!(c.tick(), Tick(2));
    }

    #[test]
    fn test_rewind_limited_by_history_depth() {
        let (mut c, _) = controller();
        for _ in 0..40 {
            c.simulate();
        }
        assert_eq!(c.rewindable_ticks(), 16);
        assert!(c.rewind(17).is_err());
        assert!(c.rewind(16).is_ok());
    }

    #[test]
    fn test_retrack_gets_fresh_history() {
        let (mut c, body) = controller();
        c.simulate();
        c.simulate();
        c.untrack(body);
        assert!(!c.is_tracked(body));
        c.track(body);
        assert_eq!(c.spawn_tick(body), Some(Tick(3)));
        assert!(c.recorded_state(body, Tick(2)).is_none());
    }

    #[test]
    fn test_clear_resets_clock() {
        let (mut c, _) = controller();
        c.simulate();
        c.clear();
        assert_eq!(c.tick(), Tick(1));
        assert_eq!(c.tracked_count(), 0);
    }
}
