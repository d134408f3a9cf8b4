//! Authority-side input intake.
//!
//! Client inputs arrive tagged with the client's tick, possibly late, out of
//! order, duplicated or not at all. The authority never waits: every tick it
//! drains at most one input (plus catch-up passes) and keeps simulating.
//!
//! ```text
//!   queue (tick-indexed, keyed by client tick)
//!   ┌────┬────┬────┬────┬────┐
//!   │ 12 │ 13 │    │ 15 │ 16 │      applied tick = 11
//!   └────┴────┴────┴────┴────┘
//!     │
//!     └─► pass: purge <= 11, take 12, validate, load, forces
//!   catch-up: fill / (capacity / sections + 1) extra passes
//! ```

use tickback_core::{BodyHandle, EntityId, InputRecord, StateRecord, Tick, TickIndexedBuffer};

use crate::component::{ComponentSet, PredictableComponent};
use crate::config::{PredictionConfig, ServerIntakeConfig};
use crate::events::{DesyncReason, EventSink, PredictionEvent};
use crate::physics::PhysicsWorld;

/// Intake counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Inputs loaded.
    pub applied: u64,
    /// Passes that found an empty queue.
    pub ticks_without_input: u64,
    /// Ticks spent pre-buffering.
    pub buffered_ticks: u64,
    /// Inputs rejected by validation.
    pub invalid_inputs: u64,
    /// Inputs that arrived at or below the applied tick.
    pub late_inputs: u64,
    /// Forward jumps over missing ticks.
    pub jumps: u64,
    /// Ticks filled with the previous input.
    pub stale_inputs: u64,
    /// Passes that consumed more than one queued input.
    pub multiple_inputs: u64,
    /// Inputs refused because the queue was full.
    pub overflows: u64,
    /// Extra catch-up passes run.
    pub catchup_passes: u64,
    /// Largest tick span seen in the queue.
    pub max_client_delay: u32,
}

/// Authority-side intake for one client-controlled body.
#[derive(Debug)]
pub struct ServerPredictedEntity {
    id: EntityId,
    body: BodyHandle,
    components: ComponentSet,
    inputs: TickIndexedBuffer<InputRecord>,
    config: ServerIntakeConfig,
    fixed_delta_time: f32,
    /// Client tick of the last applied input.
    tick: Tick,
    /// Client tick of the last input that passed validation.
    last_loaded: Tick,
    last_input: Option<InputRecord>,
    buffering: bool,
    received_input: bool,
    stats: ServerStats,
    events: EventSink,
}

impl ServerPredictedEntity {
    /// Creates an intake with a queue of `config.history_size` ticks.
    #[must_use]
    pub fn new(
        id: EntityId,
        body: BodyHandle,
        components: Vec<Box<dyn PredictableComponent>>,
        config: &PredictionConfig,
        events: EventSink,
    ) -> Self {
        Self {
            id,
            body,
            components: ComponentSet::new(components),
            inputs: TickIndexedBuffer::new(config.history_size),
            config: config.server.clone(),
            fixed_delta_time: config.fixed_delta_time(),
            tick: Tick::ZERO,
            last_loaded: Tick::ZERO,
            last_input: None,
            buffering: config.server.use_buffering,
            received_input: false,
            stats: ServerStats::default(),
            events,
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Simulated body.
    #[must_use]
    pub fn body(&self) -> BodyHandle {
        self.body
    }

    /// Client tick of the last applied input.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// True while held back by the pre-buffer.
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Inputs waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inputs.fill()
    }

    /// Most recently loaded input.
    #[must_use]
    pub fn last_input(&self) -> Option<&InputRecord> {
        self.last_input.as_ref()
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Queues a client input for `tick`. Returns `false` if it was refused.
    pub fn buffer_client_tick(&mut self, tick: Tick, input: InputRecord) -> bool {
        if tick <= self.tick {
            self.stats.late_inputs += 1;
            self.desync(DesyncReason::LateTick);
            return false;
        }
        if self.inputs.fill() >= self.inputs.capacity() && !self.inputs.contains(tick) {
            self.stats.overflows += 1;
            self.desync(DesyncReason::TickOverflow);
            return false;
        }
        if !self.inputs.add(tick, input) {
            self.stats.late_inputs += 1;
            self.desync(DesyncReason::LateTick);
            return false;
        }
        if !self.received_input {
            self.received_input = true;
            self.events.emit(PredictionEvent::FirstInputArrived { entity: self.id, tick });
        }
        self.stats.max_client_delay = self.stats.max_client_delay.max(self.inputs.range());
        true
    }

    /// Consumes queued input for this tick and applies forces. The caller
    /// steps physics afterwards.
    pub fn server_simulation_tick(&mut self, world: &mut dyn PhysicsWorld) {
        if self.buffering {
            if self.inputs.fill() < self.config.buffer_full_threshold {
                self.stats.buffered_ticks += 1;
                let reason = if self.inputs.is_empty() {
                    DesyncReason::NoInputForTick
                } else {
                    DesyncReason::InputBuffered
                };
                self.desync(reason);
                return;
            }
            self.buffering = false;
            tracing::debug!("{} pre-buffer released with {} inputs", self.id, self.inputs.fill());
        }

        self.drain_pass(world);

        if self.config.catchup {
            let section = self.inputs.capacity() / self.config.catchup_sections.max(1) + 1;
            let extra = self.inputs.fill() / section;
            if extra > 0 {
                self.stats.catchup_passes += extra as u64;
                self.desync(DesyncReason::Catchup);
                for _ in 0..extra {
                    self.drain_pass(world);
                }
            }
        }
    }

    /// Authoritative record for the applied tick, carrying the applied input
    /// and component state.
    #[must_use]
    pub fn sample_physics_state(&self, world: &dyn PhysicsWorld) -> Option<StateRecord> {
        let body = world.body_state(self.body)?;
        let mut record = StateRecord::from_body(self.tick, body);
        record.input.clone_from(&self.last_input);
        record.component_state = self.components.sample_state();
        Some(record)
    }

    /// Clears the queue, tick counter, pre-buffer and last input.
    pub fn reset(&mut self) {
        self.inputs.clear();
        self.tick = Tick::ZERO;
        self.last_loaded = Tick::ZERO;
        self.last_input = None;
        self.buffering = self.config.use_buffering;
        self.received_input = false;
    }

    fn drain_pass(&mut self, world: &mut dyn PhysicsWorld) {
        let mut consumed = 0;
        while let Some(stale) = self.inputs.start_tick().filter(|t| *t <= self.tick) {
            self.inputs.remove(stale);
            consumed += 1;
        }

        match self.inputs.start_tick() {
            Some(next) => {
                let gap = next.since(self.tick);
                let stale_fill = gap > 1 && self.config.apply_stale_input && self.last_input.is_some();
                if stale_fill {
                    self.tick = self.tick.next();
                    self.stats.stale_inputs += 1;
                    self.desync(DesyncReason::InputJump);
                    self.reload_last_input();
                } else {
                    if gap > 1 && self.last_input.is_some() {
                        self.stats.jumps += 1;
                        self.desync(DesyncReason::InputJump);
                    }
                    self.tick = next;
                    if let Some(input) = self.inputs.remove(next) {
                        consumed += 1;
                        self.load(next, input);
                    }
                }
            }
            None => {
                self.stats.ticks_without_input += 1;
                self.desync(DesyncReason::NoInputForTick);
                if self.config.apply_stale_input {
                    self.reload_last_input();
                }
                if self.config.advance_without_input {
                    self.tick = self.tick.next();
                }
            }
        }

        if consumed > 1 {
            self.stats.multiple_inputs += 1;
            self.desync(DesyncReason::MultipleInputsPerTick);
        }
        self.components.apply_forces(self.body, world);
    }

    fn load(&mut self, tick: Tick, input: InputRecord) {
        let dt = tick.since(self.last_loaded).max(1) as f32 * self.fixed_delta_time;
        if !self.components.validate_input(dt, &input) {
            self.stats.invalid_inputs += 1;
            self.desync(DesyncReason::InvalidInput);
            return;
        }
        if !self.components.load_input(&input) {
            self.events.emit(PredictionEvent::InputLayoutMismatch { entity: self.id, tick });
        }
        self.stats.applied += 1;
        self.last_loaded = tick;
        self.last_input = Some(input);
    }

    fn reload_last_input(&mut self) {
        if let Some(input) = &self.last_input {
            self.components.load_input(input);
        }
    }

    fn desync(&self, reason: DesyncReason) {
        self.events.emit(PredictionEvent::Desync {
            entity: self.id,
            tick: self.tick,
            reason,
        });
    }
}
