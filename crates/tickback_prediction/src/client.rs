//! Client-side predicted entity.
//!
//! ```text
//!   tick t:  record(t-1) ─► sample input(t) ─► load ─► forces ─► [step] ─► record(t)
//!
//!   authoritative T arrives (T <= last applied L):
//!     decider(local[T], auth[T])
//!       NoOp        accept
//!       Snap        copy auth[T] onto the body
//!       Resimulate  rewind to T, snap, replay T+1..=L from buffered inputs
//! ```
//!
//! The entity owns three tick-indexed histories: local inputs, local states
//! and authoritative states. Every authoritative arrival is evaluated on its
//! own, independently of newer ticks already received.

use tickback_core::{BodyHandle, EntityId, InputRecord, StateRecord, Tick, TickIndexedBuffer};

use crate::component::{ComponentSet, PredictableComponent};
use crate::config::{ClientConfig, PredictionConfig};
use crate::decider::{PredictionDecision, ResimulationDecider};
use crate::events::{EventSink, PredictionEvent, SkipReason};
use crate::guard::OversimulationGuard;
use crate::physics::{PhysicsController, PhysicsWorld};

/// What happened to one authoritative state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Prediction matched.
    Accepted,
    /// The body was snapped to the authoritative state.
    Snapped,
    /// A replay ran.
    Resimulated {
        /// Replayed ticks.
        steps: u32,
    },
    /// The authoritative tick is ahead of local simulation.
    Deferred,
    /// Nothing was done (filtered, disabled, or no local history).
    Ignored,
}

/// Per-entity correction counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Ticks predicted.
    pub ticks: u64,
    /// Authoritative states accepted.
    pub accepted: u64,
    /// Snaps applied.
    pub snaps: u64,
    /// Replays run.
    pub resimulations: u64,
    /// Ticks replayed over all replays.
    pub replayed_steps: u64,
    /// Replays refused by the oversimulation guard.
    pub skipped_budget: u64,
    /// Replays refused by the physics history.
    pub skipped_history: u64,
    /// Authoritative states received ahead of local simulation.
    pub authority_ahead: u64,
    /// Authoritative states whose local counterpart was gone.
    pub history_missing: u64,
}

/// Client-side prediction for one body.
#[derive(Debug)]
pub struct ClientPredictedEntity {
    id: EntityId,
    body: BodyHandle,
    components: ComponentSet,
    local_inputs: TickIndexedBuffer<InputRecord>,
    local_states: TickIndexedBuffer<StateRecord>,
    server_states: TickIndexedBuffer<StateRecord>,
    config: ClientConfig,
    guard: OversimulationGuard,
    controlled_locally: bool,
    /// Newest authoritative tick already handed to the decider.
    last_checked: Option<Tick>,
    stats: ClientStats,
    events: EventSink,
}

impl ClientPredictedEntity {
    /// Creates an entity with histories of `config.history_size` ticks.
    #[must_use]
    pub fn new(
        id: EntityId,
        body: BodyHandle,
        components: Vec<Box<dyn PredictableComponent>>,
        config: &PredictionConfig,
        events: EventSink,
    ) -> Self {
        let capacity = config.history_size;
        Self {
            id,
            body,
            components: ComponentSet::new(components),
            local_inputs: TickIndexedBuffer::new(capacity),
            local_states: TickIndexedBuffer::new(capacity),
            server_states: TickIndexedBuffer::new(capacity),
            config: config.client.clone(),
            guard: OversimulationGuard::new(&config.client.oversimulation),
            controlled_locally: false,
            last_checked: None,
            stats: ClientStats::default(),
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

    /// True if this client produces the entity's input.
    #[must_use]
    pub fn is_controlled_locally(&self) -> bool {
        self.controlled_locally
    }

    /// Hands input production to (or takes it from) this client.
    pub fn set_controlled_locally(&mut self, controlled: bool) {
        self.controlled_locally = controlled;
    }

    /// True if any component produces input.
    #[must_use]
    pub fn is_controllable(&self) -> bool {
        self.components.is_controllable()
    }

    /// Input buffered for `tick`.
    #[must_use]
    pub fn local_input(&self, tick: Tick) -> Option<&InputRecord> {
        self.local_inputs.get(tick)
    }

    /// Predicted state recorded for `tick`.
    #[must_use]
    pub fn local_state(&self, tick: Tick) -> Option<&StateRecord> {
        self.local_states.get(tick)
    }

    /// Authoritative state received for `tick`.
    #[must_use]
    pub fn server_state(&self, tick: Tick) -> Option<&StateRecord> {
        self.server_states.get(tick)
    }

    /// Newest authoritative tick received.
    #[must_use]
    pub fn latest_server_tick(&self) -> Option<Tick> {
        self.server_states.end_tick()
    }

    /// Oversimulation guard.
    #[must_use]
    pub fn guard(&self) -> &OversimulationGuard {
        &self.guard
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    /// Predicts `tick` with locally sampled input.
    ///
    /// Records the state left by `tick - 1`, samples and buffers the input
    /// for `tick`, loads it and applies forces. The caller steps physics.
    pub fn client_simulation_tick(&mut self, tick: Tick, world: &mut dyn PhysicsWorld) {
        self.begin_tick(tick, world);
        let mut input = self.components.new_input();
        if self.components.is_controllable() && !self.components.sample_input(&mut input) {
            self.report_layout_mismatch(tick);
        }
        self.apply_input(tick, input, world);
    }

    /// Predicts `tick` for an entity another peer controls, replaying the
    /// input carried by the newest authoritative state.
    pub fn follower_simulation_tick(&mut self, tick: Tick, world: &mut dyn PhysicsWorld) {
        self.begin_tick(tick, world);
        let input = self
            .server_states
            .last()
            .and_then(|(_, record)| record.input.clone())
            .filter(|input| input.layout() == self.components.input_layout())
            .unwrap_or_else(|| self.components.new_input());
        self.apply_input(tick, input, world);
    }

    /// Records the state after the physics step for `tick`.
    pub fn sample_physics_state(&mut self, tick: Tick, world: &dyn PhysicsWorld) {
        self.record_state(tick, world);
    }

    /// Stores an authoritative state without evaluating it. Returns `false`
    /// if the tick is older than the history window.
    pub fn buffer_server_state(&mut self, record: StateRecord) -> bool {
        let tick = record.tick;
        self.server_states.add(tick, record)
    }

    /// Stores an authoritative state and acts on it immediately.
    ///
    /// `last_applied` is the newest tick simulated locally. The decision is
    /// carried out against `controller`, replaying through it if needed.
    pub fn buffer_server_tick(
        &mut self,
        last_applied: Tick,
        record: StateRecord,
        controller: &mut dyn PhysicsController,
        decider: &mut dyn ResimulationDecider,
    ) -> CheckOutcome {
        let tick = record.tick;
        if !self.buffer_server_state(record) {
            return CheckOutcome::Ignored;
        }
        if tick > last_applied {
            self.report_authority_ahead(tick, last_applied);
            return CheckOutcome::Deferred;
        }
        self.last_checked = Some(self.last_checked.map_or(tick, |checked| checked.max(tick)));

        match self.decide(tick, decider) {
            None => CheckOutcome::Ignored,
            Some(PredictionDecision::NoOp) => CheckOutcome::Accepted,
            Some(PredictionDecision::Snap) => self.snap_or_ignore(tick, controller.world_mut()),
            Some(PredictionDecision::Resimulate) => self.try_resimulate(tick, last_applied, controller),
        }
    }

    /// Evaluates the newest authoritative state not checked yet, if it is not
    /// ahead of `last_applied`. Acceptance is handled here; snaps and
    /// resimulations are returned for the caller to carry out.
    pub fn pending_decision(
        &mut self,
        last_applied: Tick,
        decider: &mut dyn ResimulationDecider,
    ) -> Option<(Tick, PredictionDecision)> {
        let newest = self.server_states.end_tick()?;
        if self.last_checked.is_some_and(|checked| checked >= newest) {
            return None;
        }
        if newest > last_applied {
            self.report_authority_ahead(newest, last_applied);
            return None;
        }
        self.last_checked = Some(newest);
        self.decide(newest, decider).map(|decision| (newest, decision))
    }

    /// Copies the authoritative state for `tick` onto the body as a
    /// correction. Returns `false` if no such state is buffered.
    pub fn snap_to_server(&mut self, tick: Tick, world: &mut dyn PhysicsWorld) -> bool {
        if !self.snap_to_server_if_exists(tick, world) {
            return false;
        }
        self.stats.snaps += 1;
        self.events.emit(PredictionEvent::Snapped { entity: self.id, tick });
        true
    }

    /// Copies the authoritative state for `tick` onto the body, if buffered,
    /// without reporting a correction.
    pub fn snap_to_server_if_exists(&mut self, tick: Tick, world: &mut dyn PhysicsWorld) -> bool {
        let Some(record) = self.server_states.get(tick) else {
            return false;
        };
        world.set_body_state(self.body, record.body_state());
        self.components.load_state(record);
        true
    }

    /// Reloads the buffered input for `tick` and applies its forces before a
    /// replayed step.
    pub fn pre_resimulation_step(&mut self, tick: Tick, world: &mut dyn PhysicsWorld) {
        let input = self
            .local_inputs
            .get(tick)
            .cloned()
            .unwrap_or_else(|| self.components.new_input());
        if !self.components.load_input(&input) {
            self.report_layout_mismatch(tick);
        }
        self.components.apply_forces(self.body, world);
    }

    /// Overwrites local history for `tick` after a replayed step.
    pub fn post_resimulation_step(&mut self, tick: Tick, world: &dyn PhysicsWorld) {
        self.record_state(tick, world);
    }

    /// Clears every history and the guard. Used when ownership changes.
    pub fn reset(&mut self) {
        self.local_inputs.clear();
        self.local_states.clear();
        self.server_states.clear();
        self.guard.reset();
        self.last_checked = None;
    }

    fn begin_tick(&mut self, tick: Tick, world: &dyn PhysicsWorld) {
        let previous = tick.prev();
        if previous > Tick::ZERO {
            self.record_state(previous, world);
        }
        self.guard.on_tick();
        self.stats.ticks += 1;
    }

    fn apply_input(&mut self, tick: Tick, input: InputRecord, world: &mut dyn PhysicsWorld) {
        if !self.components.load_input(&input) {
            self.report_layout_mismatch(tick);
        }
        self.local_inputs.add(tick, input);
        self.components.apply_forces(self.body, world);
    }

    fn record_state(&mut self, tick: Tick, world: &dyn PhysicsWorld) {
        let Some(body) = world.body_state(self.body) else {
            return;
        };
        let mut record = StateRecord::from_body(tick, body);
        record.input = self.local_inputs.get(tick).cloned();
        record.component_state = self.components.sample_state();
        self.local_states.add(tick, record);
    }

    /// Runs the decider on (local, authoritative) at `tick`, applying
    /// decision filters. `None` when local history is gone.
    fn decide(&mut self, tick: Tick, decider: &mut dyn ResimulationDecider) -> Option<PredictionDecision> {
        let Some(local) = self.local_states.get(tick) else {
            self.stats.history_missing += 1;
            self.events.emit(PredictionEvent::LocalHistoryMissing { entity: self.id, tick });
            return None;
        };
        let authoritative = self.server_states.get(tick)?;
        let decision = decider.check(self.id, local, authoritative);

        if decision == PredictionDecision::NoOp {
            self.stats.accepted += 1;
            self.events.emit(PredictionEvent::PredictionAccepted { entity: self.id, tick });
            return Some(decision);
        }
        let filtered = !self.controlled_locally
            && (self.config.ignore_non_local_decisions
                || (self.config.ignore_controllable_follower_decisions && self.is_controllable()));
        if filtered {
            tracing::trace!("{} ignoring {decision:?} at {tick} for follower", self.id);
            return None;
        }
        Some(decision)
    }

    fn snap_or_ignore(&mut self, tick: Tick, world: &mut dyn PhysicsWorld) -> CheckOutcome {
        if self.config.snap_enabled && self.snap_to_server(tick, world) {
            CheckOutcome::Snapped
        } else {
            CheckOutcome::Ignored
        }
    }

    /// Replay skipped for `reason`; snap instead when configured.
    fn skip(&mut self, tick: Tick, reason: SkipReason, world: &mut dyn PhysicsWorld) -> CheckOutcome {
        match reason {
            SkipReason::Budget => self.stats.skipped_budget += 1,
            SkipReason::InsufficientHistory => self.stats.skipped_history += 1,
            SkipReason::Disabled => {}
        }
        self.events.emit(PredictionEvent::ResimulationSkipped {
            entity: Some(self.id),
            tick,
            reason,
        });
        if self.config.snap_on_skip {
            self.snap_or_ignore(tick, world)
        } else {
            CheckOutcome::Ignored
        }
    }

    fn try_resimulate(
        &mut self,
        from: Tick,
        last_applied: Tick,
        controller: &mut dyn PhysicsController,
    ) -> CheckOutcome {
        if !self.config.resimulation_enabled {
            return self.skip(from, SkipReason::Disabled, controller.world_mut());
        }
        let steps = last_applied.since(from);
        if steps == 0 {
            // Nothing to replay past the authoritative tick.
            return self.snap_or_ignore(from, controller.world_mut());
        }
        if !self.guard.allows() {
            return self.skip(from, SkipReason::Budget, controller.world_mut());
        }
        if let Err(err) = controller.rewind(steps + 1) {
            tracing::debug!("{} cannot rewind to {from}: {err}", self.id);
            return self.skip(from, SkipReason::InsufficientHistory, controller.world_mut());
        }
        self.guard.commit(steps);
        self.resimulate(from, last_applied, controller);
        CheckOutcome::Resimulated { steps }
    }

    /// Replays `from+1..=to` on a controller already rewound to `from`.
    fn resimulate(&mut self, from: Tick, to: Tick, controller: &mut dyn PhysicsController) {
        let steps = to.since(from);
        self.events.emit(PredictionEvent::ResimulationStarted {
            entity: Some(self.id),
            from,
            to,
        });
        controller.before_resimulate();
        controller.before_resimulate_body(self.body);

        self.snap_to_server_if_exists(from, controller.world_mut());
        self.record_state(from, controller.world());

        let mut tick = from.next();
        while tick <= to {
            self.pre_resimulation_step(tick, controller.world_mut());
            controller.resimulate();
            self.post_resimulation_step(tick, controller.world());
            self.events.emit(PredictionEvent::ResimulationStep {
                entity: Some(self.id),
                tick,
            });
            tick = tick.next();
        }

        controller.after_resimulate_body(self.body);
        controller.after_resimulate();

        self.stats.resimulations += 1;
        self.stats.replayed_steps += u64::from(steps);
        self.events.emit(PredictionEvent::ResimulationFinished {
            entity: Some(self.id),
            from,
            steps,
        });
    }

    fn report_authority_ahead(&mut self, authority_tick: Tick, last_applied: Tick) {
        self.stats.authority_ahead += 1;
        self.events.emit(PredictionEvent::AuthorityAhead {
            entity: self.id,
            authority_tick,
            last_applied,
        });
    }

    fn report_layout_mismatch(&self, tick: Tick) {
        self.events.emit(PredictionEvent::InputLayoutMismatch { entity: self.id, tick });
    }
}
