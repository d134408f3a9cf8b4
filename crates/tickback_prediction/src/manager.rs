//! # Prediction Manager
//!
//! Orchestrates one side of a rollback session. Owns the physics controller,
//! the decider and every predicted entity, and runs one fixed tick per
//! [`PredictionManager::tick`] call.
//!
//! ```text
//!   CLIENT tick t                         SERVER tick t
//!   ─────────────                         ─────────────
//!   drain inbox                           drain inbox
//!   check pass (auth <= t-1)              per entity: drain input queue,
//!     snap / world replay                   apply forces
//!   per entity: sample input or           simulate
//!     follow, apply forces                per connection: stamp states with
//!   send input / heartbeat                  the client's tick, send
//!   simulate
//!   per entity: record state t
//! ```
//!
//! Network arrivals are queued in the [`Inbox`] and only applied at the start
//! of the next tick.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tickback_core::{BodyHandle, ConnectionId, EntityId, InputRecord, StateRecord, Tick, WorldStateRecord};

use crate::client::ClientPredictedEntity;
use crate::component::PredictableComponent;
use crate::config::PredictionConfig;
use crate::decider::{PredictionDecision, ResimulationDecider, ThresholdDecider};
use crate::error::{ConfigError, LinkError, PredictionError, Result};
use crate::events::{EventSink, PredictionEvent, SkipReason, TickTiming};
use crate::guard::OversimulationGuard;
use crate::link::{ClientLink, Inbound, Inbox, ServerLink};
use crate::physics::PhysicsController;
use crate::server::ServerPredictedEntity;

/// Which side of the session a manager runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Predicts locally and corrects against the authority.
    Client,
    /// Consumes client input and publishes authoritative state.
    Server,
}

/// Orchestrator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Ticks run.
    pub ticks: u64,
    /// World replays run.
    pub resimulations: u64,
    /// Ticks replayed over all replays.
    pub replayed_steps: u64,
    /// Replays refused by the oversimulation guard.
    pub skipped_budget: u64,
    /// Replays refused by the physics history.
    pub skipped_history: u64,
    /// Snaps applied.
    pub snaps: u64,
    /// Inputs handed to the client link.
    pub inputs_sent: u64,
    /// Heartbeats handed to the client link.
    pub heartbeats_sent: u64,
    /// Entity states handed to the server link.
    pub states_sent: u64,
    /// Outbound sends that failed.
    pub send_failures: u64,
    /// Authoritative states for unknown entities.
    pub unknown_entity_states: u64,
    /// Wall time of the last tick.
    pub last_tick_duration: Duration,
    /// Longest tick so far.
    pub max_tick_duration: Duration,
}

/// Collects collaborators and validates them against the role.
pub struct PredictionManagerBuilder {
    role: Role,
    config: PredictionConfig,
    controller: Option<Box<dyn PhysicsController>>,
    decider: Option<Box<dyn ResimulationDecider>>,
    client_link: Option<Box<dyn ClientLink>>,
    server_link: Option<Box<dyn ServerLink>>,
    events: EventSink,
    inbox: Inbox,
}

impl PredictionManagerBuilder {
    /// Starts a builder with default configuration.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            config: PredictionConfig::default(),
            controller: None,
            decider: None,
            client_link: None,
            server_link: None,
            events: EventSink::new(),
            inbox: Inbox::new(),
        }
    }

    /// Configuration.
    #[must_use]
    pub fn config(mut self, config: PredictionConfig) -> Self {
        self.config = config;
        self
    }

    /// Physics controller (required).
    #[must_use]
    pub fn controller(mut self, controller: Box<dyn PhysicsController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Divergence policy. Defaults to a [`ThresholdDecider`] over
    /// `config.decider`.
    #[must_use]
    pub fn decider(mut self, decider: Box<dyn ResimulationDecider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Outbound hooks (required for [`Role::Client`]).
    #[must_use]
    pub fn client_link(mut self, link: Box<dyn ClientLink>) -> Self {
        self.client_link = Some(link);
        self
    }

    /// Outbound hooks (required for [`Role::Server`]).
    #[must_use]
    pub fn server_link(mut self, link: Box<dyn ServerLink>) -> Self {
        self.server_link = Some(link);
        self
    }

    /// Diagnostics sink shared with the controller and decider.
    #[must_use]
    pub fn events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Inbox the transport delivers into.
    #[must_use]
    pub fn inbox(mut self, inbox: Inbox) -> Self {
        self.inbox = inbox;
        self
    }

    /// Validates and sets up the manager.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCollaborator`] if the controller or the
    /// link for the role is missing, or any validation error of the config.
    pub fn build(self) -> std::result::Result<PredictionManager, ConfigError> {
        let role = self.role;
        self.config.validate()?;
        let Some(mut controller) = self.controller else {
            return Err(ConfigError::MissingCollaborator {
                collaborator: "physics controller",
                role,
            });
        };
        match role {
            Role::Client if self.client_link.is_none() => {
                return Err(ConfigError::MissingCollaborator {
                    collaborator: "client link",
                    role,
                });
            }
            Role::Server if self.server_link.is_none() => {
                return Err(ConfigError::MissingCollaborator {
                    collaborator: "server link",
                    role,
                });
            }
            _ => {}
        }

        let events = self.events;
        let decider = self
            .decider
            .unwrap_or_else(|| Box::new(ThresholdDecider::new(self.config.decider.clone(), events.clone())));
        controller.setup(role == Role::Server);
        tracing::info!(
            "prediction manager ready: role={role:?}, tick_rate={}, history={}",
            self.config.tick_rate,
            self.config.history_size
        );

        Ok(PredictionManager {
            role,
            guard: OversimulationGuard::new(&self.config.client.oversimulation),
            config: self.config,
            controller,
            decider,
            client_link: self.client_link,
            server_link: self.server_link,
            clients: BTreeMap::new(),
            servers: BTreeMap::new(),
            owners: BTreeMap::new(),
            latest_conn_tick: BTreeMap::new(),
            last_sent_tick: BTreeMap::new(),
            local_entity: None,
            inbox: self.inbox,
            events,
            stats: ManagerStats::default(),
        })
    }
}

/// Rollback orchestrator for one role.
pub struct PredictionManager {
    role: Role,
    config: PredictionConfig,
    controller: Box<dyn PhysicsController>,
    decider: Box<dyn ResimulationDecider>,
    client_link: Option<Box<dyn ClientLink>>,
    server_link: Option<Box<dyn ServerLink>>,
    clients: BTreeMap<EntityId, ClientPredictedEntity>,
    servers: BTreeMap<EntityId, ServerPredictedEntity>,
    owners: BTreeMap<EntityId, ConnectionId>,
    latest_conn_tick: BTreeMap<ConnectionId, Tick>,
    last_sent_tick: BTreeMap<ConnectionId, Tick>,
    local_entity: Option<EntityId>,
    guard: OversimulationGuard,
    inbox: Inbox,
    events: EventSink,
    stats: ManagerStats,
}

impl std::fmt::Debug for PredictionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionManager")
            .field("role", &self.role)
            .field("tick", &self.controller.tick())
            .field("clients", &self.clients.len())
            .field("servers", &self.servers.len())
            .field("local_entity", &self.local_entity)
            .finish_non_exhaustive()
    }
}

impl PredictionManager {
    /// Starts a builder.
    #[must_use]
    pub fn builder(role: Role) -> PredictionManagerBuilder {
        PredictionManagerBuilder::new(role)
    }

    /// Role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Tick the next [`PredictionManager::tick`] call simulates.
    #[must_use]
    pub fn current_tick(&self) -> Tick {
        self.controller.tick()
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Diagnostics sink.
    #[must_use]
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Inbox for the transport.
    #[must_use]
    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    /// Physics controller.
    #[must_use]
    pub fn controller(&self) -> &dyn PhysicsController {
        &*self.controller
    }

    /// Physics controller, mutably.
    pub fn controller_mut(&mut self) -> &mut dyn PhysicsController {
        &mut *self.controller
    }

    /// Client-side entity.
    #[must_use]
    pub fn client_entity(&self, entity: EntityId) -> Option<&ClientPredictedEntity> {
        self.clients.get(&entity)
    }

    /// Authority-side entity.
    #[must_use]
    pub fn server_entity(&self, entity: EntityId) -> Option<&ServerPredictedEntity> {
        self.servers.get(&entity)
    }

    /// Number of registered entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.clients.len() + self.servers.len()
    }

    /// Entity this client controls.
    #[must_use]
    pub fn local_entity(&self) -> Option<EntityId> {
        self.local_entity
    }

    /// Connection owning `entity` on the authority.
    #[must_use]
    pub fn owner(&self, entity: EntityId) -> Option<ConnectionId> {
        self.owners.get(&entity).copied()
    }

    /// Newest tick reported by `connection`.
    #[must_use]
    pub fn latest_connection_tick(&self, connection: ConnectionId) -> Option<Tick> {
        self.latest_conn_tick.get(&connection).copied()
    }

    /// Registers an entity for the manager's role.
    ///
    /// # Errors
    ///
    /// Returns [`PredictionError::DuplicateEntity`] if `entity` is taken.
    pub fn add_entity(
        &mut self,
        entity: EntityId,
        body: BodyHandle,
        components: Vec<Box<dyn PredictableComponent>>,
    ) -> Result<()> {
        if self.clients.contains_key(&entity) || self.servers.contains_key(&entity) {
            return Err(PredictionError::DuplicateEntity(entity));
        }
        let events = self.events.clone();
        match self.role {
            Role::Client => {
                let predicted = ClientPredictedEntity::new(entity, body, components, &self.config, events);
                self.clients.insert(entity, predicted);
            }
            Role::Server => {
                let intake = ServerPredictedEntity::new(entity, body, components, &self.config, events);
                self.servers.insert(entity, intake);
            }
        }
        if self.config.auto_track_bodies {
            self.controller.track(body);
        }
        self.events.emit(PredictionEvent::EntityAdded { entity });
        Ok(())
    }

    /// Unregisters an entity.
    ///
    /// # Errors
    ///
    /// Returns [`PredictionError::UnknownEntity`] if it is not registered.
    pub fn remove_entity(&mut self, entity: EntityId) -> Result<()> {
        let body = match (self.clients.remove(&entity), self.servers.remove(&entity)) {
            (Some(predicted), _) => predicted.body(),
            (None, Some(intake)) => intake.body(),
            (None, None) => return Err(PredictionError::UnknownEntity(entity)),
        };
        if self.config.auto_track_bodies {
            self.controller.untrack(body);
        }
        self.owners.remove(&entity);
        if self.local_entity == Some(entity) {
            self.local_entity = None;
            self.events.emit(PredictionEvent::LocalEntityChanged { entity: None });
        }
        self.events.emit(PredictionEvent::EntityRemoved { entity });
        Ok(())
    }

    /// Gives `connection` control of `entity` (authority).
    ///
    /// The intake is reset and the previous owner, if any, is notified.
    ///
    /// # Errors
    ///
    /// [`PredictionError::WrongRole`] on a client, or
    /// [`PredictionError::UnknownEntity`].
    pub fn set_entity_owner(&mut self, entity: EntityId, connection: ConnectionId) -> Result<()> {
        self.require(Role::Server, "set_entity_owner")?;
        let intake = self
            .servers
            .get_mut(&entity)
            .ok_or(PredictionError::UnknownEntity(entity))?;
        intake.reset();
        let tick = self.controller.tick();
        if let Some(previous) = self.owners.insert(entity, connection) {
            if previous != connection {
                self.notify_owner(previous, entity, false, tick);
            }
        }
        self.notify_owner(connection, entity, true, tick);
        self.events.emit(PredictionEvent::OwnerSet { entity, connection });
        Ok(())
    }

    /// Takes control of `entity` away from its owner (authority).
    ///
    /// # Errors
    ///
    /// [`PredictionError::WrongRole`] on a client, or
    /// [`PredictionError::UnknownEntity`].
    pub fn unset_owner(&mut self, entity: EntityId) -> Result<()> {
        self.require(Role::Server, "unset_owner")?;
        let intake = self
            .servers
            .get_mut(&entity)
            .ok_or(PredictionError::UnknownEntity(entity))?;
        let Some(connection) = self.owners.remove(&entity) else {
            return Ok(());
        };
        intake.reset();
        let tick = self.controller.tick();
        self.notify_owner(connection, entity, false, tick);
        self.events.emit(PredictionEvent::OwnerUnset { entity, connection });
        Ok(())
    }

    /// Applies an ownership notification (client).
    ///
    /// # Errors
    ///
    /// [`PredictionError::WrongRole`] on the authority, or
    /// [`PredictionError::UnknownEntity`].
    pub fn on_entity_ownership_changed(&mut self, entity: EntityId, controlled: bool) -> Result<()> {
        self.require(Role::Client, "on_entity_ownership_changed")?;
        if !self.clients.contains_key(&entity) {
            return Err(PredictionError::UnknownEntity(entity));
        }
        if controlled {
            if let Some(previous) = self.local_entity.filter(|previous| *previous != entity) {
                if let Some(predicted) = self.clients.get_mut(&previous) {
                    predicted.set_controlled_locally(false);
                }
            }
            if let Some(predicted) = self.clients.get_mut(&entity) {
                predicted.reset();
                predicted.set_controlled_locally(true);
            }
            self.local_entity = Some(entity);
        } else if self.local_entity == Some(entity) {
            if let Some(predicted) = self.clients.get_mut(&entity) {
                predicted.set_controlled_locally(false);
            }
            self.local_entity = None;
        } else {
            return Ok(());
        }
        tracing::info!("local entity is now {:?}", self.local_entity);
        self.events.emit(PredictionEvent::LocalEntityChanged {
            entity: self.local_entity,
        });
        Ok(())
    }

    /// Buffers an authoritative state (client).
    ///
    /// # Errors
    ///
    /// [`PredictionError::WrongRole`] on the authority, or
    /// [`PredictionError::UnknownEntity`].
    pub fn on_server_state(&mut self, entity: EntityId, state: StateRecord) -> Result<()> {
        self.require(Role::Client, "on_server_state")?;
        let Some(predicted) = self.clients.get_mut(&entity) else {
            self.stats.unknown_entity_states += 1;
            self.events.emit(PredictionEvent::UnknownEntityState {
                entity,
                tick: state.tick,
            });
            return Err(PredictionError::UnknownEntity(entity));
        };
        if !predicted.buffer_server_state(state) {
            tracing::trace!("{entity} authoritative state older than history");
        }
        Ok(())
    }

    /// Buffers a batched authoritative state (client). Unknown entities are
    /// reported and skipped.
    ///
    /// # Errors
    ///
    /// [`PredictionError::WrongRole`] on the authority.
    pub fn on_world_state(&mut self, state: WorldStateRecord) -> Result<()> {
        self.require(Role::Client, "on_world_state")?;
        for (entity, record) in state.entities {
            match self.on_server_state(entity, record) {
                Ok(()) | Err(PredictionError::UnknownEntity(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Queues a client input (authority). Input from a connection that does
    /// not own the entity is dropped.
    ///
    /// # Errors
    ///
    /// [`PredictionError::WrongRole`] on a client, or
    /// [`PredictionError::UnknownEntity`].
    pub fn on_client_input(
        &mut self,
        connection: ConnectionId,
        entity: EntityId,
        tick: Tick,
        input: InputRecord,
    ) -> Result<()> {
        self.require(Role::Server, "on_client_input")?;
        self.note_connection_tick(connection, tick);
        let intake = self
            .servers
            .get_mut(&entity)
            .ok_or(PredictionError::UnknownEntity(entity))?;
        if self.owners.get(&entity) == Some(&connection) {
            intake.buffer_client_tick(tick, input);
        } else {
            tracing::debug!("dropping input for {entity} from non-owner {connection}");
        }
        Ok(())
    }

    /// Records a client's tick (authority).
    ///
    /// # Errors
    ///
    /// [`PredictionError::WrongRole`] on a client.
    pub fn on_heartbeat(&mut self, connection: ConnectionId, tick: Tick) -> Result<()> {
        self.require(Role::Server, "on_heartbeat")?;
        self.note_connection_tick(connection, tick);
        Ok(())
    }

    /// Runs one fixed tick. Returns the tick simulated.
    pub fn tick(&mut self) -> Tick {
        let started = Instant::now();
        self.process_inbox();

        let tick = self.controller.tick();
        let resimulated = match self.role {
            Role::Client => self.client_tick(tick),
            Role::Server => {
                self.server_tick(tick);
                false
            }
        };

        let duration = started.elapsed();
        self.stats.ticks += 1;
        self.stats.last_tick_duration = duration;
        self.stats.max_tick_duration = self.stats.max_tick_duration.max(duration);
        self.events.emit(PredictionEvent::TickCompleted(TickTiming {
            tick,
            resimulated,
            duration,
        }));
        tick
    }

    fn require(&self, role: Role, operation: &'static str) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(PredictionError::WrongRole {
                operation,
                role: self.role,
            })
        }
    }

    fn process_inbox(&mut self) {
        for message in self.inbox.drain() {
            if let Err(err) = self.dispatch(message) {
                tracing::debug!("dropped inbound message: {err}");
            }
        }
    }

    fn dispatch(&mut self, message: Inbound) -> Result<()> {
        match message {
            Inbound::ServerState { entity, state } => self.on_server_state(entity, state),
            Inbound::WorldState(state) => self.on_world_state(state),
            Inbound::ClientInput {
                connection,
                entity,
                tick,
                input,
            } => self.on_client_input(connection, entity, tick, input),
            Inbound::Heartbeat { connection, tick } => self.on_heartbeat(connection, tick),
            Inbound::OwnershipChanged { entity, controlled } => self.on_entity_ownership_changed(entity, controlled),
        }
    }

    fn note_connection_tick(&mut self, connection: ConnectionId, tick: Tick) {
        let latest = self.latest_conn_tick.entry(connection).or_insert(tick);
        *latest = (*latest).max(tick);
    }

    fn client_tick(&mut self, tick: Tick) -> bool {
        let resimulated = self.check_predictions(tick);
        self.guard.on_tick();

        for predicted in self.clients.values_mut() {
            let world = self.controller.world_mut();
            if predicted.is_controlled_locally() {
                predicted.client_simulation_tick(tick, world);
            } else {
                predicted.follower_simulation_tick(tick, world);
            }
        }
        self.send_client_traffic(tick);

        self.controller.simulate();
        for predicted in self.clients.values_mut() {
            predicted.sample_physics_state(tick, self.controller.world());
        }
        resimulated
    }

    /// Evaluates newly arrived authoritative states against `tick - 1` and
    /// replays the world from the earliest divergence.
    fn check_predictions(&mut self, tick: Tick) -> bool {
        let last_applied = tick.prev();
        if last_applied == Tick::ZERO {
            return false;
        }
        let snap_enabled = self.config.client.snap_enabled;
        let mut earliest: Option<(Tick, EntityId)> = None;
        for predicted in self.clients.values_mut() {
            match predicted.pending_decision(last_applied, &mut *self.decider) {
                Some((at, PredictionDecision::Resimulate)) => {
                    if !earliest.is_some_and(|(from, _)| from <= at) {
                        earliest = Some((at, predicted.id()));
                    }
                }
                Some((at, PredictionDecision::Snap)) => {
                    if snap_enabled && predicted.snap_to_server(at, self.controller.world_mut()) {
                        self.stats.snaps += 1;
                    }
                }
                Some((_, PredictionDecision::NoOp)) | None => {}
            }
        }
        match earliest {
            Some((from, trigger)) => self.resimulate_world(from, trigger, last_applied),
            None => false,
        }
    }

    fn resimulate_world(&mut self, from: Tick, trigger: EntityId, last_applied: Tick) -> bool {
        if !self.config.client.resimulation_enabled {
            self.skip_resimulation(from, trigger, SkipReason::Disabled);
            return false;
        }
        let steps = last_applied.since(from);
        if steps == 0 {
            self.snap_entity(from, trigger);
            return false;
        }
        if !self.guard.allows() {
            self.stats.skipped_budget += 1;
            self.skip_resimulation(from, trigger, SkipReason::Budget);
            return false;
        }
        if let Err(err) = self.controller.rewind(steps + 1) {
            tracing::debug!("world replay from {from} refused: {err}");
            self.stats.skipped_history += 1;
            self.skip_resimulation(from, trigger, SkipReason::InsufficientHistory);
            return false;
        }
        self.guard.commit(steps);

        self.events.emit(PredictionEvent::ResimulationStarted {
            entity: None,
            from,
            to: last_applied,
        });
        self.controller.before_resimulate();
        for predicted in self.clients.values_mut() {
            self.controller.before_resimulate_body(predicted.body());
            predicted.snap_to_server_if_exists(from, self.controller.world_mut());
            predicted.post_resimulation_step(from, self.controller.world());
        }

        let use_available = self.config.client.use_available_server_ticks;
        let mut at = from.next();
        while at <= last_applied {
            for predicted in self.clients.values_mut() {
                predicted.pre_resimulation_step(at, self.controller.world_mut());
            }
            self.controller.resimulate();
            for predicted in self.clients.values_mut() {
                if use_available {
                    predicted.snap_to_server_if_exists(at, self.controller.world_mut());
                }
                predicted.post_resimulation_step(at, self.controller.world());
            }
            self.events.emit(PredictionEvent::ResimulationStep { entity: None, tick: at });
            at = at.next();
        }

        for predicted in self.clients.values() {
            self.controller.after_resimulate_body(predicted.body());
        }
        self.controller.after_resimulate();

        self.stats.resimulations += 1;
        self.stats.replayed_steps += u64::from(steps);
        self.events.emit(PredictionEvent::ResimulationFinished {
            entity: None,
            from,
            steps,
        });
        true
    }

    fn skip_resimulation(&mut self, from: Tick, trigger: EntityId, reason: SkipReason) {
        self.events.emit(PredictionEvent::ResimulationSkipped {
            entity: Some(trigger),
            tick: from,
            reason,
        });
        if self.config.client.snap_on_skip {
            self.snap_entity(from, trigger);
        }
    }

    fn snap_entity(&mut self, at: Tick, entity: EntityId) {
        if !self.config.client.snap_enabled {
            return;
        }
        if let Some(predicted) = self.clients.get_mut(&entity) {
            if predicted.snap_to_server(at, self.controller.world_mut()) {
                self.stats.snaps += 1;
            }
        }
    }

    fn send_client_traffic(&mut self, tick: Tick) {
        let Some(link) = self.client_link.as_mut() else {
            return;
        };
        let local_input = self
            .local_entity
            .and_then(|entity| self.clients.get(&entity))
            .and_then(|predicted| predicted.local_input(tick).map(|input| (predicted.id(), input)));

        let failure = match local_input {
            Some((entity, input)) => {
                self.stats.inputs_sent += 1;
                link.send_input(entity, tick, input).err().map(|err| (Some(entity), err))
            }
            None => {
                self.stats.heartbeats_sent += 1;
                link.send_heartbeat(tick).err().map(|err| (None, err))
            }
        };
        if let Some((entity, error)) = failure {
            self.report_send_failure(None, entity, tick, &error);
        }
    }

    fn server_tick(&mut self, tick: Tick) {
        for intake in self.servers.values_mut() {
            intake.server_simulation_tick(self.controller.world_mut());
        }
        self.controller.simulate();
        self.broadcast_states(tick);
    }

    /// Tick to stamp states for `connection` with: the applied tick of the
    /// entity it owns, else the newest tick it reported.
    fn connection_tick(&self, connection: ConnectionId) -> Option<Tick> {
        let owned = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == connection)
            .filter_map(|(entity, _)| self.servers.get(entity))
            .map(ServerPredictedEntity::tick)
            .max()
            .filter(|tick| *tick > Tick::ZERO);
        owned.or_else(|| self.latest_conn_tick.get(&connection).copied())
    }

    fn broadcast_states(&mut self, tick: Tick) {
        let Some(connections) = self.server_link.as_ref().map(|link| link.connections()) else {
            return;
        };
        let targets: Vec<(ConnectionId, Tick)> = connections
            .into_iter()
            .filter_map(|connection| self.connection_tick(connection).map(|stamp| (connection, stamp)))
            .filter(|(connection, stamp)| self.last_sent_tick.get(connection) != Some(stamp))
            .collect();
        let Some(link) = self.server_link.as_mut() else {
            return;
        };

        let batching = self.config.world_state_batching;
        let mut failures: Vec<(ConnectionId, Option<EntityId>, LinkError)> = Vec::new();
        for (connection, stamp) in targets {
            self.last_sent_tick.insert(connection, stamp);
            let mut batch = WorldStateRecord::new(stamp);
            for (entity, intake) in &self.servers {
                let owned = self.owners.get(entity) == Some(&connection);
                let entity_tick = if owned { intake.tick() } else { stamp };
                if entity_tick == Tick::ZERO {
                    continue;
                }
                let Some(mut record) = intake.sample_physics_state(self.controller.world()) else {
                    continue;
                };
                record.tick = entity_tick;
                if batching {
                    batch.push(*entity, record);
                } else {
                    match link.send_state(connection, *entity, &record) {
                        Ok(()) => self.stats.states_sent += 1,
                        Err(err) => failures.push((connection, Some(*entity), err)),
                    }
                }
            }
            if batching && !batch.entities.is_empty() {
                let count = batch.entities.len() as u64;
                match link.send_world_state(connection, &batch) {
                    Ok(()) => self.stats.states_sent += count,
                    Err(err) => failures.push((connection, None, err)),
                }
            }
        }
        for (connection, entity, error) in failures {
            self.report_send_failure(Some(connection), entity, tick, &error);
        }
    }

    fn notify_owner(&mut self, connection: ConnectionId, entity: EntityId, controlled: bool, tick: Tick) {
        let Some(link) = self.server_link.as_mut() else {
            return;
        };
        if let Err(err) = link.set_controlled_locally(connection, entity, controlled) {
            self.report_send_failure(Some(connection), Some(entity), tick, &err);
        }
    }

    fn report_send_failure(
        &mut self,
        connection: Option<ConnectionId>,
        entity: Option<EntityId>,
        tick: Tick,
        error: &LinkError,
    ) {
        self.stats.send_failures += 1;
        self.events.emit(PredictionEvent::SendFailed {
            connection,
            entity,
            tick,
            error: error.to_string(),
        });
    }
}
