//! Orchestrator tests: one authority and its clients joined by simulated
//! links, driven one tick at a time.

use tickback_prediction::events::drain;
use tickback_prediction::simulation::{NetworkConditions, OffsetCommand, OffsetMover, PointMassWorld, SimulatedNetwork};
use tickback_prediction::{
    BodyHandle, BodyState, ConfigError, ConnectionId, EntityId, EventSink, Inbox, PhysicsController, PhysicsWorld,
    PredictionConfig, PredictionError, PredictionEvent, PredictionManager, RewindablePhysicsController, Role,
    SkipReason, StateRecord, Tick, Vec3, WorldStateRecord,
};

const HERO: EntityId = EntityId(1);
const CRATE: EntityId = EntityId(2);

const PATTERN: [Vec3; 6] = [
    Vec3::new(1.0, 0.0, 0.0),
    Vec3::new(1.0, 0.0, 0.0),
    Vec3::new(0.0, 0.5, 0.0),
    Vec3::new(-1.0, 0.0, 0.0),
    Vec3::ZERO,
    Vec3::new(0.0, -0.5, 0.0),
];

struct Peer {
    manager: PredictionManager,
    command: OffsetCommand,
    bodies: Vec<BodyHandle>,
    events: EventSink,
}

impl Peer {
    fn position(&self, index: usize) -> Vec3 {
        self.manager
            .controller()
            .world()
            .body_state(self.bodies[index])
            .map_or(Vec3::ZERO, |s| s.position)
    }
}

/// World with one body per entity, spawned in id order on every peer.
fn world(entities: &[EntityId]) -> (PointMassWorld, Vec<BodyHandle>) {
    let mut world = PointMassWorld::new();
    let bodies = entities.iter().map(|_| world.spawn(BodyState::at(Vec3::ZERO))).collect();
    (world, bodies)
}

fn server(network: &SimulatedNetwork, inbox: Inbox, config: &PredictionConfig, entities: &[EntityId]) -> Peer {
    let (world, bodies) = world(entities);
    let events = EventSink::new();
    let mut manager = PredictionManager::builder(Role::Server)
        .config(config.clone())
        .controller(Box::new(RewindablePhysicsController::from_config(world, config, events.clone())))
        .server_link(Box::new(network.server_link()))
        .inbox(inbox)
        .events(events.clone())
        .build()
        .expect("server manager");
    let command = OffsetCommand::new();
    for (entity, body) in entities.iter().zip(&bodies) {
        manager
            .add_entity(*entity, *body, vec![Box::new(OffsetMover::new(command.clone()))])
            .expect("new entity");
    }
    Peer {
        manager,
        command,
        bodies,
        events,
    }
}

fn client(
    network: &mut SimulatedNetwork,
    connection: ConnectionId,
    conditions: NetworkConditions,
    config: &PredictionConfig,
    entities: &[EntityId],
) -> Peer {
    let inbox = Inbox::new();
    let link = network.connect(connection, inbox.clone(), conditions);
    let (world, bodies) = world(entities);
    let events = EventSink::new();
    let mut manager = PredictionManager::builder(Role::Client)
        .config(config.clone())
        .controller(Box::new(RewindablePhysicsController::from_config(world, config, events.clone())))
        .client_link(Box::new(link))
        .inbox(inbox)
        .events(events.clone())
        .build()
        .expect("client manager");
    let command = OffsetCommand::new();
    for (entity, body) in entities.iter().zip(&bodies) {
        manager
            .add_entity(*entity, *body, vec![Box::new(OffsetMover::new(command.clone()))])
            .expect("new entity");
    }
    Peer {
        manager,
        command,
        bodies,
        events,
    }
}

/// Client fed authoritative states by hand, with `world_history` ticks of
/// physics history. Every entity is a follower.
fn offline_client(config: &PredictionConfig, world_history: usize, entities: &[EntityId]) -> Peer {
    let mut network = SimulatedNetwork::new(Inbox::new(), 21);
    let inbox = Inbox::new();
    let link = network.connect(ConnectionId(1), inbox.clone(), NetworkConditions::PERFECT);
    let (world, bodies) = world(entities);
    let events = EventSink::new();
    let controller =
        RewindablePhysicsController::new(world, world_history, config.fixed_delta_time(), events.clone());
    let mut manager = PredictionManager::builder(Role::Client)
        .config(config.clone())
        .controller(Box::new(controller))
        .client_link(Box::new(link))
        .inbox(inbox)
        .events(events.clone())
        .build()
        .expect("client manager");
    let command = OffsetCommand::new();
    for (entity, body) in entities.iter().zip(&bodies) {
        manager
            .add_entity(*entity, *body, vec![Box::new(OffsetMover::new(command.clone()))])
            .expect("new entity");
    }
    Peer {
        manager,
        command,
        bodies,
        events,
    }
}

fn far(tick: u32, position: Vec3) -> StateRecord {
    StateRecord::from_body(Tick(tick), BodyState::at(position))
}

fn run(ticks: usize, network: &SimulatedNetwork, server: &mut Peer, clients: &mut [&mut Peer]) {
    for i in 0..ticks {
        for peer in clients.iter_mut() {
            peer.command.set(PATTERN[i % PATTERN.len()]);
            peer.manager.tick();
        }
        server.manager.tick();
        network.advance();
    }
}

#[test]
fn test_builder_requires_collaborators() {
    let config = PredictionConfig::default();
    let no_controller = PredictionManager::builder(Role::Server).config(config.clone()).build();
    assert!(matches!(
        no_controller,
        Err(ConfigError::MissingCollaborator {
            collaborator: "physics controller",
            role: Role::Server
        })
    ));

    let controller = RewindablePhysicsController::from_config(PointMassWorld::new(), &config, EventSink::new());
    let no_link = PredictionManager::builder(Role::Client)
        .controller(Box::new(controller))
        .build();
    assert!(matches!(
        no_link,
        Err(ConfigError::MissingCollaborator {
            collaborator: "client link",
            role: Role::Client
        })
    ));

    let invalid = PredictionConfig {
        tick_rate: 0,
        ..PredictionConfig::default()
    };
    let controller = RewindablePhysicsController::from_config(PointMassWorld::new(), &config, EventSink::new());
    let network = SimulatedNetwork::new(Inbox::new(), 1);
    let result = PredictionManager::builder(Role::Server)
        .config(invalid)
        .controller(Box::new(controller))
        .server_link(Box::new(network.server_link()))
        .build();
    assert!(matches!(result, Err(ConfigError::InvalidValue { field: "tick_rate", .. })));
}

#[test]
fn test_role_specific_operations_are_rejected() {
    let config = PredictionConfig::default();
    let server_inbox = Inbox::new();
    let mut network = SimulatedNetwork::new(server_inbox.clone(), 3);
    let mut server = server(&network, server_inbox, &config, &[HERO]);
    let mut client = client(&mut network, ConnectionId(1), NetworkConditions::PERFECT, &config, &[HERO]);

    let state = StateRecord::from_body(Tick(1), BodyState::default());
    assert_eq!(
        server.manager.on_server_state(HERO, state),
        Err(PredictionError::WrongRole {
            operation: "on_server_state",
            role: Role::Server
        })
    );
    assert_eq!(
        client.manager.set_entity_owner(HERO, ConnectionId(1)),
        Err(PredictionError::WrongRole {
            operation: "set_entity_owner",
            role: Role::Client
        })
    );
    assert_eq!(
        server.manager.add_entity(HERO, server.bodies[0], Vec::new()),
        Err(PredictionError::DuplicateEntity(HERO))
    );
    assert_eq!(
        server.manager.set_entity_owner(CRATE, ConnectionId(1)),
        Err(PredictionError::UnknownEntity(CRATE))
    );
}

#[test]
fn test_prediction_matches_authority_over_clean_link() {
    let config = PredictionConfig::default();
    let server_inbox = Inbox::new();
    let mut network = SimulatedNetwork::new(server_inbox.clone(), 11);
    let mut server = server(&network, server_inbox, &config, &[HERO]);
    let mut player = client(&mut network, ConnectionId(1), NetworkConditions::GOOD, &config, &[HERO]);
    server.manager.set_entity_owner(HERO, ConnectionId(1)).expect("hero exists");

    run(120, &network, &mut server, &mut [&mut player]);

    assert_eq!(player.manager.local_entity(), Some(HERO));
    let stats = player.manager.stats();
    assert_eq!(stats.resimulations, 0);
    assert_eq!(stats.snaps, 0);
    assert_eq!(stats.send_failures, 0);

    let predicted = player.manager.client_entity(HERO).expect("hero on client");
    assert!(predicted.stats().accepted > 90);
    assert_eq!(predicted.stats().resimulations, 0);

    let intake = server.manager.server_entity(HERO).expect("hero on server");
    assert_eq!(intake.stats().invalid_inputs, 0);
    assert_eq!(intake.stats().late_inputs, 0);
    let applied = intake.tick();
    assert!(applied > Tick(100));
    let local = predicted.local_state(applied).expect("applied tick still in history");
    assert_eq!(local.position, server.position(0));
}

#[test]
fn test_local_divergence_is_corrected_once() {
    let config = PredictionConfig::default();
    let server_inbox = Inbox::new();
    let mut network = SimulatedNetwork::new(server_inbox.clone(), 5);
    let mut server = server(&network, server_inbox, &config, &[HERO]);
    let mut player = client(&mut network, ConnectionId(1), NetworkConditions::GOOD, &config, &[HERO]);
    server.manager.set_entity_owner(HERO, ConnectionId(1)).expect("hero exists");
    let rx = player.events.subscribe();

    run(30, &network, &mut server, &mut [&mut player]);
    assert_eq!(player.manager.stats().resimulations, 0);

    // Knock the predicted body off course
    let body = player.bodies[0];
    let world = player.manager.controller_mut().world_mut();
    let mut state = world.body_state(body).expect("hero body");
    state.position.z += 3.0;
    world.set_body_state(body, state);

    run(40, &network, &mut server, &mut [&mut player]);

    let stats = player.manager.stats();
    assert_eq!(stats.resimulations, 1);
    assert!(stats.replayed_steps > 0);
    let world_replays = drain(&rx)
        .into_iter()
        .filter(|e| matches!(e, PredictionEvent::ResimulationFinished { entity: None, .. }))
        .count();
    assert_eq!(world_replays, 1);

    let applied = server.manager.server_entity(HERO).expect("hero").tick();
    let predicted = player.manager.client_entity(HERO).expect("hero");
    assert_eq!(
        predicted.local_state(applied).map(|s| s.position),
        Some(server.position(0))
    );
}

#[test]
fn test_ownership_hand_over() {
    let config = PredictionConfig::default();
    let server_inbox = Inbox::new();
    let mut network = SimulatedNetwork::new(server_inbox.clone(), 21);
    let mut server = server(&network, server_inbox, &config, &[HERO]);
    let mut first = client(&mut network, ConnectionId(1), NetworkConditions::GOOD, &config, &[HERO]);
    let mut second = client(&mut network, ConnectionId(2), NetworkConditions::GOOD, &config, &[HERO]);
    let server_rx = server.events.subscribe();

    server.manager.set_entity_owner(HERO, ConnectionId(1)).expect("hero exists");
    run(20, &network, &mut server, &mut [&mut first, &mut second]);
    assert_eq!(first.manager.local_entity(), Some(HERO));
    assert_eq!(second.manager.local_entity(), None);

    server.manager.set_entity_owner(HERO, ConnectionId(2)).expect("hero exists");
    assert_eq!(server.manager.owner(HERO), Some(ConnectionId(2)));
    // Intake restarts for the new owner
    assert!(server.manager.server_entity(HERO).expect("hero").is_buffering());

    run(20, &network, &mut server, &mut [&mut first, &mut second]);
    assert_eq!(first.manager.local_entity(), None);
    assert_eq!(second.manager.local_entity(), Some(HERO));
    assert!(second.manager.client_entity(HERO).expect("hero").is_controlled_locally());
    assert!(!first.manager.client_entity(HERO).expect("hero").is_controlled_locally());

    let owners: Vec<ConnectionId> = drain(&server_rx)
        .into_iter()
        .filter_map(|e| match e {
            PredictionEvent::OwnerSet { connection, .. } => Some(connection),
            _ => None,
        })
        .collect();
    assert_eq!(owners, vec![ConnectionId(1), ConnectionId(2)]);

    server.manager.unset_owner(HERO).expect("hero exists");
    assert_eq!(server.manager.owner(HERO), None);
}

#[test]
fn test_spectator_states_are_stamped_with_its_own_tick() {
    let config = PredictionConfig::default();
    let server_inbox = Inbox::new();
    let mut network = SimulatedNetwork::new(server_inbox.clone(), 8);
    let mut server = server(&network, server_inbox, &config, &[HERO]);
    let mut player = client(&mut network, ConnectionId(1), NetworkConditions::GOOD, &config, &[HERO]);
    let mut spectator = client(&mut network, ConnectionId(2), NetworkConditions::GOOD, &config, &[HERO]);
    server.manager.set_entity_owner(HERO, ConnectionId(1)).expect("hero exists");

    run(40, &network, &mut server, &mut [&mut player, &mut spectator]);

    assert_eq!(spectator.manager.local_entity(), None);
    assert!(spectator.manager.stats().heartbeats_sent >= 40);
    let reported = server
        .manager
        .latest_connection_tick(ConnectionId(2))
        .expect("spectator heartbeats arrived");
    assert!(reported > Tick(30));

    let follower = spectator.manager.client_entity(HERO).expect("hero on spectator");
    let newest = follower.latest_server_tick().expect("states arrived");
    assert!(newest < spectator.manager.current_tick());
    assert!(newest <= reported);
}

#[test]
fn test_disconnected_client_reports_send_failures() {
    let config = PredictionConfig::default();
    let server_inbox = Inbox::new();
    let mut network = SimulatedNetwork::new(server_inbox.clone(), 2);
    let mut server = server(&network, server_inbox, &config, &[HERO]);
    let mut player = client(&mut network, ConnectionId(1), NetworkConditions::GOOD, &config, &[HERO]);
    let rx = player.events.subscribe();

    run(5, &network, &mut server, &mut [&mut player]);
    network.disconnect(ConnectionId(1));
    run(3, &network, &mut server, &mut [&mut player]);

    assert_eq!(player.manager.stats().send_failures, 3);
    let failures = drain(&rx)
        .into_iter()
        .filter(|e| matches!(e, PredictionEvent::SendFailed { connection: None, .. }))
        .count();
    assert_eq!(failures, 3);
    // The authority no longer addresses the closed connection
    assert_eq!(server.manager.stats().send_failures, 0);
}

#[test]
fn test_world_state_batching_delivers_every_entity() {
    let config = PredictionConfig {
        world_state_batching: true,
        ..PredictionConfig::default()
    };
    let server_inbox = Inbox::new();
    let mut network = SimulatedNetwork::new(server_inbox.clone(), 4);
    let mut server = server(&network, server_inbox, &config, &[HERO, CRATE]);
    let mut player = client(&mut network, ConnectionId(1), NetworkConditions::GOOD, &config, &[HERO, CRATE]);
    server.manager.set_entity_owner(HERO, ConnectionId(1)).expect("hero exists");

    run(30, &network, &mut server, &mut [&mut player]);

    for entity in [HERO, CRATE] {
        let predicted = player.manager.client_entity(entity).expect("entity on client");
        assert!(predicted.latest_server_tick().is_some(), "{entity}");
    }
    assert!(server.manager.stats().states_sent >= 2);
}

#[test]
fn test_unknown_entity_state_is_reported() {
    let config = PredictionConfig::default();
    let mut network = SimulatedNetwork::new(Inbox::new(), 6);
    let mut player = client(&mut network, ConnectionId(1), NetworkConditions::PERFECT, &config, &[HERO]);
    let rx = player.events.subscribe();

    let state = StateRecord::from_body(Tick(3), BodyState::default());
    assert_eq!(
        player.manager.on_server_state(EntityId(99), state.clone()),
        Err(PredictionError::UnknownEntity(EntityId(99)))
    );

    // Batched states skip unknown entities without failing
    let mut batch = WorldStateRecord::new(Tick(3));
    batch.push(EntityId(99), state.clone());
    batch.push(HERO, state);
    assert_eq!(player.manager.on_world_state(batch), Ok(()));

    assert_eq!(player.manager.stats().unknown_entity_states, 2);
    assert_eq!(
        player.manager.client_entity(HERO).and_then(|p| p.latest_server_tick()),
        Some(Tick(3))
    );
    let unknown = drain(&rx)
        .into_iter()
        .filter(|e| matches!(e, PredictionEvent::UnknownEntityState { .. }))
        .count();
    assert_eq!(unknown, 2);
}

#[test]
fn test_remove_entity_untracks_its_body() {
    let config = PredictionConfig::default();
    let mut network = SimulatedNetwork::new(Inbox::new(), 7);
    let mut player = client(&mut network, ConnectionId(1), NetworkConditions::PERFECT, &config, &[HERO, CRATE]);
    player.manager.on_entity_ownership_changed(CRATE, true).expect("crate exists");
    assert_eq!(player.manager.local_entity(), Some(CRATE));

    let body = player.bodies[1];
    assert!(player.manager.controller().is_tracked(body));
    player.manager.remove_entity(CRATE).expect("crate exists");
    assert!(!player.manager.controller().is_tracked(body));
    assert_eq!(player.manager.local_entity(), None);
    assert_eq!(player.manager.entity_count(), 1);
    assert_eq!(
        player.manager.remove_entity(CRATE),
        Err(PredictionError::UnknownEntity(CRATE))
    );
}

#[test]
fn test_world_replay_beyond_history_snaps_and_keeps_budget() {
    let config = PredictionConfig::default();
    let mut player = offline_client(&config, 4, &[HERO]);
    let rx = player.events.subscribe();
    for _ in 0..12 {
        player.manager.tick();
    }

    player
        .manager
        .on_server_state(HERO, far(2, Vec3::new(0.0, 0.0, 50.0)))
        .expect("hero exists");
    player.manager.tick();

    let stats = player.manager.stats();
    assert_eq!(stats.skipped_history, 1);
    assert_eq!(stats.skipped_budget, 0);
    assert_eq!(stats.resimulations, 0);
    assert_eq!(stats.snaps, 1);
    assert_eq!(player.position(0), Vec3::new(0.0, 0.0, 50.0));
    assert!(drain(&rx).contains(&PredictionEvent::ResimulationSkipped {
        entity: Some(HERO),
        tick: Tick(2),
        reason: SkipReason::InsufficientHistory,
    }));

    // The refused replay cost nothing, so the next reachable one runs
    player
        .manager
        .on_server_state(HERO, far(12, Vec3::new(0.0, 0.0, 80.0)))
        .expect("hero exists");
    player.manager.tick();

    let stats = player.manager.stats();
    assert_eq!(stats.resimulations, 1);
    assert_eq!(stats.replayed_steps, 1);
    assert_eq!(stats.skipped_budget, 0);
    assert_eq!(player.position(0), Vec3::new(0.0, 0.0, 80.0));
}

#[test]
fn test_world_replay_refused_while_in_debt() {
    let config = PredictionConfig::default();
    let mut player = offline_client(&config, config.history_size, &[HERO]);
    let rx = player.events.subscribe();
    for _ in 0..12 {
        player.manager.tick();
    }

    player
        .manager
        .on_server_state(HERO, far(2, Vec3::new(0.0, 0.0, 50.0)))
        .expect("hero exists");
    player.manager.tick();
    assert_eq!(player.manager.stats().resimulations, 1);
    assert_eq!(player.manager.stats().replayed_steps, 10);

    // Ten steps of debt, one repaid so far
    player
        .manager
        .on_server_state(HERO, far(12, Vec3::new(0.0, 0.0, 80.0)))
        .expect("hero exists");
    player.manager.tick();

    let stats = player.manager.stats();
    assert_eq!(stats.resimulations, 1);
    assert_eq!(stats.skipped_budget, 1);
    assert_eq!(stats.skipped_history, 0);
    assert_eq!(stats.snaps, 1);
    assert_eq!(player.position(0), Vec3::new(0.0, 0.0, 80.0));
    assert!(drain(&rx).contains(&PredictionEvent::ResimulationSkipped {
        entity: Some(HERO),
        tick: Tick(12),
        reason: SkipReason::Budget,
    }));
}

/// HERO diverges at tick 5; CRATE has authoritative states for 8..=12 only.
fn replay_with_crate_states(use_available_server_ticks: bool) -> Peer {
    let mut config = PredictionConfig::default();
    config.client.use_available_server_ticks = use_available_server_ticks;
    let mut player = offline_client(&config, config.history_size, &[HERO, CRATE]);
    for _ in 0..12 {
        player.manager.tick();
    }
    player
        .manager
        .on_server_state(HERO, far(5, Vec3::new(0.0, 0.0, 50.0)))
        .expect("hero exists");
    for t in 8..=12u32 {
        player
            .manager
            .on_server_state(CRATE, far(t, Vec3::new(0.0, t as f32, 0.0)))
            .expect("crate exists");
    }
    player.manager.tick();
    assert_eq!(player.manager.stats().resimulations, 1);
    assert_eq!(player.manager.stats().replayed_steps, 7);
    player
}

#[test]
fn test_replay_snaps_to_available_authoritative_ticks() {
    let player = replay_with_crate_states(true);
    let crate_entity = player.manager.client_entity(CRATE).expect("crate");
    for t in 8..=12u32 {
        let local = crate_entity.local_state(Tick(t)).expect("replayed tick");
        assert_eq!(local.position.y, t as f32, "tick {t}");
    }
    assert_eq!(crate_entity.local_state(Tick(7)).map(|s| s.position.y), Some(0.0));
    assert_eq!(player.position(1), Vec3::new(0.0, 12.0, 0.0));
}

#[test]
fn test_replay_ignores_authoritative_ticks_when_disabled() {
    let player = replay_with_crate_states(false);
    let crate_entity = player.manager.client_entity(CRATE).expect("crate");
    for t in 8..=12u32 {
        let local = crate_entity.local_state(Tick(t)).expect("replayed tick");
        assert_eq!(local.position.y, 0.0, "tick {t}");
    }
    assert_eq!(player.position(0), Vec3::new(0.0, 0.0, 50.0));
}
