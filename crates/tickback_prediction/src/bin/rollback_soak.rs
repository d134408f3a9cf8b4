//! # Rollback Soak Test
//!
//! One authority, two players and a spectator on lossy simulated links,
//! run for thirty simulated seconds. Reports how often predictions were
//! corrected and how the authority's input queues behaved.
//!
//! Usage: `rollback_soak [config.toml]`

use std::collections::BTreeMap;
use std::time::Instant;

use tickback_prediction::events::drain;
use tickback_prediction::simulation::{NetworkConditions, OffsetCommand, OffsetMover, PointMassWorld, SimulatedNetwork};
use tickback_prediction::{
    BodyHandle, BodyState, ConnectionId, DesyncReason, EntityId, EventSink, Inbox, PredictionConfig, PredictionEvent,
    PredictionManager, RewindablePhysicsController, Role, Vec3,
};

/// Simulated duration in seconds.
const DURATION_SECS: u32 = 30;

const ENTITIES: [EntityId; 2] = [EntityId(1), EntityId(2)];

struct Player {
    name: &'static str,
    connection: ConnectionId,
    conditions: NetworkConditions,
    owns: Option<EntityId>,
}

const PLAYERS: [Player; 3] = [
    Player {
        name: "player (poor)",
        connection: ConnectionId(1),
        conditions: NetworkConditions::POOR,
        owns: Some(EntityId(1)),
    },
    Player {
        name: "player (average)",
        connection: ConnectionId(2),
        conditions: NetworkConditions::AVERAGE,
        owns: Some(EntityId(2)),
    },
    Player {
        name: "spectator",
        connection: ConnectionId(3),
        conditions: NetworkConditions::GOOD,
        owns: None,
    },
];

struct Peer {
    manager: PredictionManager,
    command: OffsetCommand,
}

fn world() -> (PointMassWorld, Vec<BodyHandle>) {
    let mut world = PointMassWorld::new();
    let bodies = ENTITIES
        .iter()
        .enumerate()
        .map(|(i, _)| world.spawn(BodyState::at(Vec3::new(i as f32 * 10.0, 0.0, 0.0))))
        .collect();
    (world, bodies)
}

fn build(
    role: Role,
    config: &PredictionConfig,
    inbox: Inbox,
    events: &EventSink,
    network: &mut SimulatedNetwork,
    player: Option<&Player>,
) -> Result<Peer, Box<dyn std::error::Error>> {
    let (world, bodies) = world();
    let controller = RewindablePhysicsController::from_config(world, config, events.clone());
    let mut builder = PredictionManager::builder(role)
        .config(config.clone())
        .controller(Box::new(controller))
        .inbox(inbox.clone())
        .events(events.clone());
    builder = match player {
        Some(player) => builder.client_link(Box::new(network.connect(player.connection, inbox, player.conditions))),
        None => builder.server_link(Box::new(network.server_link())),
    };
    let mut manager = builder.build()?;

    let command = OffsetCommand::new();
    for (entity, body) in ENTITIES.iter().zip(&bodies) {
        let mover = OffsetMover::new(command.clone()).with_max_step(1.0);
        manager.add_entity(*entity, *body, vec![Box::new(mover)])?;
    }
    Ok(Peer { manager, command })
}

fn drain_desyncs(rx: &crossbeam_channel::Receiver<PredictionEvent>, counts: &mut BTreeMap<String, u64>) {
    for event in drain(rx) {
        if let PredictionEvent::Desync { reason, .. } = event {
            if reason != DesyncReason::InputBuffered {
                *counts.entry(format!("{reason:?}")).or_default() += 1;
            }
        }
    }
}

/// Joystick pattern: walk a square, pausing at each corner.
fn steer(tick: u32, lane: usize) -> Vec3 {
    let phase = (tick / 45 + lane as u32) % 5;
    let speed = 0.05;
    match phase {
        0 => Vec3::new(speed, 0.0, 0.0),
        1 => Vec3::new(0.0, 0.0, speed),
        2 => Vec3::new(-speed, 0.0, 0.0),
        3 => Vec3::new(0.0, 0.0, -speed),
        _ => Vec3::ZERO,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => PredictionConfig::from_file(&path)?,
        None => PredictionConfig::default(),
    };

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         TICKBACK - ROLLBACK SOAK TEST                            ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Tick Rate:          {} Hz", config.tick_rate);
    println!("│ Duration:           {DURATION_SECS} seconds");
    println!("│ History:            {} ticks", config.history_size);
    println!("│ Step Budget:        {} per tick", config.client.oversimulation.step_budget_per_tick);
    for player in &PLAYERS {
        let c = player.conditions;
        println!(
            "│ {:<19} {} ticks +{} jitter, {}% loss, {}% dup",
            format!("{}:", player.name),
            c.latency_ticks,
            c.jitter_ticks,
            c.loss_percent,
            c.duplicate_percent
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let server_inbox = Inbox::new();
    let mut network = SimulatedNetwork::new(server_inbox.clone(), 0x5eed);
    let server_events = EventSink::new();
    let server_rx = server_events.subscribe();
    let mut server = build(Role::Server, &config, server_inbox, &server_events, &mut network, None)?;

    let mut clients = Vec::new();
    for player in &PLAYERS {
        let events = EventSink::new();
        let peer = build(Role::Client, &config, Inbox::new(), &events, &mut network, Some(player))?;
        clients.push(peer);
    }
    for player in &PLAYERS {
        if let Some(entity) = player.owns {
            server.manager.set_entity_owner(entity, player.connection)?;
        }
    }

    println!("Running...");
    let ticks = DURATION_SECS * config.tick_rate;
    let mut desyncs: BTreeMap<String, u64> = BTreeMap::new();
    let started = Instant::now();
    for tick in 0..ticks {
        for (lane, peer) in clients.iter_mut().enumerate() {
            peer.command.set(steer(tick, lane));
            peer.manager.tick();
        }
        server.manager.tick();
        network.advance();

        drain_desyncs(&server_rx, &mut desyncs);
    }
    // One settling tick so the newest delivered states get checked
    for peer in &mut clients {
        peer.command.set(Vec3::ZERO);
        peer.manager.tick();
    }
    let elapsed = started.elapsed();

    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    SOAK RESULTS                                  ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let simulated = u64::from(ticks) * (PLAYERS.len() as u64 + 1);
    println!("┌─ TIMING ────────────────────────────────────────────────────────┐");
    println!("│ Real Time:          {:.3} seconds", elapsed.as_secs_f64());
    println!("│ Ticks Simulated:    {simulated} (all peers)");
    println!(
        "│ Worst Server Tick:  {} μs",
        server.manager.stats().max_tick_duration.as_micros()
    );
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ CORRECTIONS ───────────────────────────────────────────────────┐");
    let mut all_converged = true;
    for (player, peer) in PLAYERS.iter().zip(&clients) {
        let stats = peer.manager.stats();
        println!("│ {}", player.name);
        println!(
            "│   Resimulations:    {} ({} steps, {} over budget, {} out of history)",
            stats.resimulations, stats.replayed_steps, stats.skipped_budget, stats.skipped_history
        );
        println!("│   Snaps:            {}", stats.snaps);
        println!("│   Worst Tick:       {} μs", stats.max_tick_duration.as_micros());

        if let Some(entity) = player.owns {
            let predicted = peer.manager.client_entity(entity);
            let checked = predicted.and_then(|p| {
                let tick = p.latest_server_tick()?;
                Some((tick, p.local_state(tick)?, p.server_state(tick)?))
            });
            match checked {
                Some((tick, local, authority)) => {
                    let error = authority.position.distance(local.position);
                    all_converged &= error <= config.decider.distance + 1e-4;
                    println!("│   Error at {tick}:    {error:.5} units");
                }
                None => {
                    all_converged = false;
                    println!("│   Error:            no overlapping history");
                }
            }
        }
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ AUTHORITY INTAKE ──────────────────────────────────────────────┐");
    for entity in ENTITIES {
        if let Some(intake) = server.manager.server_entity(entity) {
            let s = intake.stats();
            println!(
                "│ {entity}: applied {}, stale {}, jumps {}, late {}, catch-up {}, max delay {}",
                s.applied, s.stale_inputs, s.jumps, s.late_inputs, s.catchup_passes, s.max_client_delay
            );
        }
    }
    for (reason, count) in &desyncs {
        println!("│ {reason:<19} {count}");
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    if all_converged {
        println!("║  ✓ CONVERGED: every player agrees with the authority             ║");
    } else {
        println!("║  ✗ DIVERGED: a player disagrees with the authority               ║");
    }
    println!("╚══════════════════════════════════════════════════════════════════╝");
    Ok(())
}
