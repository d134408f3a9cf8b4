//! In-process transport joining one authority and any number of clients
//! through [`SimulatedLink`]s.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use tickback_core::{ConnectionId, EntityId, InputRecord, StateRecord, Tick, WorldStateRecord};

use super::{NetworkConditions, SimulatedLink};
use crate::error::LinkError;
use crate::link::{ClientLink, Inbound, Inbox, ServerLink};

#[derive(Debug)]
struct Pipe {
    link: SimulatedLink<Inbound>,
    open: bool,
}

type SharedPipe = Arc<Mutex<Pipe>>;

fn pipe(conditions: NetworkConditions, seed: u64) -> SharedPipe {
    Arc::new(Mutex::new(Pipe {
        link: SimulatedLink::new(conditions, seed),
        open: true,
    }))
}

fn send(pipe: &SharedPipe, connection: ConnectionId, message: Inbound) -> Result<(), LinkError> {
    let mut pipe = pipe.lock();
    if !pipe.open {
        return Err(LinkError::Disconnected(connection));
    }
    pipe.link.send(message);
    Ok(())
}

/// Both directions of every connection. Call [`SimulatedNetwork::advance`]
/// once per tick to deliver arrivals into the inboxes.
#[derive(Debug)]
pub struct SimulatedNetwork {
    server_inbox: Inbox,
    upstream: BTreeMap<ConnectionId, SharedPipe>,
    downstream: Arc<Mutex<BTreeMap<ConnectionId, SharedPipe>>>,
    client_inboxes: BTreeMap<ConnectionId, Inbox>,
    seed: u64,
}

impl SimulatedNetwork {
    /// Network delivering client traffic into `server_inbox`.
    #[must_use]
    pub fn new(server_inbox: Inbox, seed: u64) -> Self {
        Self {
            server_inbox,
            upstream: BTreeMap::new(),
            downstream: Arc::new(Mutex::new(BTreeMap::new())),
            client_inboxes: BTreeMap::new(),
            seed,
        }
    }

    /// Attaches a client. Both directions use `conditions`.
    pub fn connect(
        &mut self,
        connection: ConnectionId,
        client_inbox: Inbox,
        conditions: NetworkConditions,
    ) -> SimulatedClientLink {
        let base = self.seed.wrapping_add(u64::from(connection.0) * 2);
        let up = pipe(conditions, base);
        self.upstream.insert(connection, Arc::clone(&up));
        self.downstream.lock().insert(connection, pipe(conditions, base + 1));
        self.client_inboxes.insert(connection, client_inbox);
        SimulatedClientLink { connection, pipe: up }
    }

    /// Closes both directions of `connection`. Messages in flight are lost.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        if let Some(up) = self.upstream.remove(&connection) {
            up.lock().open = false;
        }
        if let Some(down) = self.downstream.lock().remove(&connection) {
            down.lock().open = false;
        }
        self.client_inboxes.remove(&connection);
    }

    /// Outbound hooks for the authority.
    #[must_use]
    pub fn server_link(&self) -> SimulatedServerLink {
        SimulatedServerLink {
            downstream: Arc::clone(&self.downstream),
        }
    }

    /// Advances every link one tick and delivers what arrived.
    pub fn advance(&self) {
        for up in self.upstream.values() {
            for message in up.lock().link.advance() {
                self.server_inbox.push(message);
            }
        }
        for (connection, down) in self.downstream.lock().iter() {
            let arrived = down.lock().link.advance();
            if let Some(inbox) = self.client_inboxes.get(connection) {
                for message in arrived {
                    inbox.push(message);
                }
            }
        }
    }
}

/// Client side of a simulated connection.
#[derive(Debug, Clone)]
pub struct SimulatedClientLink {
    connection: ConnectionId,
    pipe: SharedPipe,
}

impl ClientLink for SimulatedClientLink {
    fn send_input(&mut self, entity: EntityId, tick: Tick, input: &InputRecord) -> Result<(), LinkError> {
        let message = Inbound::ClientInput {
            connection: self.connection,
            entity,
            tick,
            input: input.clone(),
        };
        send(&self.pipe, self.connection, message)
    }

    fn send_heartbeat(&mut self, tick: Tick) -> Result<(), LinkError> {
        let message = Inbound::Heartbeat {
            connection: self.connection,
            tick,
        };
        send(&self.pipe, self.connection, message)
    }
}

/// Authority side of every simulated connection.
#[derive(Debug, Clone)]
pub struct SimulatedServerLink {
    downstream: Arc<Mutex<BTreeMap<ConnectionId, SharedPipe>>>,
}

impl SimulatedServerLink {
    fn send(&self, connection: ConnectionId, message: Inbound) -> Result<(), LinkError> {
        let down = self
            .downstream
            .lock()
            .get(&connection)
            .cloned()
            .ok_or(LinkError::Disconnected(connection))?;
        send(&down, connection, message)
    }
}

impl ServerLink for SimulatedServerLink {
    fn connections(&self) -> Vec<ConnectionId> {
        self.downstream.lock().keys().copied().collect()
    }

    fn send_state(&mut self, connection: ConnectionId, entity: EntityId, state: &StateRecord) -> Result<(), LinkError> {
        self.send(
            connection,
            Inbound::ServerState {
                entity,
                state: state.clone(),
            },
        )
    }

    fn send_world_state(&mut self, connection: ConnectionId, state: &WorldStateRecord) -> Result<(), LinkError> {
        self.send(connection, Inbound::WorldState(state.clone()))
    }

    fn set_controlled_locally(
        &mut self,
        connection: ConnectionId,
        entity: EntityId,
        controlled: bool,
    ) -> Result<(), LinkError> {
        self.send(connection, Inbound::OwnershipChanged { entity, controlled })
    }
}
