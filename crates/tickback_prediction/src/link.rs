//! Network boundary.
//!
//! The engine never owns a socket. Outbound traffic goes through the
//! [`ClientLink`] and [`ServerLink`] traits; inbound traffic is pushed into an
//! [`Inbox`] from any thread and drained by the manager at the next tick
//! boundary, never in the middle of a tick.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use tickback_core::{ConnectionId, EntityId, InputRecord, StateRecord, Tick, WorldStateRecord};

use crate::error::LinkError;

/// Outbound hooks of a client.
pub trait ClientLink {
    /// Sends the input sampled for `entity` at `tick` to the authority.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] if the transport fails.
    fn send_input(&mut self, entity: EntityId, tick: Tick, input: &InputRecord) -> Result<(), LinkError>;

    /// Tells the authority the client's current tick when it controls no
    /// entity.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] if the transport fails.
    fn send_heartbeat(&mut self, tick: Tick) -> Result<(), LinkError>;
}

/// Outbound hooks of the authority.
pub trait ServerLink {
    /// Connections currently attached.
    fn connections(&self) -> Vec<ConnectionId>;

    /// Sends one entity's authoritative state.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] if the transport fails.
    fn send_state(&mut self, connection: ConnectionId, entity: EntityId, state: &StateRecord) -> Result<(), LinkError>;

    /// Sends every entity's authoritative state in one message.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] if the transport fails.
    fn send_world_state(&mut self, connection: ConnectionId, state: &WorldStateRecord) -> Result<(), LinkError>;

    /// Tells `connection` whether it now controls `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] if the transport fails.
    fn set_controlled_locally(
        &mut self,
        connection: ConnectionId,
        entity: EntityId,
        controlled: bool,
    ) -> Result<(), LinkError>;
}

/// Message delivered to a manager.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Authoritative state of one entity (client side).
    ServerState {
        /// Entity.
        entity: EntityId,
        /// State, tagged with the receiving client's tick.
        state: StateRecord,
    },
    /// Authoritative state of every entity (client side).
    WorldState(WorldStateRecord),
    /// Input from a client (authority side).
    ClientInput {
        /// Sender.
        connection: ConnectionId,
        /// Controlled entity.
        entity: EntityId,
        /// Client tick the input was sampled for.
        tick: Tick,
        /// Input channels.
        input: InputRecord,
    },
    /// Client tick report without input (authority side).
    Heartbeat {
        /// Sender.
        connection: ConnectionId,
        /// Client tick.
        tick: Tick,
    },
    /// Ownership notification (client side).
    OwnershipChanged {
        /// Entity.
        entity: EntityId,
        /// True if this client now controls it.
        controlled: bool,
    },
}

/// Thread-safe queue of inbound messages. Clones share the queue.
#[derive(Clone, Debug, Default)]
pub struct Inbox {
    queue: Arc<Mutex<VecDeque<Inbound>>>,
}

impl Inbox {
    /// Empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message.
    pub fn push(&self, message: Inbound) {
        self.queue.lock().push_back(message);
    }

    /// Takes every queued message in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<Inbound> {
        self.queue.lock().drain(..).collect()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_preserves_order() {
        let inbox = Inbox::new();
        for t in 1..=3 {
            inbox.push(Inbound::Heartbeat {
                connection: ConnectionId(1),
                tick: Tick(t),
            });
        }
        let ticks: Vec<u32> = inbox
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                Inbound::Heartbeat { tick, .. } => Some(tick.0),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![1, 2, 3]);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_push_from_other_threads() {
        let inbox = Inbox::new();
        let handles: Vec<_> = (0..4)
            .map(|c| {
                let inbox = inbox.clone();
                thread::spawn(move || {
                    for t in 0..25 {
                        inbox.push(Inbound::Heartbeat {
                            connection: ConnectionId(c),
                            tick: Tick(t),
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer thread");
        }
        assert_eq!(inbox.len(), 100);
    }
}
