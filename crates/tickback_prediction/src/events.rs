//! Typed diagnostics.
//!
//! Every correction, desync classification and buffer anomaly is emitted as a
//! [`PredictionEvent`]. Events only observe the engine; nothing in the tick
//! loop reads them back.
//!
//! ```text
//!   entity / coordinator / manager
//!        |
//!        | emit(event)          (also recorded through tracing)
//!        v
//!   EventSink ──► Receiver #1 (metrics)
//!             └─► Receiver #2 (test assertions)
//! ```
//!
//! Delivery is in emission order. A sink is cheap to clone; every component
//! of one simulation shares the same sink.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tickback_core::{BodyHandle, ConnectionId, EntityId, Tick};

use crate::decider::PredictionDecision;

/// Authority-side anomaly classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DesyncReason {
    /// Nothing queued for the tick being simulated.
    NoInputForTick,
    /// Input queued but held back by the pre-buffer.
    InputBuffered,
    /// Next queued input skips more than one tick.
    InputJump,
    /// More than one queued input consumed in one drain pass.
    MultipleInputsPerTick,
    /// Input rejected by a component validator.
    InvalidInput,
    /// Input arrived for a tick not above the authority tick.
    LateTick,
    /// Input queue was full on insert.
    TickOverflow,
    /// Extra drain passes were run to reduce backlog.
    Catchup,
}

/// Why a requested resimulation did not run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The oversimulation guard refused it.
    Budget,
    /// World history does not reach back far enough.
    InsufficientHistory,
    /// Resimulation is disabled by configuration.
    Disabled,
}

/// One decider comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckReport {
    /// Entity compared.
    pub entity: EntityId,
    /// Tick compared.
    pub tick: Tick,
    /// Position distance.
    pub distance: f32,
    /// Orientation difference in degrees.
    pub rotation_degrees: f32,
    /// Velocity direction difference in degrees.
    pub velocity_angle_degrees: f32,
    /// Speed difference.
    pub speed_delta: f32,
    /// Angular velocity difference.
    pub angular_velocity_delta: f32,
    /// Outcome.
    pub decision: PredictionDecision,
}

/// Per-tick timing of the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickTiming {
    /// Tick that completed.
    pub tick: Tick,
    /// Whether a resimulation ran during this tick.
    pub resimulated: bool,
    /// Wall time spent in the tick.
    pub duration: Duration,
}

/// Everything observable about the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum PredictionEvent {
    /// Local prediction matched the authority.
    PredictionAccepted {
        /// Entity.
        entity: EntityId,
        /// Verified tick.
        tick: Tick,
    },
    /// A replay window opened. `entity` is `None` for world-wide replays.
    ResimulationStarted {
        /// Entity that triggered it.
        entity: Option<EntityId>,
        /// Ground-truth tick.
        from: Tick,
        /// Last replayed tick.
        to: Tick,
    },
    /// One replayed tick.
    ResimulationStep {
        /// Entity that triggered the replay.
        entity: Option<EntityId>,
        /// Tick just replayed.
        tick: Tick,
    },
    /// The replay window closed.
    ResimulationFinished {
        /// Entity that triggered it.
        entity: Option<EntityId>,
        /// Ground-truth tick.
        from: Tick,
        /// Number of replayed ticks.
        steps: u32,
    },
    /// A requested resimulation did not run.
    ResimulationSkipped {
        /// Entity that requested it.
        entity: Option<EntityId>,
        /// Divergent tick.
        tick: Tick,
        /// Reason.
        reason: SkipReason,
    },
    /// Authoritative state was copied onto the body.
    Snapped {
        /// Entity.
        entity: EntityId,
        /// Authoritative tick applied.
        tick: Tick,
    },
    /// Authoritative tick is newer than anything simulated locally.
    AuthorityAhead {
        /// Entity.
        entity: EntityId,
        /// Authoritative tick.
        authority_tick: Tick,
        /// Last locally applied tick.
        last_applied: Tick,
    },
    /// Local history no longer holds the tick to compare.
    LocalHistoryMissing {
        /// Entity.
        entity: EntityId,
        /// Tick that was looked up.
        tick: Tick,
    },
    /// A component read or wrote past the declared channel width.
    InputLayoutMismatch {
        /// Entity.
        entity: EntityId,
        /// Tick being sampled or loaded.
        tick: Tick,
    },
    /// A decider comparison.
    DeciderCheck(CheckReport),
    /// Authority-side anomaly.
    Desync {
        /// Entity.
        entity: EntityId,
        /// Authority tick when detected.
        tick: Tick,
        /// Classification.
        reason: DesyncReason,
    },
    /// First queued input after construction or reset.
    FirstInputArrived {
        /// Entity.
        entity: EntityId,
        /// Client tick of the input.
        tick: Tick,
    },
    /// Physics world rewound.
    Rewound {
        /// Clock before the rewind.
        from: Tick,
        /// Restored tick.
        to: Tick,
    },
    /// Rewind request refused.
    RewindRejected {
        /// Ticks requested.
        requested: u32,
        /// Ticks available.
        available: u32,
    },
    /// A body rewound to before its spawn was parked out of bounds.
    BodyOutOfBounds {
        /// Body.
        body: BodyHandle,
        /// Spawn tick of the body.
        spawn_tick: Tick,
    },
    /// A tracked body has no history entry for the restored tick.
    HistoryMissing {
        /// Body.
        body: BodyHandle,
        /// Tick looked up.
        tick: Tick,
    },
    /// Body tracking took effect.
    BodyTracked {
        /// Body.
        body: BodyHandle,
        /// Spawn tick recorded.
        spawn_tick: Tick,
    },
    /// Body tracking request staged until the replay window closes.
    TrackDeferred {
        /// Body.
        body: BodyHandle,
        /// True for track, false for untrack.
        track: bool,
    },
    /// Body tracking removed.
    BodyUntracked {
        /// Body.
        body: BodyHandle,
    },
    /// Entity registered with the manager.
    EntityAdded {
        /// Entity.
        entity: EntityId,
    },
    /// Entity removed from the manager.
    EntityRemoved {
        /// Entity.
        entity: EntityId,
    },
    /// Authority assigned an owner.
    OwnerSet {
        /// Entity.
        entity: EntityId,
        /// Owning connection.
        connection: ConnectionId,
    },
    /// Authority removed an owner.
    OwnerUnset {
        /// Entity.
        entity: EntityId,
        /// Former owner.
        connection: ConnectionId,
    },
    /// Client's locally controlled entity changed.
    LocalEntityChanged {
        /// New local entity, if any.
        entity: Option<EntityId>,
    },
    /// An outbound transport hook failed.
    SendFailed {
        /// Connection, if the send was addressed.
        connection: Option<ConnectionId>,
        /// Entity concerned, if any.
        entity: Option<EntityId>,
        /// Tick of the payload.
        tick: Tick,
        /// Transport error text.
        error: String,
    },
    /// An authoritative state referenced an entity this side does not know.
    UnknownEntityState {
        /// Entity.
        entity: EntityId,
        /// Tick of the state.
        tick: Tick,
    },
    /// One orchestrator tick finished.
    TickCompleted(TickTiming),
}

/// Fan-out of diagnostics to any number of subscribers.
#[derive(Clone, Default)]
pub struct EventSink {
    subscribers: Arc<Mutex<Vec<Sender<PredictionEvent>>>>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl EventSink {
    /// Creates a sink with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<PredictionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Delivers `event` to every subscriber and records it through tracing.
    pub fn emit(&self, event: PredictionEvent) {
        log_event(&event);
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn log_event(event: &PredictionEvent) {
    match event {
        PredictionEvent::Desync { entity, tick, reason } => {
            tracing::warn!("{entity} desync at {tick}: {reason:?}");
        }
        PredictionEvent::SendFailed { connection, entity, tick, error } => {
            tracing::warn!("send failed at {tick} (conn {connection:?}, entity {entity:?}): {error}");
        }
        PredictionEvent::RewindRejected { requested, available } => {
            tracing::warn!("rewind of {requested} ticks rejected, {available} available");
        }
        PredictionEvent::ResimulationStarted { entity, from, to } => {
            tracing::debug!("resimulating {from}..={to} (entity {entity:?})");
        }
        PredictionEvent::ResimulationSkipped { entity, tick, reason } => {
            tracing::debug!("resimulation at {tick} skipped for {entity:?}: {reason:?}");
        }
        PredictionEvent::Snapped { entity, tick } => {
            tracing::debug!("{entity} snapped to {tick}");
        }
        PredictionEvent::DeciderCheck(report) => {
            tracing::trace!(
                "{} check at {}: dist={} rot={} -> {:?}",
                report.entity,
                report.tick,
                report.distance,
                report.rotation_degrees,
                report.decision
            );
        }
        other => tracing::trace!("{other:?}"),
    }
}

/// Drains everything currently queued on `rx`.
#[must_use]
pub fn drain(rx: &Receiver<PredictionEvent>) -> Vec<PredictionEvent> {
    rx.try_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_delivery_to_all_subscribers() {
        let sink = EventSink::new();
        let a = sink.subscribe();
        let b = sink.subscribe();

        for t in 1..=3 {
            sink.emit(PredictionEvent::PredictionAccepted {
                entity: EntityId(1),
                tick: Tick(t),
            });
        }

        for rx in [&a, &b] {
            let ticks: Vec<u32> = drain(rx)
                .into_iter()
                .filter_map(|e| match e {
                    PredictionEvent::PredictionAccepted { tick, .. } => Some(tick.0),
                    _ => None,
                })
                .collect();
            assert_eq!(ticks, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_dropped_receiver_unsubscribes() {
        let sink = EventSink::new();
        let kept = sink.subscribe();
        drop(sink.subscribe());
        assert_eq!(sink.subscriber_count(), 2);

        sink.emit(PredictionEvent::EntityAdded { entity: EntityId(4) });
        assert_eq!(sink.subscriber_count(), 1);
        assert_eq!(drain(&kept).len(), 1);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let sink = EventSink::new();
        let rx = sink.subscribe();
        let clone = sink.clone();
        clone.emit(PredictionEvent::EntityRemoved { entity: EntityId(2) });
        assert_eq!(drain(&rx), vec![PredictionEvent::EntityRemoved { entity: EntityId(2) }]);
    }
}
