//! Physical body state and tick-tagged state records.

use crate::math::{Quaternion, Vec3};
use crate::record::input::InputRecord;
use crate::tick::{EntityId, Tick};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Physical pose and velocities of one body.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct BodyState {
    /// World position.
    pub position: Vec3,
    /// World orientation.
    pub orientation: Quaternion,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Angular velocity (radians per second).
    pub angular_velocity: Vec3,
}

impl BodyState {
    /// Fixed pose for bodies rewound to before they existed.
    pub const OUT_OF_BOUNDS: Self = Self {
        position: Vec3::ZERO,
        orientation: Quaternion::IDENTITY,
        velocity: Vec3::ZERO,
        angular_velocity: Vec3::ZERO,
    };

    /// Body at rest at `position`.
    #[must_use]
    pub const fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::OUT_OF_BOUNDS
        }
    }
}

impl Default for BodyState {
    fn default() -> Self {
        Self::OUT_OF_BOUNDS
    }
}

/// Snapshot of one entity at one tick.
///
/// Equality and hashing cover the tick and the four physical fields,
/// compared bit for bit. The input and component payloads ride along but
/// never take part in comparisons.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateRecord {
    /// Tick this state belongs to (state after that tick's step).
    pub tick: Tick,
    /// World position.
    pub position: Vec3,
    /// World orientation.
    pub orientation: Quaternion,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Angular velocity.
    pub angular_velocity: Vec3,
    /// Input applied at this tick, if known.
    pub input: Option<InputRecord>,
    /// Serialized component state, if any component carries state.
    pub component_state: Option<InputRecord>,
}

impl StateRecord {
    /// Record for `tick` from a body state.
    #[must_use]
    pub fn from_body(tick: Tick, body: BodyState) -> Self {
        Self {
            tick,
            position: body.position,
            orientation: body.orientation,
            velocity: body.velocity,
            angular_velocity: body.angular_velocity,
            input: None,
            component_state: None,
        }
    }

    /// Physical part of the record.
    #[must_use]
    pub fn body_state(&self) -> BodyState {
        BodyState {
            position: self.position,
            orientation: self.orientation,
            velocity: self.velocity,
            angular_velocity: self.angular_velocity,
        }
    }

    /// Overwrites the physical part of the record.
    pub fn set_body_state(&mut self, body: BodyState) {
        self.position = body.position;
        self.orientation = body.orientation;
        self.velocity = body.velocity;
        self.angular_velocity = body.angular_velocity;
    }

    fn physical_bits(&self) -> [u32; 14] {
        let words: [u32; 13] = bytemuck::cast(self.body_state());
        let mut bits = [0u32; 14];
        bits[0] = self.tick.0;
        bits[1..].copy_from_slice(&words);
        bits
    }
}

impl PartialEq for StateRecord {
    fn eq(&self, other: &Self) -> bool {
        self.physical_bits() == other.physical_bits()
    }
}

impl Eq for StateRecord {}

impl Hash for StateRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.physical_bits().hash(state);
    }
}

/// Authoritative state of every entity for one tick, sent as one message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldStateRecord {
    /// Tick the batch was sampled at.
    pub tick: Tick,
    /// Per-entity records.
    pub entities: Vec<(EntityId, StateRecord)>,
}

impl WorldStateRecord {
    /// Empty batch for `tick`.
    #[must_use]
    pub fn new(tick: Tick) -> Self {
        Self {
            tick,
            entities: Vec::new(),
        }
    }

    /// Appends an entity record.
    pub fn push(&mut self, entity: EntityId, record: StateRecord) {
        self.entities.push((entity, record));
    }

    /// Record for `entity`, if present in the batch.
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&StateRecord> {
        self.entities.iter().find(|(id, _)| *id == entity).map(|(_, record)| record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::input::InputLayout;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_payloads() {
        let body = BodyState::at(Vec3::new(1.0, 2.0, 3.0));
        let a = StateRecord::from_body(Tick(4), body);
        let mut b = a.clone();
        b.input = Some(InputRecord::new(InputLayout::new(2, 0)));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
    }

    #[test]
    fn test_equality_includes_tick() {
        let body = BodyState::at(Vec3::X);
        assert_ne!(StateRecord::from_body(Tick(1), body), StateRecord::from_body(Tick(2), body));
    }

    #[test]
    fn test_body_state_roundtrip() {
        let body = BodyState {
            position: Vec3::new(1.0, 0.0, -1.0),
            orientation: Quaternion::from_axis_angle(Vec3::Y, 45.0),
            velocity: Vec3::new(0.0, 2.0, 0.0),
            angular_velocity: Vec3::new(0.0, 0.0, 0.5),
        };
        assert_eq!(StateRecord::from_body(Tick(9), body).body_state(), body);
        assert_eq!(std::mem::size_of::<BodyState>(), 52);
    }

    #[test]
    fn test_world_state_lookup() {
        let mut world = WorldStateRecord::new(Tick(3));
        world.push(EntityId(7), StateRecord::from_body(Tick(3), BodyState::at(Vec3::Z)));
        assert_eq!(world.get(EntityId(7)).map(|r| r.position), Some(Vec3::Z));
        assert!(world.get(EntityId(8)).is_none());
    }
}
