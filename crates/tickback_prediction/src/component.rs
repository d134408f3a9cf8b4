//! Pluggable per-feature capabilities.
//!
//! A predicted entity is a body plus an ordered list of components. A
//! component may produce input (throttle, steering), apply forces from the
//! loaded input, and carry extra state that must survive a snap. All three
//! are optional except force application.
//!
//! Channel order is declaration order. A component that writes or reads a
//! different number of channels than it declares is realigned and reported,
//! so one misbehaving component cannot shift the channels of the next.

use tickback_core::{BodyHandle, InputLayout, InputReader, InputRecord, InputWriter, StateRecord};

use crate::physics::PhysicsWorld;

/// One simulated feature of an entity.
pub trait PredictableComponent {
    /// Input channels this component writes and reads.
    fn input_layout(&self) -> InputLayout {
        InputLayout::EMPTY
    }

    /// Writes this tick's input.
    fn sample_input(&mut self, _input: &mut InputWriter<'_>) {}

    /// Reads an input and stores it for the next force application.
    fn load_input(&mut self, _input: &mut InputReader<'_>) {}

    /// Checks an input received from a client. `dt` is the time covered
    /// since the previously loaded input.
    fn validate_input(&self, _dt: f32, _input: &mut InputReader<'_>) -> bool {
        true
    }

    /// Applies forces for the loaded input.
    fn apply_forces(&mut self, body: BodyHandle, world: &mut dyn PhysicsWorld);

    /// State channels carried in the state record.
    fn state_layout(&self) -> InputLayout {
        InputLayout::EMPTY
    }

    /// Writes component state.
    fn sample_component_state(&self, _state: &mut InputWriter<'_>) {}

    /// Restores component state.
    fn load_component_state(&mut self, _state: &mut InputReader<'_>) {}
}

/// Ordered components of one entity with their combined layouts.
pub struct ComponentSet {
    components: Vec<Box<dyn PredictableComponent>>,
    input_layout: InputLayout,
    state_layout: InputLayout,
}

impl std::fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSet")
            .field("components", &self.components.len())
            .field("input_layout", &self.input_layout)
            .field("state_layout", &self.state_layout)
            .finish()
    }
}

impl ComponentSet {
    /// Fixes the component order and layouts.
    #[must_use]
    pub fn new(components: Vec<Box<dyn PredictableComponent>>) -> Self {
        let mut input_layout = InputLayout::EMPTY;
        let mut state_layout = InputLayout::EMPTY;
        for component in &components {
            input_layout += component.input_layout();
            state_layout += component.state_layout();
        }
        Self {
            components,
            input_layout,
            state_layout,
        }
    }

    /// Combined input layout.
    #[must_use]
    pub fn input_layout(&self) -> InputLayout {
        self.input_layout
    }

    /// Combined state layout.
    #[must_use]
    pub fn state_layout(&self) -> InputLayout {
        self.state_layout
    }

    /// True if any component produces input.
    #[must_use]
    pub fn is_controllable(&self) -> bool {
        !self.input_layout.is_empty()
    }

    /// True if any component carries state.
    #[must_use]
    pub fn has_state(&self) -> bool {
        !self.state_layout.is_empty()
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// True if there are no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Zeroed input record of the combined width.
    #[must_use]
    pub fn new_input(&self) -> InputRecord {
        InputRecord::new(self.input_layout)
    }

    /// Samples every component's input into `record`.
    ///
    /// Returns `false` if a component wrote a different number of channels
    /// than it declared.
    pub fn sample_input(&mut self, record: &mut InputRecord) -> bool {
        let mut writer = record.writer();
        let mut expected = InputLayout::EMPTY;
        let mut aligned = true;
        for component in &mut self.components {
            expected += component.input_layout();
            component.sample_input(&mut writer);
            if writer.position() != expected {
                aligned = false;
                writer.seek(expected);
            }
        }
        aligned && !writer.overrun()
    }

    /// Loads `record` into every component.
    ///
    /// Returns `false` on a layout mismatch.
    pub fn load_input(&mut self, record: &InputRecord) -> bool {
        let mut reader = record.reader();
        let mut expected = InputLayout::EMPTY;
        let mut aligned = true;
        for component in &mut self.components {
            expected += component.input_layout();
            component.load_input(&mut reader);
            if reader.position() != expected {
                aligned = false;
                reader.seek(expected);
            }
        }
        aligned && !reader.overrun()
    }

    /// Asks every component whether `record` is plausible.
    #[must_use]
    pub fn validate_input(&self, dt: f32, record: &InputRecord) -> bool {
        let mut reader = record.reader();
        let mut offset = InputLayout::EMPTY;
        for component in &self.components {
            reader.seek(offset);
            if !component.validate_input(dt, &mut reader) {
                return false;
            }
            offset += component.input_layout();
        }
        true
    }

    /// Applies every component's forces.
    pub fn apply_forces(&mut self, body: BodyHandle, world: &mut dyn PhysicsWorld) {
        for component in &mut self.components {
            component.apply_forces(body, world);
        }
    }

    /// Serialized component state, `None` when no component carries state.
    #[must_use]
    pub fn sample_state(&self) -> Option<InputRecord> {
        if !self.has_state() {
            return None;
        }
        let mut record = InputRecord::new(self.state_layout);
        let mut writer = record.writer();
        let mut expected = InputLayout::EMPTY;
        for component in &self.components {
            expected += component.state_layout();
            component.sample_component_state(&mut writer);
            writer.seek(expected);
        }
        Some(record)
    }

    /// Restores component state from a record's payload, if present.
    pub fn load_state(&mut self, record: &StateRecord) {
        let Some(state) = record.component_state.as_ref() else {
            return;
        };
        let mut reader = state.reader();
        let mut expected = InputLayout::EMPTY;
        for component in &mut self.components {
            expected += component.state_layout();
            component.load_component_state(&mut reader);
            reader.seek(expected);
        }
    }
}
