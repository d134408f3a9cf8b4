//! Reference input component: moves a body by a commanded offset per tick.

use parking_lot::Mutex;
use std::sync::Arc;

use tickback_core::{BodyHandle, InputLayout, InputReader, InputWriter, Vec3};

use crate::component::PredictableComponent;
use crate::physics::PhysicsWorld;

/// Shared "joystick" feeding an [`OffsetMover`].
#[derive(Clone, Debug, Default)]
pub struct OffsetCommand(Arc<Mutex<Vec3>>);

impl OffsetCommand {
    /// New command at rest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the offset sampled at the next tick.
    pub fn set(&self, offset: Vec3) {
        *self.0.lock() = offset;
    }

    /// Current offset.
    #[must_use]
    pub fn get(&self) -> Vec3 {
        *self.0.lock()
    }
}

/// Adds the loaded offset to the body position every tick.
///
/// Input: three scalars (x, y, z). State: total distance moved, so a snap
/// restores the odometer along with the pose.
#[derive(Debug)]
pub struct OffsetMover {
    command: OffsetCommand,
    loaded: Vec3,
    max_step: f32,
    odometer: f32,
}

impl OffsetMover {
    /// Mover sampling from `command`, accepting any offset.
    #[must_use]
    pub fn new(command: OffsetCommand) -> Self {
        Self {
            command,
            loaded: Vec3::ZERO,
            max_step: 0.0,
            odometer: 0.0,
        }
    }

    /// Rejects inputs longer than `max_step` per tick.
    #[must_use]
    pub fn with_max_step(mut self, max_step: f32) -> Self {
        self.max_step = max_step;
        self
    }
}

impl PredictableComponent for OffsetMover {
    fn input_layout(&self) -> InputLayout {
        InputLayout::new(3, 0)
    }

    fn sample_input(&mut self, input: &mut InputWriter<'_>) {
        let offset = self.command.get();
        input.write_scalar(offset.x);
        input.write_scalar(offset.y);
        input.write_scalar(offset.z);
    }

    fn load_input(&mut self, input: &mut InputReader<'_>) {
        self.loaded = Vec3::new(input.read_scalar(), input.read_scalar(), input.read_scalar());
    }

    fn validate_input(&self, _dt: f32, input: &mut InputReader<'_>) -> bool {
        let offset = Vec3::new(input.read_scalar(), input.read_scalar(), input.read_scalar());
        let length = offset.length();
        length.is_finite() && (self.max_step <= 0.0 || length <= self.max_step)
    }

    fn apply_forces(&mut self, body: BodyHandle, world: &mut dyn PhysicsWorld) {
        if let Some(mut state) = world.body_state(body) {
            state.position += self.loaded;
            world.set_body_state(body, state);
            self.odometer += self.loaded.length();
        }
    }

    fn state_layout(&self) -> InputLayout {
        InputLayout::new(1, 0)
    }

    fn sample_component_state(&self, state: &mut InputWriter<'_>) {
        state.write_scalar(self.odometer);
    }

    fn load_component_state(&mut self, state: &mut InputReader<'_>) {
        self.odometer = state.read_scalar();
    }
}
