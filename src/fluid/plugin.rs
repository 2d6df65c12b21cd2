//! Bevy plugin for fluid simulation.

use bevy::prelude::*;

use super::params::FluidParams;
use super::render::FluidRenderBuffer;
use super::simulation::SimulationStepper;

/// Plugin that adds a Position Based Fluids simulation to a Bevy app.
///
/// # Example
///
/// ```rust,ignore
/// use bevy::prelude::*;
/// use tidepool::prelude::*;
///
/// fn main() {
///     App::new()
///         .add_plugins(MinimalPlugins)
///         .add_plugins(FluidPlugin::new(FluidParams::dam_break()))
///         .run();
/// }
/// ```
#[derive(Default)]
pub struct FluidPlugin {
    params: FluidParams,
}

impl FluidPlugin {
    pub fn new(params: FluidParams) -> Self {
        Self { params }
    }
}

impl Plugin for FluidPlugin {
    fn build(&self, app: &mut App) {
        // Register types for reflection
        app.register_type::<FluidParams>();

        let simulation = match SimulationStepper::new(self.params.clone()) {
            Ok(simulation) => simulation,
            Err(err) => {
                error!("Fluid simulation not started: {err}");
                return;
            }
        };

        app.insert_resource(FluidState {
            particle_count: simulation.particle_count(),
            ..default()
        })
        .insert_resource(FluidRenderBuffer::from_simulation(&simulation))
        .insert_resource(self.params.clone())
        .insert_resource(FluidSimulation(simulation));

        app.add_systems(Update, (step_simulation, sync_render_buffer).chain());
    }
}

/// The running simulation.
#[derive(Resource, Debug, Deref, DerefMut)]
pub struct FluidSimulation(pub SimulationStepper);

/// Host-facing run control and latest statistics.
#[derive(Resource, Clone, Debug, Default)]
pub struct FluidState {
    pub paused: bool,
    /// Set to advance a single step while paused.
    pub step_requested: bool,
    /// Completed simulation steps.
    pub frame: u64,
    pub particle_count: usize,
    pub avg_density_error: f32,
    /// Overflowed neighbor lists over the whole run.
    pub truncated_neighbors: u64,
}

impl FluidState {
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    pub fn request_step(&mut self) {
        self.step_requested = true;
    }

    /// Whether the simulation should advance this frame. Consumes a pending
    /// step request.
    fn should_step(&mut self) -> bool {
        if !self.paused {
            return true;
        }
        std::mem::take(&mut self.step_requested)
    }
}

/// Advances the simulation by one fixed step per frame.
fn step_simulation(mut simulation: ResMut<FluidSimulation>, mut state: ResMut<FluidState>) {
    if !state.should_step() {
        return;
    }

    let stats = simulation.step();
    state.frame = stats.step;
    state.avg_density_error = stats.avg_density_error;
    state.truncated_neighbors = simulation.total_truncations();
}

/// Mirrors committed positions into the render buffer after a step.
fn sync_render_buffer(simulation: Res<FluidSimulation>, mut buffer: ResMut<FluidRenderBuffer>) {
    if simulation.is_changed() {
        buffer.sync(&simulation);
    }
}
