//! Read-only hand-off of particle positions to a renderer.
//!
//! The buffer is laid out for instanced drawing: one [`ParticleInstance`] per
//! particle, uploadable as raw bytes. It is only refreshed from committed
//! positions, so a renderer never sees a half-finished step.

use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};

use super::simulation::SimulationStepper;

/// Per-instance data of one particle sphere.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleInstance {
    pub position: [f32; 3],
    /// Sphere diameter.
    pub scale: f32,
}

/// Instance buffer mirroring the committed particle positions.
#[derive(Resource, Clone, Debug, Default)]
pub struct FluidRenderBuffer {
    instances: Vec<ParticleInstance>,
    /// Step the buffer was taken from.
    step: u64,
}

impl FluidRenderBuffer {
    pub fn from_simulation(simulation: &SimulationStepper) -> Self {
        let mut buffer = Self::default();
        buffer.sync(simulation);
        buffer
    }

    /// Copies the committed positions of `simulation`.
    pub fn sync(&mut self, simulation: &SimulationStepper) {
        let scale = simulation.params().particle_spacing();
        self.instances.clear();
        self.instances
            .extend(simulation.positions().iter().map(|p| ParticleInstance {
                position: p.to_array(),
                scale,
            }));
        self.step = simulation.stats().step;
    }

    pub fn instances(&self) -> &[ParticleInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Instance data as bytes, ready for a vertex buffer upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fluid::params::FluidParams;

    #[test]
    fn test_instance_layout() {
        assert_eq!(std::mem::size_of::<ParticleInstance>(), 16);
    }

    #[test]
    fn test_buffer_follows_commits() {
        let mut simulation = SimulationStepper::new(FluidParams::default()).unwrap();
        let mut buffer = FluidRenderBuffer::from_simulation(&simulation);

        assert_eq!(buffer.len(), 64);
        assert_eq!(buffer.as_bytes().len(), 64 * 16);
        assert_eq!(buffer.instances()[0].scale, 0.1);
        assert_eq!(buffer.step(), 0);

        simulation.step();
        assert_ne!(buffer.instances()[0].position, simulation.positions()[0].to_array());

        buffer.sync(&simulation);
        assert_eq!(buffer.step(), 1);
        assert_eq!(buffer.instances()[0].position, simulation.positions()[0].to_array());
    }
}
