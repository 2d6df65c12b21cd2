//! Position Based Fluids (PBF) simulation module for Bevy.
//!
//! The simulation runs on the CPU, serially or with rayon data-parallel
//! stages, and advances one fixed timestep per call.
//!
//! # Architecture
//!
//! - [`params`]: Simulation parameters and presets
//! - [`error`]: Configuration errors
//! - [`particle`]: Particle arrays, lattice spawning and bounded neighbor lists
//! - [`spatial`]: Uniform grid and sparse hash neighbor search
//! - [`integrator`]: Gravity and position prediction
//! - [`solver`]: PBF density constraint solver
//! - [`boundary`]: Planar walls and collision response
//! - [`simulation`]: The per-step pipeline
//! - [`render`]: Instance buffer for renderers
//! - [`plugin`]: Bevy plugin for easy integration
//!
//! # Example
//!
//! ```rust,no_run
//! use tidepool::fluid::prelude::*;
//!
//! let mut simulation = SimulationStepper::new(FluidParams::dam_break())?;
//! for _ in 0..120 {
//!     simulation.step();
//! }
//! println!("{:?}", simulation.positions().first());
//! # Ok::<(), ConfigError>(())
//! ```

pub mod boundary;
pub mod error;
pub mod integrator;
pub mod params;
pub mod particle;
pub mod plugin;
pub mod render;
pub mod simulation;
pub mod solver;
pub mod spatial;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::boundary::*;
    pub use super::error::*;
    pub use super::integrator::*;
    pub use super::params::*;
    pub use super::particle::*;
    pub use super::plugin::*;
    pub use super::render::*;
    pub use super::simulation::*;
    pub use super::solver::*;
    pub use super::spatial::*;
}
