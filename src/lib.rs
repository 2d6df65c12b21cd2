//! Tidepool - Position Based Fluids simulation for Bevy
//!
//! This library simulates an incompressible fluid with the Position Based
//! Fluids method: particles are integrated under gravity, then their
//! predicted positions are iteratively corrected until every particle's
//! density estimate matches the rest density, and planar walls keep them
//! inside their container.
//!
//! # Features
//!
//! - **PBF Simulation**: density constraint relaxation with fixed iteration count
//! - **Neighbor Search**: counting-sort uniform grid or sparse hash
//! - **Parallel Stages**: optional rayon execution, same results as serial
//! - **Walls**: any number of half-space boundaries
//! - **Easy Integration**: Bevy plugin plus a byte-ready instance buffer
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bevy::prelude::*;
//! use tidepool::prelude::*;
//!
//! fn main() {
//!     App::new()
//!         .add_plugins(MinimalPlugins)
//!         .add_plugins(FluidPlugin::new(FluidParams::dam_break()))
//!         .add_systems(Update, report)
//!         .run();
//! }
//!
//! fn report(state: Res<FluidState>) {
//!     info!("frame {}: density error {:.3}", state.frame, state.avg_density_error);
//! }
//! ```

pub mod fluid;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::fluid::prelude::*;
}
