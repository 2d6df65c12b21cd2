//! Configuration errors.
//!
//! Every variant is fatal: it is reported while building a simulation and no
//! particle state exists afterwards. Per-particle numeric trouble during a step
//! never surfaces as an error, it is absorbed by the solver guards.

use bevy::prelude::*;

/// Reasons a [`FluidParams`](super::params::FluidParams) cannot start a simulation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("spawn region {min} .. {max} holds no particles of radius {radius}")]
    EmptySpawnRegion { min: Vec3, max: Vec3, radius: f32 },

    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f32 },

    #[error("{name} must be finite")]
    NonFinite { name: &'static str },

    #[error("kernel range {kernel_range} is smaller than the particle diameter {diameter}")]
    KernelTooSmall { kernel_range: f32, diameter: f32 },

    #[error("wall {index} has a zero normal and cannot be normalized")]
    ZeroWallNormal { index: usize },

    #[error("grid volume {min} .. {max} is empty on at least one axis")]
    DegenerateGrid { min: Vec3, max: Vec3 },

    #[error("hash cell size {cell_size} is smaller than the kernel range {kernel_range}")]
    HashCellTooSmall { cell_size: f32, kernel_range: f32 },

    #[error("solver needs at least one iteration")]
    NoSolverIterations,

    #[error("neighbor capacity must be at least one")]
    NoNeighborCapacity,

    #[error("failed to parse fluid parameters: {0}")]
    Parse(String),
}

impl From<ron::error::SpannedError> for ConfigError {
    fn from(err: ron::error::SpannedError) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
