//! Fluid simulation parameters.
//!
//! One [`FluidParams`] is supplied when the simulation is built and is not
//! changed afterwards. Validation happens once, in [`FluidParams::validate`],
//! so every later stage can assume positive sizes and unit wall normals.

use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::boundary::Wall;
use super::error::ConfigError;

/// Default neighbor capacity per particle.
pub const MAX_NEIGHBORS: usize = 50;

/// Relative slack used when floor-dividing the spawn region, so extents that
/// are an exact multiple of the diameter do not lose a layer to rounding.
const LATTICE_SLACK: f32 = 1e-5;

/// Strategy used to bucket predicted positions for neighbor search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Reflect, Serialize, Deserialize)]
pub enum NeighborSearchKind {
    /// Dense grid over `grid_min..grid_max` built with a counting sort.
    #[default]
    UniformGrid,
    /// Sparse map keyed by cell coordinate, unbounded domain.
    SparseHash {
        /// Bucket edge length, at least the kernel range.
        cell_size: f32,
    },
}

/// How per-particle stages are executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Single-threaded reference path, bit-for-bit reproducible.
    #[default]
    Serial,
    /// Data-parallel stages on the rayon pool.
    Parallel,
}

/// Artificial pressure term (`s_corr`) against tensile instability.
///
/// `s_corr = -strength * (W(r) / W(delta_q * h))^exponent`
#[derive(Clone, Copy, Debug, PartialEq, Reflect, Serialize, Deserialize)]
pub struct TensileCorrection {
    pub strength: f32,
    pub exponent: i32,
    /// Reference distance as a fraction of the kernel range.
    pub delta_q: f32,
}

impl TensileCorrection {
    pub const fn disabled() -> Self {
        Self {
            strength: 0.0,
            exponent: 4,
            delta_q: 0.2,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.strength > 0.0
    }
}

impl Default for TensileCorrection {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Parameters controlling the fluid simulation.
#[derive(Resource, Clone, Debug, Reflect, Serialize, Deserialize)]
#[reflect(Resource)]
#[serde(default)]
pub struct FluidParams {
    /// Particle radius. Particles spawn on a lattice of spacing `2 * radius`.
    pub particle_radius: f32,

    /// Minimum corner of the spawn region.
    pub spawn_min: Vec3,

    /// Maximum corner of the spawn region.
    pub spawn_max: Vec3,

    /// Rest density of the fluid in kg/m³.
    pub rest_density: f32,

    /// Smoothing kernel radius (h). Must cover at least one particle diameter.
    pub kernel_range: f32,

    /// Gravity acceleration vector.
    pub gravity: Vec3,

    /// Fixed capacity of each particle's neighbor list.
    pub max_neighbors: usize,

    /// Density constraint iterations per step.
    pub solver_iterations: u32,

    /// Relaxation added to the lambda denominator.
    pub relaxation_epsilon: f32,

    /// Planar boundaries, applied in this order.
    pub walls: Vec<Wall>,

    /// Fixed timestep in seconds.
    pub timestep: f32,

    /// Minimum corner of the uniform grid volume.
    pub grid_min: Vec3,

    /// Maximum corner of the uniform grid volume.
    pub grid_max: Vec3,

    pub neighbor_search: NeighborSearchKind,

    /// Only let the density constraint push particles apart (`C` clamped at 0
    /// in the lambda numerator).
    pub unilateral_density: bool,

    pub tensile: TensileCorrection,

    pub execution: ExecutionMode,
}

impl Default for FluidParams {
    fn default() -> Self {
        Self {
            particle_radius: 0.05,
            spawn_min: Vec3::ZERO,
            spawn_max: Vec3::splat(0.4),
            rest_density: 1000.0,
            kernel_range: 0.2,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            max_neighbors: MAX_NEIGHBORS,
            solver_iterations: 4,
            relaxation_epsilon: 1e-6,
            walls: Vec::new(),
            timestep: 1.0 / 60.0,
            grid_min: Vec3::splat(-1.0),
            grid_max: Vec3::splat(2.0),
            neighbor_search: NeighborSearchKind::UniformGrid,
            unilateral_density: true,
            tensile: TensileCorrection::disabled(),
            execution: ExecutionMode::Serial,
        }
    }
}

impl FluidParams {
    /// Water-like settings with a weak artificial pressure term.
    pub fn water() -> Self {
        Self {
            tensile: TensileCorrection {
                strength: 1e-4,
                ..TensileCorrection::disabled()
            },
            ..Self::default()
        }
    }

    /// A block of water in the corner of an open-topped box.
    pub fn dam_break() -> Self {
        let container_min = Vec3::ZERO;
        let container_max = Vec3::new(1.6, 1.2, 0.6);
        Self {
            spawn_min: Vec3::ZERO,
            spawn_max: Vec3::new(0.5, 0.8, 0.6),
            walls: Wall::open_box(container_min, container_max),
            grid_min: container_min - Vec3::splat(0.2),
            grid_max: container_max + Vec3::splat(0.2),
            execution: ExecutionMode::Parallel,
            ..Self::water()
        }
    }

    /// Loads parameters from RON text; missing fields take their defaults.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let params: Self = ron::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    /// Reads and parses a RON parameter file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn with_particle_radius(mut self, radius: f32) -> Self {
        self.particle_radius = radius;
        self
    }

    pub fn with_spawn_region(mut self, min: Vec3, max: Vec3) -> Self {
        self.spawn_min = min;
        self.spawn_max = max;
        self
    }

    pub fn with_rest_density(mut self, rest_density: f32) -> Self {
        self.rest_density = rest_density;
        self
    }

    pub fn with_kernel_range(mut self, kernel_range: f32) -> Self {
        self.kernel_range = kernel_range;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_max_neighbors(mut self, max_neighbors: usize) -> Self {
        self.max_neighbors = max_neighbors;
        self
    }

    pub fn with_solver_iterations(mut self, iterations: u32) -> Self {
        self.solver_iterations = iterations;
        self
    }

    pub fn with_relaxation_epsilon(mut self, epsilon: f32) -> Self {
        self.relaxation_epsilon = epsilon;
        self
    }

    pub fn with_walls(mut self, walls: Vec<Wall>) -> Self {
        self.walls = walls;
        self
    }

    pub fn with_timestep(mut self, timestep: f32) -> Self {
        self.timestep = timestep;
        self
    }

    pub fn with_grid_bounds(mut self, min: Vec3, max: Vec3) -> Self {
        self.grid_min = min;
        self.grid_max = max;
        self
    }

    pub fn with_neighbor_search(mut self, kind: NeighborSearchKind) -> Self {
        self.neighbor_search = kind;
        self
    }

    pub fn with_unilateral_density(mut self, unilateral: bool) -> Self {
        self.unilateral_density = unilateral;
        self
    }

    pub fn with_tensile_correction(mut self, tensile: TensileCorrection) -> Self {
        self.tensile = tensile;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    /// Lattice spacing between spawned particles.
    pub fn particle_spacing(&self) -> f32 {
        2.0 * self.particle_radius
    }

    /// Particle mass so that a lattice at `particle_spacing` is near rest density.
    pub fn particle_mass(&self) -> f32 {
        self.rest_density * self.particle_spacing().powi(3)
    }

    /// Number of lattice sites along each axis of the spawn region.
    pub fn lattice_dims(&self) -> UVec3 {
        let extent = (self.spawn_max - self.spawn_min).max(Vec3::ZERO);
        let sites = extent / self.particle_spacing();
        (sites + sites * LATTICE_SLACK).floor().as_uvec3()
    }

    /// Number of particles the spawn region produces.
    pub fn particle_count(&self) -> usize {
        let dims = self.lattice_dims();
        dims.x as usize * dims.y as usize * dims.z as usize
    }

    /// Checks every fatal configuration condition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_finite_vec("spawn_min", self.spawn_min)?;
        check_finite_vec("spawn_max", self.spawn_max)?;
        check_finite_vec("gravity", self.gravity)?;
        check_positive("particle_radius", self.particle_radius)?;
        check_positive("rest_density", self.rest_density)?;
        check_positive("kernel_range", self.kernel_range)?;
        check_positive("timestep", self.timestep)?;
        check_positive("relaxation_epsilon", self.relaxation_epsilon)?;

        let diameter = self.particle_spacing();
        if self.kernel_range < diameter {
            return Err(ConfigError::KernelTooSmall {
                kernel_range: self.kernel_range,
                diameter,
            });
        }
        if self.solver_iterations == 0 {
            return Err(ConfigError::NoSolverIterations);
        }
        if self.max_neighbors == 0 {
            return Err(ConfigError::NoNeighborCapacity);
        }
        if self.particle_count() == 0 {
            return Err(ConfigError::EmptySpawnRegion {
                min: self.spawn_min,
                max: self.spawn_max,
                radius: self.particle_radius,
            });
        }
        for (index, wall) in self.walls.iter().enumerate() {
            check_finite_vec("wall anchor", wall.anchor)?;
            check_finite_vec("wall normal", wall.normal)?;
            if wall.normal.length_squared() <= f32::EPSILON {
                return Err(ConfigError::ZeroWallNormal { index });
            }
        }

        match self.neighbor_search {
            NeighborSearchKind::UniformGrid => {
                check_finite_vec("grid_min", self.grid_min)?;
                check_finite_vec("grid_max", self.grid_max)?;
                if self.grid_max.cmple(self.grid_min).any() {
                    return Err(ConfigError::DegenerateGrid {
                        min: self.grid_min,
                        max: self.grid_max,
                    });
                }
            }
            NeighborSearchKind::SparseHash { cell_size } => {
                check_positive("hash cell_size", cell_size)?;
                if cell_size < self.kernel_range {
                    return Err(ConfigError::HashCellTooSmall {
                        cell_size,
                        kernel_range: self.kernel_range,
                    });
                }
            }
        }

        Ok(())
    }
}

fn check_positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFinite { name });
    }
    if value <= 0.0 {
        return Err(ConfigError::NonPositive { name, value });
    }
    Ok(())
}

fn check_finite_vec(name: &'static str, value: Vec3) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite { name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert_eq!(FluidParams::default().validate(), Ok(()));
        assert_eq!(FluidParams::water().validate(), Ok(()));
        assert_eq!(FluidParams::dam_break().validate(), Ok(()));
    }

    #[test]
    fn test_particle_count_matches_lattice() {
        let params = FluidParams::default()
            .with_particle_radius(0.1)
            .with_kernel_range(0.3)
            .with_spawn_region(Vec3::ZERO, Vec3::new(0.4, 0.4, 0.2));

        assert_eq!(params.lattice_dims(), UVec3::new(2, 2, 1));
        assert_eq!(params.particle_count(), 4);
    }

    #[test]
    fn test_partial_layers_are_dropped() {
        let params = FluidParams::default()
            .with_particle_radius(0.1)
            .with_kernel_range(0.3)
            .with_spawn_region(Vec3::ZERO, Vec3::new(0.59, 0.41, 0.2));

        assert_eq!(params.lattice_dims(), UVec3::new(2, 2, 1));
    }

    #[test]
    fn test_empty_spawn_region_is_rejected() {
        let params = FluidParams::default().with_spawn_region(Vec3::ZERO, Vec3::new(1.0, 0.05, 1.0));
        assert!(matches!(
            params.validate(),
            Err(ConfigError::EmptySpawnRegion { .. })
        ));

        let inverted = FluidParams::default().with_spawn_region(Vec3::ONE, Vec3::ZERO);
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::EmptySpawnRegion { .. })
        ));
    }

    #[test]
    fn test_non_positive_sizes_are_rejected() {
        let cases = [
            FluidParams::default().with_kernel_range(0.0),
            FluidParams::default().with_particle_radius(-0.1),
            FluidParams::default().with_rest_density(0.0),
            FluidParams::default().with_timestep(0.0),
        ];
        for params in cases {
            assert!(matches!(
                params.validate(),
                Err(ConfigError::NonPositive { .. })
            ));
        }

        assert_eq!(
            FluidParams::default().with_timestep(f32::NAN).validate(),
            Err(ConfigError::NonFinite { name: "timestep" })
        );
    }

    #[test]
    fn test_zero_wall_normal_is_rejected() {
        let params = FluidParams::default().with_walls(vec![
            Wall::new(Vec3::Y, Vec3::ZERO),
            Wall::new(Vec3::ZERO, Vec3::ONE),
        ]);
        assert_eq!(
            params.validate(),
            Err(ConfigError::ZeroWallNormal { index: 1 })
        );
    }

    #[test]
    fn test_kernel_must_cover_diameter() {
        let params = FluidParams::default()
            .with_particle_radius(0.1)
            .with_kernel_range(0.15);
        assert!(matches!(
            params.validate(),
            Err(ConfigError::KernelTooSmall { .. })
        ));
    }

    #[test]
    fn test_hash_cell_must_cover_kernel() {
        let params = FluidParams::default()
            .with_neighbor_search(NeighborSearchKind::SparseHash { cell_size: 0.1 });
        assert!(matches!(
            params.validate(),
            Err(ConfigError::HashCellTooSmall { .. })
        ));
    }

    #[test]
    fn test_degenerate_grid_is_rejected() {
        let params = FluidParams::default().with_grid_bounds(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0));
        assert!(matches!(
            params.validate(),
            Err(ConfigError::DegenerateGrid { .. })
        ));
    }

    #[test]
    fn test_from_ron_fills_defaults() {
        let params = FluidParams::from_ron(
            "(particle_radius: 0.1, kernel_range: 0.3, solver_iterations: 2, neighbor_search: SparseHash(cell_size: 0.5))",
        )
        .unwrap();

        assert_eq!(params.particle_radius, 0.1);
        assert_eq!(params.solver_iterations, 2);
        assert_eq!(params.max_neighbors, MAX_NEIGHBORS);
        assert_eq!(
            params.neighbor_search,
            NeighborSearchKind::SparseHash { cell_size: 0.5 }
        );
    }

    #[test]
    fn test_from_ron_reports_parse_errors() {
        assert!(matches!(
            FluidParams::from_ron("(particle_radius: )"),
            Err(ConfigError::Parse(_))
        ));
    }
}
