//! Fluid simulation core logic.
//!
//! [`SimulationStepper`] owns the particle state, the walls, the spatial index
//! and the solver, and runs the fixed per-step pipeline:
//!
//! 1. integrate gravity and predict positions
//! 2. rebuild the spatial index and refill the neighbor lists
//! 3. `K` solver iterations, each followed by collision resolution
//! 4. commit predicted positions and reconcile velocities
//!
//! Every stage completes for all particles before the next one starts. The
//! committed positions only change in the commit stage.

use bevy::prelude::*;
use rayon::prelude::*;

use super::boundary::{CollisionResolver, WallSet};
use super::error::ConfigError;
use super::integrator::ForceIntegrator;
use super::params::{ExecutionMode, FluidParams};
use super::particle::ParticleState;
use super::solver::{ConstraintSolver, IterationReport};
use super::spatial::{find_neighbors, NeighborSearch, SpatialIndex};

/// Where the stepper is within a step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StepPhase {
    #[default]
    Idle,
    Integrating,
    IndexBuilt,
    /// Solver iteration `0..K`.
    Solving(u32),
    Committing,
}

/// Measurements of the last completed step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepStats {
    /// Number of completed steps, this one included.
    pub step: u64,
    /// Neighbor lists that overflowed this step.
    pub truncated_neighbors: usize,
    /// Particle corrections made by walls, summed over solver iterations.
    pub collisions: usize,
    /// Largest driving constraint seen by the final solver iteration.
    pub max_constraint_error: f32,
    /// Mean relative density error seen by the final solver iteration.
    pub avg_density_error: f32,
}

/// Runs the simulation one fixed step at a time.
#[derive(Debug)]
pub struct SimulationStepper {
    params: FluidParams,
    walls: WallSet,
    particles: ParticleState,
    index: SpatialIndex,
    solver: ConstraintSolver,
    parallel: bool,
    phase: StepPhase,
    stats: StepStats,
    total_truncations: u64,
    phase_log: Option<Vec<StepPhase>>,
}

impl SimulationStepper {
    /// Validates the parameters and spawns the particle lattice.
    pub fn new(params: FluidParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let particles = ParticleState::spawn(&params);
        Self::assemble(params, particles)
    }

    /// Like [`new`](Self::new) but starts from explicit resting positions
    /// instead of the spawn lattice.
    pub fn with_positions(params: FluidParams, positions: Vec<Vec3>) -> Result<Self, ConfigError> {
        params.validate()?;
        if positions.is_empty() {
            return Err(ConfigError::EmptySpawnRegion {
                min: params.spawn_min,
                max: params.spawn_max,
                radius: params.particle_radius,
            });
        }
        let particles = ParticleState::from_positions(positions, params.max_neighbors);
        Self::assemble(params, particles)
    }

    fn assemble(params: FluidParams, particles: ParticleState) -> Result<Self, ConfigError> {
        let walls = WallSet::new(&params.walls)?;
        let index = SpatialIndex::from_params(&params);
        let solver = ConstraintSolver::new(&params);
        let parallel = params.execution == ExecutionMode::Parallel;

        info!(
            "Fluid simulation ready: {} particles, {} walls, {} neighbor search, {:?} execution",
            particles.len(),
            walls.len(),
            index.name(),
            params.execution,
        );

        Ok(Self {
            params,
            walls,
            particles,
            index,
            solver,
            parallel,
            phase: StepPhase::Idle,
            stats: StepStats::default(),
            total_truncations: 0,
            phase_log: None,
        })
    }

    pub fn params(&self) -> &FluidParams {
        &self.params
    }

    pub fn walls(&self) -> &WallSet {
        &self.walls
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Committed positions. Never changes except through a step.
    pub fn positions(&self) -> &[Vec3] {
        self.particles.positions()
    }

    pub fn velocities(&self) -> &[Vec3] {
        self.particles.velocities()
    }

    pub fn particles(&self) -> &ParticleState {
        &self.particles
    }

    /// Mutable access between steps, e.g. to seed velocities.
    pub fn particles_mut(&mut self) -> &mut ParticleState {
        &mut self.particles
    }

    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn solver(&self) -> &ConstraintSolver {
        &self.solver
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    pub fn stats(&self) -> &StepStats {
        &self.stats
    }

    /// Overflowed neighbor lists over the whole run.
    pub fn total_truncations(&self) -> u64 {
        self.total_truncations
    }

    /// Starts or stops recording every phase entered.
    pub fn record_phases(&mut self, enabled: bool) {
        self.phase_log = enabled.then(Vec::new);
    }

    /// Returns the recorded phases and clears the log.
    pub fn take_phase_log(&mut self) -> Vec<StepPhase> {
        self.phase_log.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Advances one step of the configured timestep.
    pub fn step(&mut self) -> StepStats {
        self.advance(self.params.timestep)
    }

    /// Advances one step of `dt`. Non-positive or non-finite values are
    /// rejected and leave the state unchanged.
    pub fn step_with_dt(&mut self, dt: f32) -> Option<StepStats> {
        if !(dt.is_finite() && dt > 0.0) {
            warn!("Skipping fluid step with invalid timestep {dt}");
            return None;
        }
        Some(self.advance(dt))
    }

    fn enter(&mut self, next: StepPhase) {
        trace!("Fluid step {}: {:?} -> {:?}", self.stats.step + 1, self.phase, next);
        self.phase = next;
        if let Some(log) = &mut self.phase_log {
            log.push(next);
        }
    }

    fn advance(&mut self, dt: f32) -> StepStats {
        let parallel = self.parallel;

        self.enter(StepPhase::Integrating);
        let particles = &mut self.particles;
        particles.collided.fill(false);
        ForceIntegrator::apply(
            &particles.positions,
            &mut particles.velocities,
            &mut particles.predicted,
            self.params.gravity,
            dt,
            parallel,
        );

        self.index.rebuild(&self.particles.predicted, parallel);
        let truncated = find_neighbors(
            &self.index,
            &self.particles.predicted,
            self.params.kernel_range,
            &mut self.particles.neighbors,
            parallel,
        );
        self.record_truncations(truncated);
        self.enter(StepPhase::IndexBuilt);

        let mut report = IterationReport::default();
        let mut collisions = 0;
        for iteration in 0..self.params.solver_iterations {
            self.enter(StepPhase::Solving(iteration));
            let particles = &mut self.particles;
            report = self.solver.iterate(
                &mut particles.predicted,
                &mut particles.lambdas,
                &particles.neighbors,
                parallel,
            );
            collisions += CollisionResolver::resolve(
                &self.walls,
                &mut particles.predicted,
                &mut particles.velocities,
                &mut particles.collided,
                dt,
                parallel,
            );
        }

        self.enter(StepPhase::Committing);
        commit(&mut self.particles, dt, parallel);
        self.enter(StepPhase::Idle);

        self.stats = StepStats {
            step: self.stats.step + 1,
            truncated_neighbors: truncated,
            collisions,
            max_constraint_error: report.max_constraint,
            avg_density_error: report.avg_density_error,
        };
        debug!(
            "Fluid step {}: density error {:.4} (max {:.4}), {} collisions, {} truncated neighbor lists",
            self.stats.step,
            self.stats.avg_density_error,
            self.stats.max_constraint_error,
            collisions,
            truncated,
        );

        self.stats
    }

    fn record_truncations(&mut self, truncated: usize) {
        if truncated > 0 && self.total_truncations == 0 {
            warn!(
                "Neighbor lists overflowed for {} particles; keeping the closest {} neighbors",
                truncated, self.params.max_neighbors
            );
        }
        self.total_truncations += truncated as u64;
    }
}

/// Commit stage: reconciles velocities from the position change of particles
/// no wall touched, then swaps the predicted buffer in as the committed one.
fn commit(particles: &mut ParticleState, dt: f32, parallel: bool) {
    let reconcile = |((velocity, collided), (predicted, position)): (
        (&mut Vec3, &bool),
        (&Vec3, &Vec3),
    )| {
        if !*collided {
            *velocity = (*predicted - *position) / dt;
        }
    };

    if parallel {
        particles
            .velocities
            .par_iter_mut()
            .zip(particles.collided.par_iter())
            .zip(particles.predicted.par_iter().zip(particles.positions.par_iter()))
            .for_each(reconcile);
    } else {
        particles
            .velocities
            .iter_mut()
            .zip(particles.collided.iter())
            .zip(particles.predicted.iter().zip(particles.positions.iter()))
            .for_each(reconcile);
    }

    std::mem::swap(&mut particles.positions, &mut particles.predicted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fluid::boundary::Wall;

    #[test]
    fn test_new_spawns_lattice() {
        let stepper = SimulationStepper::new(FluidParams::default()).unwrap();
        assert_eq!(stepper.particle_count(), 64);
        assert_eq!(stepper.phase(), StepPhase::Idle);
        assert_eq!(stepper.stats().step, 0);
    }

    #[test]
    fn test_new_rejects_invalid_params() {
        let params = FluidParams::default().with_walls(vec![Wall::new(Vec3::ZERO, Vec3::ZERO)]);
        assert_eq!(
            SimulationStepper::new(params).unwrap_err(),
            ConfigError::ZeroWallNormal { index: 0 }
        );

        let params = FluidParams::default().with_timestep(0.0);
        assert!(matches!(
            SimulationStepper::new(params),
            Err(ConfigError::NonPositive { name: "timestep", .. })
        ));
    }

    #[test]
    fn test_with_positions_rejects_empty() {
        assert!(matches!(
            SimulationStepper::with_positions(FluidParams::default(), Vec::new()),
            Err(ConfigError::EmptySpawnRegion { .. })
        ));
    }

    #[test]
    fn test_phase_order() {
        let params = FluidParams::default().with_solver_iterations(3);
        let mut stepper = SimulationStepper::new(params).unwrap();
        stepper.record_phases(true);

        stepper.step();

        assert_eq!(
            stepper.take_phase_log(),
            vec![
                StepPhase::Integrating,
                StepPhase::IndexBuilt,
                StepPhase::Solving(0),
                StepPhase::Solving(1),
                StepPhase::Solving(2),
                StepPhase::Committing,
                StepPhase::Idle,
            ]
        );
        assert_eq!(stepper.phase(), StepPhase::Idle);
        assert!(stepper.take_phase_log().is_empty());
    }

    #[test]
    fn test_invalid_dt_is_skipped() {
        let mut stepper = SimulationStepper::new(FluidParams::default()).unwrap();
        let before = stepper.positions().to_vec();

        assert!(stepper.step_with_dt(0.0).is_none());
        assert!(stepper.step_with_dt(-1.0).is_none());
        assert!(stepper.step_with_dt(f32::NAN).is_none());

        assert_eq!(stepper.positions(), before.as_slice());
        assert_eq!(stepper.stats().step, 0);

        assert_eq!(stepper.step_with_dt(0.01).map(|s| s.step), Some(1));
    }

    #[test]
    fn test_truncation_is_counted() {
        let params = FluidParams::default().with_max_neighbors(4);
        let mut stepper = SimulationStepper::new(params).unwrap();

        let first = stepper.step();
        assert!(first.truncated_neighbors > 0);
        assert!(stepper.particles().neighbors(0).len() <= 4);

        let second = stepper.step();
        assert_eq!(
            stepper.total_truncations(),
            (first.truncated_neighbors + second.truncated_neighbors) as u64
        );
    }

    #[test]
    fn test_floor_contact_projects_and_corrects_velocity() {
        let params = FluidParams::default()
            .with_gravity(Vec3::ZERO)
            .with_walls(vec![Wall::floor(0.0)]);
        let mut stepper =
            SimulationStepper::with_positions(params, vec![Vec3::new(0.0, 0.01, 0.0)]).unwrap();
        stepper.particles_mut().set_velocity(0, Vec3::new(0.0, -1.2, 0.0));

        let stats = stepper.step_with_dt(0.05).unwrap();

        // Predicted y = -0.05, projected back by 0.05 over dt.
        assert!(stats.collisions > 0);
        assert!(stepper.particles().collided[0]);
        assert_eq!(stepper.positions()[0].y, 0.0);
        assert!((stepper.velocities()[0].y + 0.2).abs() < 1e-5);
    }
}
