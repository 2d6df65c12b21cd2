//! Particle state and lattice spawning.
//!
//! Particles live in a structure of arrays indexed `0..N`. `N` is fixed when
//! the state is created; no stage adds, removes or reorders particles.

use bevy::prelude::*;

use super::params::FluidParams;

/// Bounded, duplicate-free neighbor list of one particle.
///
/// When full, a closer candidate replaces the farthest stored entry
/// (drop-farthest). A candidate exactly as far as the farthest entry is
/// rejected, so ties keep whatever was stored first.
#[derive(Clone, Debug, Default)]
pub struct NeighborList {
    entries: Vec<(usize, f32)>,
    capacity: usize,
}

impl NeighborList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.iter().any(|&(j, _)| j == index)
    }

    /// Offers a neighbor at squared distance `dist_sq`.
    ///
    /// Returns `true` when the list was at capacity and some candidate (this
    /// one or a stored one) had to be dropped. Duplicates are ignored.
    pub fn offer(&mut self, index: usize, dist_sq: f32) -> bool {
        if self.contains(index) {
            return false;
        }
        if !self.is_full() {
            self.entries.push((index, dist_sq));
            return false;
        }

        let farthest = self
            .entries
            .iter()
            .enumerate()
            .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .map(|(slot, &(_, d))| (slot, d));
        if let Some((slot, farthest_dist_sq)) = farthest {
            if dist_sq < farthest_dist_sq {
                self.entries[slot] = (index, dist_sq);
            }
        }
        true
    }

    /// Orders entries by particle index so later sums are reproducible.
    pub fn sort_by_index(&mut self) {
        self.entries.sort_unstable_by_key(|&(j, _)| j);
    }

    /// Neighbor indices in stored order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|&(j, _)| j)
    }
}

/// Per-particle simulation arrays.
#[derive(Clone, Debug, Default)]
pub struct ParticleState {
    /// Last committed positions. Only written at the end of a step.
    pub(crate) positions: Vec<Vec3>,
    /// Working positions during a step.
    pub(crate) predicted: Vec<Vec3>,
    pub(crate) velocities: Vec<Vec3>,
    /// Lagrange multipliers of the latest solver iteration.
    pub(crate) lambdas: Vec<f32>,
    pub(crate) neighbors: Vec<NeighborList>,
    /// Set when a wall changed the particle's velocity during this step.
    pub(crate) collided: Vec<bool>,
}

impl ParticleState {
    /// Creates resting particles at the given positions.
    pub fn from_positions(positions: Vec<Vec3>, max_neighbors: usize) -> Self {
        let n = positions.len();
        Self {
            predicted: positions.clone(),
            positions,
            velocities: vec![Vec3::ZERO; n],
            lambdas: vec![0.0; n],
            neighbors: vec![NeighborList::with_capacity(max_neighbors); n],
            collided: vec![false; n],
        }
    }

    /// Spawns the lattice described by the parameters.
    pub fn spawn(params: &FluidParams) -> Self {
        Self::from_positions(spawn_lattice(params), params.max_neighbors)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Committed positions, stable length.
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn predicted_positions(&self) -> &[Vec3] {
        &self.predicted
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    pub fn lambdas(&self) -> &[f32] {
        &self.lambdas
    }

    pub fn neighbors(&self, index: usize) -> &NeighborList {
        &self.neighbors[index]
    }

    /// Overrides one particle's velocity, e.g. to seed a scenario.
    pub fn set_velocity(&mut self, index: usize, velocity: Vec3) {
        self.velocities[index] = velocity;
    }

    /// Sets every particle's velocity.
    pub fn set_velocities(&mut self, velocity: Vec3) {
        self.velocities.fill(velocity);
    }
}

/// Positions of a regular lattice with spacing `2 * radius` filling the spawn
/// region. Sites sit at cell centers; index `i * ny * nz + j * nz + k`.
pub fn spawn_lattice(params: &FluidParams) -> Vec<Vec3> {
    let dims = params.lattice_dims();
    let spacing = params.particle_spacing();
    let mut positions = Vec::with_capacity(params.particle_count());

    for i in 0..dims.x {
        let x = params.spawn_min.x + (i as f32 + 0.5) * spacing;
        for j in 0..dims.y {
            let y = params.spawn_min.y + (j as f32 + 0.5) * spacing;
            for k in 0..dims.z {
                let z = params.spawn_min.z + (k as f32 + 0.5) * spacing;
                positions.push(Vec3::new(x, y, z));
            }
        }
    }

    positions
}
