//! Spatial indexing for neighbor search.
//!
//! Two interchangeable strategies bucket predicted positions by cell:
//!
//! - [`UniformGrid`]: a dense grid over a configured volume, built with a
//!   counting sort (count, prefix sum, scatter). Positions outside the volume
//!   are clamped to the nearest border cell.
//! - [`SparseHash`]: a map from cell coordinate to particle indices, for
//!   unbounded domains.
//!
//! Both answer queries over the 3×3×3 cell neighborhood and filter by actual
//! distance, so they produce the same neighbor sets. The index is rebuilt
//! from scratch each step and owned by the stepper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use bevy::prelude::*;
use rayon::prelude::*;

use super::params::{FluidParams, NeighborSearchKind};
use super::particle::NeighborList;

/// Offsets of the 3×3×3 cell neighborhood, own cell included.
pub fn neighbor_offsets() -> &'static [IVec3; 27] {
    static OFFSETS: [IVec3; 27] = {
        let mut offsets = [IVec3::ZERO; 27];
        let mut n = 0;
        let mut dx = -1;
        while dx <= 1 {
            let mut dy = -1;
            while dy <= 1 {
                let mut dz = -1;
                while dz <= 1 {
                    offsets[n] = IVec3::new(dx, dy, dz);
                    n += 1;
                    dz += 1;
                }
                dy += 1;
            }
            dx += 1;
        }
        offsets
    };
    &OFFSETS
}

/// Common interface of the bucketing strategies.
pub trait NeighborSearch {
    /// Rebuilds the buckets from the given positions.
    fn rebuild(&mut self, positions: &[Vec3], parallel: bool);

    /// Visits every particle bucketed in the cell neighborhood of `position`.
    fn for_each_candidate<F: FnMut(usize)>(&self, position: Vec3, visit: F);

    /// Fills `out` with the particles closer than `kernel_range` to particle
    /// `index`, excluding itself. Returns whether the list overflowed.
    fn query(
        &self,
        index: usize,
        positions: &[Vec3],
        kernel_range: f32,
        out: &mut NeighborList,
    ) -> bool {
        let position = positions[index];
        let range_sq = kernel_range * kernel_range;
        let mut truncated = false;

        out.clear();
        self.for_each_candidate(position, |j| {
            if j == index {
                return;
            }
            let dist_sq = (positions[j] - position).length_squared();
            if dist_sq < range_sq {
                truncated |= out.offer(j, dist_sq);
            }
        });
        out.sort_by_index();

        truncated
    }
}

/// Dimensions and placement of the dense grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridConfig {
    /// Edge length of a cell, the kernel range.
    pub cell_size: f32,
    /// Number of cells along each axis.
    pub grid_size: UVec3,
    /// Minimum corner of the grid.
    pub grid_origin: Vec3,
}

impl GridConfig {
    /// Covers `min..max` with cells of `cell_size`, at least one per axis.
    pub fn for_domain(min: Vec3, max: Vec3, cell_size: f32) -> Self {
        let size = (max - min).max(Vec3::ZERO);
        let grid_size = (size / cell_size).ceil().as_uvec3().max(UVec3::ONE);

        Self {
            cell_size,
            grid_size,
            grid_origin: min,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.grid_size.x as usize * self.grid_size.y as usize * self.grid_size.z as usize
    }

    /// Unclamped cell coordinate of a position.
    pub fn position_to_cell(&self, position: Vec3) -> IVec3 {
        ((position - self.grid_origin) / self.cell_size)
            .floor()
            .as_ivec3()
    }

    /// Cell coordinate of a position, clamped into the grid.
    pub fn clamped_cell(&self, position: Vec3) -> IVec3 {
        self.position_to_cell(position)
            .clamp(IVec3::ZERO, self.grid_size.as_ivec3() - IVec3::ONE)
    }

    pub fn is_valid_cell(&self, cell: IVec3) -> bool {
        cell.cmpge(IVec3::ZERO).all() && cell.cmplt(self.grid_size.as_ivec3()).all()
    }

    /// Flat index of a valid cell, x fastest.
    pub fn cell_index(&self, cell: IVec3) -> usize {
        let size = self.grid_size.as_ivec3();
        (cell.x + size.x * (cell.y + size.y * cell.z)) as usize
    }
}

/// Dense grid bucketed by counting sort.
#[derive(Debug)]
pub struct UniformGrid {
    config: GridConfig,
    /// Particles per cell.
    cell_counts: Vec<u32>,
    /// Exclusive end offset of each cell in `sorted`.
    cell_ends: Vec<u32>,
    /// Particle indices ordered by cell, ascending within a cell.
    sorted: Vec<usize>,
    /// Flat cell index of every particle.
    particle_cells: Vec<usize>,
    /// Shared counters for the parallel count and scatter passes.
    atomic_counts: Vec<AtomicU32>,
    /// Destination slot of every particle in `sorted`.
    slots: Vec<u32>,
}

impl UniformGrid {
    pub fn new(config: GridConfig) -> Self {
        let cells = config.cell_count();
        Self {
            config,
            cell_counts: vec![0; cells],
            cell_ends: vec![0; cells],
            sorted: Vec::new(),
            particle_cells: Vec::new(),
            atomic_counts: (0..cells).map(|_| AtomicU32::new(0)).collect(),
            slots: Vec::new(),
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Particle indices bucketed in a valid cell.
    pub fn cell_particles(&self, cell: IVec3) -> &[usize] {
        let c = self.config.cell_index(cell);
        let end = self.cell_ends[c] as usize;
        let start = end - self.cell_counts[c] as usize;
        &self.sorted[start..end]
    }

    fn build_serial(&mut self) {
        self.cell_counts.fill(0);
        for &c in &self.particle_cells {
            self.cell_counts[c] += 1;
        }
        prefix_sum(&self.cell_counts, &mut self.cell_ends);

        // Scatter in particle order keeps every cell ascending.
        let mut inserted = vec![0u32; self.cell_counts.len()];
        for (i, &c) in self.particle_cells.iter().enumerate() {
            let start = self.cell_ends[c] - self.cell_counts[c];
            self.sorted[(start + inserted[c]) as usize] = i;
            inserted[c] += 1;
        }
    }

    fn build_parallel(&mut self) {
        let counters = &self.atomic_counts;

        counters.par_iter().for_each(|count| count.store(0, Ordering::Relaxed));
        self.particle_cells.par_iter().for_each(|&c| {
            counters[c].fetch_add(1, Ordering::Relaxed);
        });
        for (count, atomic) in self.cell_counts.iter_mut().zip(counters.iter()) {
            *count = atomic.load(Ordering::Relaxed);
        }
        prefix_sum(&self.cell_counts, &mut self.cell_ends);

        // Reserve slots with per-cell insertion counters.
        counters.par_iter().for_each(|count| count.store(0, Ordering::Relaxed));
        let (cell_counts, cell_ends) = (&self.cell_counts, &self.cell_ends);
        self.slots.resize(self.particle_cells.len(), 0);
        self.slots
            .par_iter_mut()
            .zip(self.particle_cells.par_iter())
            .for_each(|(slot, &c)| {
                let start = cell_ends[c] - cell_counts[c];
                *slot = start + counters[c].fetch_add(1, Ordering::Relaxed);
            });
        for (i, &slot) in self.slots.iter().enumerate() {
            self.sorted[slot as usize] = i;
        }

        // Slot order depends on thread interleaving; restore index order.
        for (&count, &end) in self.cell_counts.iter().zip(self.cell_ends.iter()) {
            if count > 1 {
                self.sorted[(end - count) as usize..end as usize].sort_unstable();
            }
        }
    }
}

/// Inclusive prefix sum of the per-cell counts.
fn prefix_sum(counts: &[u32], ends: &mut [u32]) {
    let mut running = 0u32;
    for (end, &count) in ends.iter_mut().zip(counts) {
        running += count;
        *end = running;
    }
}

impl NeighborSearch for UniformGrid {
    fn rebuild(&mut self, positions: &[Vec3], parallel: bool) {
        let config = self.config;
        let cell_of = |position: &Vec3| config.cell_index(config.clamped_cell(*position));

        self.particle_cells.resize(positions.len(), 0);
        self.sorted.resize(positions.len(), 0);
        if parallel {
            self.particle_cells
                .par_iter_mut()
                .zip(positions.par_iter())
                .for_each(|(cell, position)| *cell = cell_of(position));
            self.build_parallel();
        } else {
            for (cell, position) in self.particle_cells.iter_mut().zip(positions) {
                *cell = cell_of(position);
            }
            self.build_serial();
        }
    }

    fn for_each_candidate<F: FnMut(usize)>(&self, position: Vec3, mut visit: F) {
        let cell = self.config.clamped_cell(position);
        for offset in neighbor_offsets() {
            let neighbor_cell = cell + *offset;
            if !self.config.is_valid_cell(neighbor_cell) {
                continue;
            }
            for &j in self.cell_particles(neighbor_cell) {
                visit(j);
            }
        }
    }
}

/// Sparse buckets keyed by cell coordinate.
///
/// Only occupied cells have a bucket. [`rebuild`](NeighborSearch::rebuild)
/// moves particles whose cell changed with [`remove`](Self::remove) and
/// [`insert`](Self::insert), so the map stays as large as the occupied region.
#[derive(Debug, Default)]
pub struct SparseHash {
    cell_size: f32,
    buckets: HashMap<IVec3, Vec<usize>>,
    /// Cell each particle was placed in by the last rebuild.
    placed: Vec<IVec3>,
}

impl SparseHash {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            ..default()
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn key(&self, position: Vec3) -> IVec3 {
        (position / self.cell_size).floor().as_ivec3()
    }

    /// Adds a particle to the bucket of its position.
    pub fn insert(&mut self, index: usize, position: Vec3) {
        self.insert_at(self.key(position), index);
    }

    /// Removes a particle from the bucket of its position. Returns whether it
    /// was found there.
    pub fn remove(&mut self, index: usize, position: Vec3) -> bool {
        self.remove_at(self.key(position), index)
    }

    fn insert_at(&mut self, key: IVec3, index: usize) {
        self.buckets.entry(key).or_default().push(index);
    }

    fn remove_at(&mut self, key: IVec3, index: usize) -> bool {
        let Some(bucket) = self.buckets.get_mut(&key) else {
            return false;
        };
        let Some(slot) = bucket.iter().position(|&j| j == index) else {
            return false;
        };
        bucket.remove(slot);
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        true
    }

    /// Number of particles currently bucketed.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of occupied cells.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl NeighborSearch for SparseHash {
    fn rebuild(&mut self, positions: &[Vec3], parallel: bool) {
        let keys: Vec<IVec3> = if parallel {
            positions.par_iter().map(|p| self.key(*p)).collect()
        } else {
            positions.iter().map(|p| self.key(*p)).collect()
        };

        let placed = std::mem::take(&mut self.placed);
        if placed.len() == keys.len() {
            for (i, (old, new)) in placed.iter().zip(&keys).enumerate() {
                if old != new {
                    self.remove_at(*old, i);
                    self.insert_at(*new, i);
                }
            }
        } else {
            self.buckets.clear();
            for (i, key) in keys.iter().enumerate() {
                self.insert_at(*key, i);
            }
        }
        self.placed = keys;
    }

    fn for_each_candidate<F: FnMut(usize)>(&self, position: Vec3, mut visit: F) {
        let cell = self.key(position);
        for offset in neighbor_offsets() {
            // Keys saturate for far-away positions.
            if let Some(bucket) = self.buckets.get(&cell.wrapping_add(*offset)) {
                for &j in bucket {
                    visit(j);
                }
            }
        }
    }
}

/// The spatial index owned by a simulation.
#[derive(Debug)]
pub enum SpatialIndex {
    Grid(UniformGrid),
    Hash(SparseHash),
}

impl SpatialIndex {
    pub fn from_params(params: &FluidParams) -> Self {
        match params.neighbor_search {
            NeighborSearchKind::UniformGrid => SpatialIndex::Grid(UniformGrid::new(
                GridConfig::for_domain(params.grid_min, params.grid_max, params.kernel_range),
            )),
            NeighborSearchKind::SparseHash { cell_size } => {
                SpatialIndex::Hash(SparseHash::new(cell_size))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpatialIndex::Grid(_) => "uniform grid",
            SpatialIndex::Hash(_) => "sparse hash",
        }
    }
}

impl NeighborSearch for SpatialIndex {
    fn rebuild(&mut self, positions: &[Vec3], parallel: bool) {
        match self {
            SpatialIndex::Grid(grid) => grid.rebuild(positions, parallel),
            SpatialIndex::Hash(hash) => hash.rebuild(positions, parallel),
        }
    }

    fn for_each_candidate<F: FnMut(usize)>(&self, position: Vec3, visit: F) {
        match self {
            SpatialIndex::Grid(grid) => grid.for_each_candidate(position, visit),
            SpatialIndex::Hash(hash) => hash.for_each_candidate(position, visit),
        }
    }
}

/// Neighbor search stage: refills every particle's list from the index.
/// Returns how many lists overflowed.
pub fn find_neighbors<S: NeighborSearch + Sync>(
    index: &S,
    positions: &[Vec3],
    kernel_range: f32,
    lists: &mut [NeighborList],
    parallel: bool,
) -> usize {
    if parallel {
        lists
            .par_iter_mut()
            .enumerate()
            .map(|(i, list)| usize::from(index.query(i, positions, kernel_range, list)))
            .sum()
    } else {
        lists
            .iter_mut()
            .enumerate()
            .map(|(i, list)| usize::from(index.query(i, positions, kernel_range, list)))
            .sum()
    }
}
