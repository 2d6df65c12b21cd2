use bevy::prelude::*;
use proptest::prelude::*;
use tidepool::prelude::*;

fn point() -> impl Strategy<Value = Vec3> {
    (-0.5f32..1.5, -0.5f32..1.5, -0.5f32..1.5).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn brute_force(positions: &[Vec3], index: usize, range: f32) -> Vec<usize> {
    (0..positions.len())
        .filter(|&j| j != index && (positions[j] - positions[index]).length_squared() < range * range)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn grid_and_hash_find_every_neighbor(
        positions in prop::collection::vec(point(), 1..120),
        range in 0.1f32..0.5,
        parallel in any::<bool>(),
    ) {
        // The grid only covers part of the cloud; outside points are clamped.
        let mut grid = UniformGrid::new(GridConfig::for_domain(Vec3::ZERO, Vec3::ONE, range));
        let mut hash = SparseHash::new(range);
        grid.rebuild(&positions, parallel);
        hash.rebuild(&positions, parallel);

        let mut list = NeighborList::with_capacity(positions.len());
        for i in 0..positions.len() {
            let expected = brute_force(&positions, i, range);

            grid.query(i, &positions, range, &mut list);
            prop_assert_eq!(list.indices().collect::<Vec<_>>(), expected.clone());

            hash.query(i, &positions, range, &mut list);
            prop_assert_eq!(list.indices().collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn neighbor_list_keeps_the_closest(
        distances in prop::collection::vec(0.0f32..1.0, 0..40),
        capacity in 1usize..10,
    ) {
        let mut list = NeighborList::with_capacity(capacity);
        let mut dropped = false;
        for (j, d) in distances.iter().enumerate() {
            dropped |= list.offer(j, *d);
        }

        prop_assert_eq!(list.len(), distances.len().min(capacity));
        prop_assert_eq!(dropped, distances.len() > capacity);

        // Nothing kept is farther than anything dropped.
        let kept_max = list.indices().map(|j| distances[j]).fold(0.0f32, f32::max);
        for (j, d) in distances.iter().enumerate() {
            if !list.contains(j) {
                prop_assert!(*d >= kept_max);
            }
        }
    }

    #[test]
    fn simulation_never_produces_nan(
        radius in 0.03f32..0.08,
        kernel_factor in 2.0f32..4.5,
        extent in (0.1f32..0.35, 0.1f32..0.35, 0.1f32..0.35),
        iterations in 1u32..6,
        epsilon_exp in -6i32..0,
        unilateral in any::<bool>(),
        parallel in any::<bool>(),
    ) {
        let spacing = 2.0 * radius;
        let extent = Vec3::new(extent.0, extent.1, extent.2).max(Vec3::splat(spacing));
        let params = FluidParams::default()
            .with_particle_radius(radius)
            .with_kernel_range(kernel_factor * radius)
            .with_spawn_region(Vec3::splat(0.1), Vec3::splat(0.1) + extent)
            .with_solver_iterations(iterations)
            .with_relaxation_epsilon(10f32.powi(epsilon_exp))
            .with_unilateral_density(unilateral)
            .with_walls(Wall::open_box(Vec3::ZERO, Vec3::splat(0.6)))
            .with_execution(if parallel { ExecutionMode::Parallel } else { ExecutionMode::Serial });
        let mut simulation = SimulationStepper::new(params).unwrap();

        for _ in 0..10 {
            let stats = simulation.step();
            prop_assert!(stats.avg_density_error.is_finite());
        }
        prop_assert!(simulation.positions().iter().all(|p| p.is_finite()));
        prop_assert!(simulation.velocities().iter().all(|v| v.is_finite()));
    }
}
