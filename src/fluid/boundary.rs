//! Planar boundaries and collision response.
//!
//! Every boundary is a half-space `dot(normal, p - anchor) >= 0`. Walls are
//! configured once, normalized into a [`WallSet`] and applied in their
//! configured order after each solver iteration.

use bevy::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// An infinite plane bounding the fluid.
///
/// The normal points into the allowed side. It does not need to be unit
/// length here; [`WallSet::new`] normalizes it.
#[derive(Clone, Copy, Debug, PartialEq, Reflect, Serialize, Deserialize)]
pub struct Wall {
    pub normal: Vec3,
    pub anchor: Vec3,
}

impl Wall {
    pub fn new(normal: Vec3, anchor: Vec3) -> Self {
        Self { normal, anchor }
    }

    /// Horizontal floor at the given height.
    pub fn floor(height: f32) -> Self {
        Self::new(Vec3::Y, Vec3::new(0.0, height, 0.0))
    }

    /// Floor plus four side walls of an axis-aligned container, no lid.
    pub fn open_box(min: Vec3, max: Vec3) -> Vec<Wall> {
        vec![
            Wall::new(Vec3::Y, min),
            Wall::new(Vec3::X, min),
            Wall::new(Vec3::NEG_X, max),
            Wall::new(Vec3::Z, min),
            Wall::new(Vec3::NEG_Z, max),
        ]
    }

    /// Signed distance to the plane, positive on the allowed side.
    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point - self.anchor)
    }

    /// Projects a penetrating point back onto the plane and adds the matching
    /// velocity change over `dt`. Returns whether a correction happened.
    ///
    /// Assumes a unit normal.
    #[inline]
    pub fn collide(&self, position: &mut Vec3, velocity: &mut Vec3, dt: f32) -> bool {
        let sdf = self.signed_distance(*position);
        if sdf >= 0.0 {
            return false;
        }

        let corrected = *position - sdf * self.normal;
        *velocity += (corrected - *position) / dt;
        *position = corrected;
        true
    }
}

/// Immutable, validated walls in application order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WallSet {
    walls: Vec<Wall>,
}

impl WallSet {
    /// Normalizes every wall normal. Fails on a zero normal.
    pub fn new(walls: &[Wall]) -> Result<Self, ConfigError> {
        let walls = walls
            .iter()
            .enumerate()
            .map(|(index, wall)| {
                let normal = wall
                    .normal
                    .try_normalize()
                    .ok_or(ConfigError::ZeroWallNormal { index })?;
                Ok(Wall::new(normal, wall.anchor))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { walls })
    }

    pub fn len(&self) -> usize {
        self.walls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.walls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Wall> {
        self.walls.iter()
    }

    /// Applies every wall in order to one particle. Later walls may push the
    /// particle back through an earlier one; the next solver iteration repeats
    /// the pass.
    #[inline]
    pub fn collide(&self, position: &mut Vec3, velocity: &mut Vec3, dt: f32) -> bool {
        let mut hit = false;
        for wall in &self.walls {
            hit |= wall.collide(position, velocity, dt);
        }
        hit
    }

    /// Smallest signed distance over all walls, `f32::INFINITY` without walls.
    pub fn min_signed_distance(&self, point: Vec3) -> f32 {
        self.walls
            .iter()
            .map(|wall| wall.signed_distance(point))
            .fold(f32::INFINITY, f32::min)
    }
}

/// Collision stage: clamps predicted positions and corrects velocities.
pub struct CollisionResolver;

impl CollisionResolver {
    /// Resolves every particle against every wall and marks the particles
    /// whose velocity was set by a collision. Returns the number of particles
    /// corrected in this pass.
    pub fn resolve(
        walls: &WallSet,
        predicted: &mut [Vec3],
        velocities: &mut [Vec3],
        collided: &mut [bool],
        dt: f32,
        parallel: bool,
    ) -> usize {
        if walls.is_empty() {
            return 0;
        }

        let resolve_one = |((position, velocity), flag): ((&mut Vec3, &mut Vec3), &mut bool)| {
            let hit = walls.collide(position, velocity, dt);
            *flag |= hit;
            usize::from(hit)
        };

        if parallel {
            predicted
                .par_iter_mut()
                .zip(velocities.par_iter_mut())
                .zip(collided.par_iter_mut())
                .map(resolve_one)
                .sum()
        } else {
            predicted
                .iter_mut()
                .zip(velocities.iter_mut())
                .zip(collided.iter_mut())
                .map(resolve_one)
                .sum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_signed_distance() {
        let floor = Wall::floor(0.0);

        assert_eq!(floor.signed_distance(Vec3::new(0.0, 1.0, 0.0)), 1.0);
        assert_eq!(floor.signed_distance(Vec3::new(0.0, -1.0, 0.0)), -1.0);
        assert_eq!(floor.signed_distance(Vec3::ZERO), 0.0);
    }

    #[test]
    fn test_wall_collision_projects_onto_plane() {
        let floor = Wall::floor(0.0);
        let dt = 0.1;

        let mut pos = Vec3::new(0.3, -0.2, 0.1);
        let mut vel = Vec3::new(1.0, -2.0, 0.0);
        assert!(floor.collide(&mut pos, &mut vel, dt));

        assert_eq!(pos, Vec3::new(0.3, 0.0, 0.1));
        // Velocity picks up the 0.2 correction over dt.
        assert!((vel - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_wall_ignores_allowed_side() {
        let floor = Wall::floor(0.0);
        let mut pos = Vec3::new(0.0, 0.5, 0.0);
        let mut vel = Vec3::new(0.0, -1.0, 0.0);

        assert!(!floor.collide(&mut pos, &mut vel, 0.1));
        assert_eq!(pos, Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(vel, Vec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_inclined_wall() {
        let walls = WallSet::new(&[Wall::new(Vec3::new(1.0, 1.0, 0.0), Vec3::ZERO)]).unwrap();
        let mut pos = Vec3::new(-1.0, 0.0, 0.0);
        let mut vel = Vec3::ZERO;

        assert!(walls.collide(&mut pos, &mut vel, 1.0));
        assert!(walls.min_signed_distance(pos).abs() < 1e-6);
        assert!((pos - Vec3::new(-0.5, 0.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_wall_set_normalizes() {
        let walls = WallSet::new(&[Wall::new(Vec3::new(0.0, 3.0, 0.0), Vec3::ZERO)]).unwrap();
        let wall = walls.iter().next().unwrap();
        assert_eq!(wall.normal, Vec3::Y);
    }

    #[test]
    fn test_wall_set_rejects_zero_normal() {
        assert_eq!(
            WallSet::new(&[Wall::floor(0.0), Wall::new(Vec3::ZERO, Vec3::ZERO)]),
            Err(ConfigError::ZeroWallNormal { index: 1 })
        );
    }

    #[test]
    fn test_corner_resolution_is_sequential() {
        let walls = WallSet::new(&Wall::open_box(Vec3::ZERO, Vec3::ONE)).unwrap();
        let mut pos = Vec3::new(-0.1, -0.2, 0.5);
        let mut vel = Vec3::ZERO;

        assert!(walls.collide(&mut pos, &mut vel, 1.0));
        assert_eq!(pos, Vec3::new(0.0, 0.0, 0.5));
        assert!(walls.min_signed_distance(pos) >= 0.0);
    }

    #[test]
    fn test_resolver_marks_collided_particles() {
        let walls = WallSet::new(&[Wall::floor(0.0)]).unwrap();
        let mut predicted = vec![Vec3::new(0.0, -0.1, 0.0), Vec3::new(0.0, 0.1, 0.0)];
        let mut velocities = vec![Vec3::ZERO; 2];
        let mut collided = vec![false; 2];

        for parallel in [false, true] {
            collided.fill(false);
            predicted[0].y = -0.1;
            let hits = CollisionResolver::resolve(
                &walls,
                &mut predicted,
                &mut velocities,
                &mut collided,
                0.1,
                parallel,
            );
            assert_eq!(hits, 1);
            assert_eq!(collided, vec![true, false]);
            assert_eq!(predicted[0].y, 0.0);
        }
    }
}
