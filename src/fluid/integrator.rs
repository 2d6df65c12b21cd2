//! External forces and position prediction.

use bevy::prelude::*;
use rayon::prelude::*;

/// Integration stage: semi-implicit Euler with gravity as the only force.
pub struct ForceIntegrator;

impl ForceIntegrator {
    /// `velocity += dt * gravity`, then `predicted = position + dt * velocity`.
    pub fn apply(
        positions: &[Vec3],
        velocities: &mut [Vec3],
        predicted: &mut [Vec3],
        gravity: Vec3,
        dt: f32,
        parallel: bool,
    ) {
        let integrate = |((velocity, predicted), position): ((&mut Vec3, &mut Vec3), &Vec3)| {
            *velocity += dt * gravity;
            *predicted = *position + dt * *velocity;
        };

        if parallel {
            velocities
                .par_iter_mut()
                .zip(predicted.par_iter_mut())
                .zip(positions.par_iter())
                .for_each(integrate);
        } else {
            velocities
                .iter_mut()
                .zip(predicted.iter_mut())
                .zip(positions.iter())
                .for_each(integrate);
        }
    }
}
