//! PBF (Position Based Fluids) density constraint solver.
//!
//! Implements the relaxation of "Position Based Fluids" by Macklin & Müller
//! (2013): poly6 for density, spiky gradient for the constraint gradient and
//! an optional artificial pressure term against tensile instability.
//!
//! Every iteration is Jacobi style. Lambdas are computed from the predicted
//! positions of the previous iteration, corrections are written into a second
//! buffer and the buffers are swapped once all particles are done, so the
//! result does not depend on the order particles are visited in.

use bevy::prelude::*;
use rayon::prelude::*;

use super::params::{FluidParams, TensileCorrection};
use super::particle::NeighborList;

/// SPH kernel functions with precomputed normalization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphKernels {
    h: f32,
    h_sq: f32,
    poly6_coeff: f32,
    spiky_grad_coeff: f32,
}

impl SphKernels {
    pub fn new(h: f32) -> Self {
        Self {
            h,
            h_sq: h * h,
            poly6_coeff: 315.0 / (64.0 * std::f32::consts::PI * h.powi(9)),
            spiky_grad_coeff: -45.0 / (std::f32::consts::PI * h.powi(6)),
        }
    }

    pub fn kernel_range(&self) -> f32 {
        self.h
    }

    /// Poly6 kernel for density estimation.
    /// W(r, h) = (315 / 64πh⁹) * (h² - r²)³ for r < h
    #[inline]
    pub fn poly6(&self, r_sq: f32) -> f32 {
        if r_sq >= self.h_sq {
            return 0.0;
        }
        let diff = self.h_sq - r_sq;
        self.poly6_coeff * diff * diff * diff
    }

    /// Gradient of the spiky kernel with respect to `r = p_i - p_j`.
    /// ∇W(r, h) = -(45 / πh⁶) * (h - |r|)² * (r / |r|) for r < h
    ///
    /// Zero for coincident particles, where the direction is undefined.
    #[inline]
    pub fn spiky_gradient(&self, r: Vec3) -> Vec3 {
        let r_len = r.length();
        if r_len >= self.h || r_len < 1e-6 {
            return Vec3::ZERO;
        }
        let diff = self.h - r_len;
        self.spiky_grad_coeff * diff * diff * (r / r_len)
    }
}

/// Artificial pressure `s_corr = -k * (W(r) / W(Δq))^n`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArtificialPressure {
    strength: f32,
    exponent: i32,
    inv_reference: f32,
}

impl ArtificialPressure {
    /// `None` when the correction is disabled or its reference kernel value
    /// vanishes (`delta_q >= 1`).
    pub fn new(tensile: &TensileCorrection, kernels: &SphKernels) -> Option<Self> {
        if !tensile.is_enabled() {
            return None;
        }
        let dq = tensile.delta_q * kernels.kernel_range();
        let reference = kernels.poly6(dq * dq);
        (reference > 0.0).then(|| Self {
            strength: tensile.strength,
            exponent: tensile.exponent,
            inv_reference: 1.0 / reference,
        })
    }

    /// Correction for a pair with kernel value `w`.
    #[inline]
    pub fn scorr(&self, w: f32) -> f32 {
        -self.strength * (w * self.inv_reference).powi(self.exponent)
    }
}

/// Convergence measures of one solver iteration, taken from the positions
/// the iteration started with.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IterationReport {
    /// Largest `|C_i|` the solver acts on. With unilateral clamping only
    /// compression counts.
    pub max_constraint: f32,
    /// Mean `|rho_i / rho_0 - 1|`.
    pub avg_density_error: f32,
}

/// Per-particle terms, shared read-only by the workers of a stage.
#[derive(Clone, Copy, Debug)]
struct ConstraintTerms {
    kernels: SphKernels,
    mass: f32,
    rest_density: f32,
    epsilon: f32,
    unilateral: bool,
    pressure: Option<ArtificialPressure>,
}

impl ConstraintTerms {
    /// Density constraint `C_i` and multiplier `lambda_i` of one particle.
    fn constraint_and_lambda(&self, i: usize, predicted: &[Vec3], neighbors: &NeighborList) -> (f32, f32) {
        let p_i = predicted[i];

        // Isolated: zero density, no gradient. Epsilon keeps lambda finite.
        let constraint = if neighbors.is_empty() {
            -1.0
        } else {
            let mut density = self.mass * self.kernels.poly6(0.0);
            for j in neighbors.indices() {
                density += self.mass * self.kernels.poly6((p_i - predicted[j]).length_squared());
            }
            density / self.rest_density - 1.0
        };

        let scale = self.mass / self.rest_density;
        let mut sum_grad_sq = 0.0;
        let mut grad_i = Vec3::ZERO;
        for j in neighbors.indices() {
            let grad_j = scale * self.kernels.spiky_gradient(p_i - predicted[j]);
            sum_grad_sq += grad_j.length_squared();
            grad_i += grad_j;
        }
        sum_grad_sq += grad_i.length_squared();

        let driving = if self.unilateral {
            constraint.max(0.0)
        } else {
            constraint
        };
        (constraint, -driving / (sum_grad_sq + self.epsilon))
    }

    /// Position correction `delta_i` of one particle.
    fn correction(&self, i: usize, predicted: &[Vec3], lambdas: &[f32], neighbors: &NeighborList) -> Vec3 {
        let p_i = predicted[i];
        let lambda_i = lambdas[i];
        let scale = self.mass / self.rest_density;

        let mut delta = Vec3::ZERO;
        for j in neighbors.indices() {
            let r = p_i - predicted[j];
            let scorr = match &self.pressure {
                Some(pressure) => pressure.scorr(self.kernels.poly6(r.length_squared())),
                None => 0.0,
            };
            delta += (lambda_i + lambdas[j] + scorr) * self.kernels.spiky_gradient(r);
        }
        scale * delta
    }

    fn driving_constraint(&self, constraint: f32) -> f32 {
        if self.unilateral {
            constraint.max(0.0)
        } else {
            constraint.abs()
        }
    }
}

/// Density constraint relaxation with its scratch buffers.
#[derive(Debug)]
pub struct ConstraintSolver {
    terms: ConstraintTerms,
    /// `C_i` of the latest iteration.
    constraints: Vec<f32>,
    /// Write buffer for corrected predicted positions.
    next: Vec<Vec3>,
}

impl ConstraintSolver {
    pub fn new(params: &FluidParams) -> Self {
        let kernels = SphKernels::new(params.kernel_range);
        Self {
            terms: ConstraintTerms {
                kernels,
                mass: params.particle_mass(),
                rest_density: params.rest_density,
                epsilon: params.relaxation_epsilon,
                unilateral: params.unilateral_density,
                pressure: ArtificialPressure::new(&params.tensile, &kernels),
            },
            constraints: Vec::new(),
            next: Vec::new(),
        }
    }

    pub fn kernels(&self) -> &SphKernels {
        &self.terms.kernels
    }

    /// Constraint values computed by the latest iteration.
    pub fn constraints(&self) -> &[f32] {
        &self.constraints
    }

    /// Runs one relaxation iteration over all particles.
    ///
    /// Reads `predicted` as left by the previous iteration, overwrites
    /// `lambdas` and replaces `predicted` with the corrected positions.
    pub fn iterate(
        &mut self,
        predicted: &mut Vec<Vec3>,
        lambdas: &mut [f32],
        neighbors: &[NeighborList],
        parallel: bool,
    ) -> IterationReport {
        let n = predicted.len();
        if n == 0 {
            return IterationReport::default();
        }
        self.constraints.resize(n, 0.0);
        self.next.resize(n, Vec3::ZERO);

        let terms = &self.terms;
        let positions = predicted.as_slice();

        // Lambdas from iteration t positions.
        let lambda_pass = |(i, (constraint, lambda)): (usize, (&mut f32, &mut f32))| {
            (*constraint, *lambda) = terms.constraint_and_lambda(i, positions, &neighbors[i]);
        };
        if parallel {
            self.constraints
                .par_iter_mut()
                .zip(lambdas.par_iter_mut())
                .enumerate()
                .for_each(lambda_pass);
        } else {
            self.constraints
                .iter_mut()
                .zip(lambdas.iter_mut())
                .enumerate()
                .for_each(lambda_pass);
        }

        // Corrections into the second buffer.
        let lambdas = &*lambdas;
        let correction_pass = |(i, next): (usize, &mut Vec3)| {
            *next = positions[i] + terms.correction(i, positions, lambdas, &neighbors[i]);
        };
        if parallel {
            self.next.par_iter_mut().enumerate().for_each(correction_pass);
        } else {
            self.next.iter_mut().enumerate().for_each(correction_pass);
        }

        std::mem::swap(predicted, &mut self.next);

        let mut report = IterationReport::default();
        for &constraint in &self.constraints {
            report.max_constraint = report.max_constraint.max(terms.driving_constraint(constraint));
            report.avg_density_error += constraint.abs();
        }
        report.avg_density_error /= n as f32;
        report
    }
}
