//! Two-stage anisotropic gridder.
//!
//! [`AnisotropicGridder::grid_nearest`] fills every voxel from its nearest
//! known sample under the tensor metric and records the distance.
//! [`AnisotropicGridder::grid_blended`] then relaxes that piecewise-constant
//! fill toward a smooth field that honors the tensors, with the amount of
//! smoothing growing with distance from the samples.

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::blended::{solve_blended, BlendingOperator, CgSettings};
use crate::error::{ensure_same_shape, GridError, GridResult};
use crate::float_trait::GridFloat;
use crate::inserter::SparseGrid;
use crate::nearest::nearest_fill;
use crate::tensors::EigenTensors3;

// =============================================================================
// Constants
// =============================================================================

/// Default lower bound on tensor eigenvalues accepted by the gridder
const DEFAULT_EPSILON: f64 = 1e-3;

/// Default global smoothness for blending
const DEFAULT_SMOOTHNESS: f64 = 1.0;

/// Default clip applied to distances before blending
const DEFAULT_MAX_DISTANCE: f64 = 50.0;

/// Default conjugate-gradient iteration cap
const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Default relative residual at which conjugate gradients stop
const DEFAULT_TOLERANCE: f64 = 1e-4;

// =============================================================================
// Types
// =============================================================================

/// Configuration for [`AnisotropicGridder`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendingConfig {
    /// Smallest admissible tensor eigenvalue. Default: 1e-3
    pub epsilon: f64,
    /// Global smoothness `lambda`. Default: 1.0
    pub smoothness: f64,
    /// Distances are clipped to `[0, max_distance]` before blending. Default: 50.0
    pub max_distance: f64,
    /// Conjugate-gradient iteration cap. Default: 1000
    pub max_iterations: usize,
    /// Relative residual stopping threshold. Default: 1e-4
    pub tolerance: f64,
}

impl Default for BlendingConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            smoothness: DEFAULT_SMOOTHNESS,
            max_distance: DEFAULT_MAX_DISTANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl BlendingConfig {
    pub fn validate(&self) -> GridResult<()> {
        if !(self.epsilon > 0.0 && self.epsilon <= 1.0) {
            return Err(GridError::InvalidConfig(format!(
                "epsilon must be in (0, 1], got {}",
                self.epsilon
            )));
        }
        if !(self.smoothness >= 0.0 && self.smoothness.is_finite()) {
            return Err(GridError::InvalidConfig(format!(
                "smoothness must be finite and >= 0, got {}",
                self.smoothness
            )));
        }
        if !(self.max_distance > 0.0) {
            return Err(GridError::InvalidConfig(format!(
                "max_distance must be > 0, got {}",
                self.max_distance
            )));
        }
        if self.max_iterations == 0 {
            return Err(GridError::InvalidConfig(
                "max_iterations must be > 0".to_string(),
            ));
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(GridError::InvalidConfig(format!(
                "tolerance must be in (0, 1), got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Output of nearest-sample gridding.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestGrid<F: GridFloat> {
    /// Value of the nearest sample.
    pub values: Array3<F>,
    /// Tensor-weighted distance to that sample, in voxel units.
    pub distance: Array3<F>,
    /// Linear index `i1 + n1*(i2 + n2*i3)` of that sample.
    pub sources: Array3<usize>,
}

impl<F: GridFloat> NearestGrid<F> {
    /// Distance clipped to `[0, max]`.
    pub fn clipped_distance(&self, max: f64) -> Array3<F> {
        clip_distance(self.distance.view(), max)
    }
}

/// Convergence record of the blended solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    pub relative_residual: f64,
    pub converged: bool,
    /// Voxels solved for; the rest are sample voxels held fixed.
    pub free_voxels: usize,
}

/// Output of blended gridding.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendedGrid<F: GridFloat> {
    pub values: Array3<F>,
    pub report: SolveReport,
}

fn clip_distance<F: GridFloat>(distance: ArrayView3<F>, max: f64) -> Array3<F> {
    let hi = F::from_f64_c(max);
    distance.mapv(|t| {
        if t.is_nan() {
            hi
        } else {
            t.max(F::zero()).min(hi)
        }
    })
}

// =============================================================================
// Gridder
// =============================================================================

/// Tensor-guided gridder over a fixed tensor field.
#[derive(Debug, Clone)]
pub struct AnisotropicGridder<F: GridFloat> {
    tensors: EigenTensors3<F>,
    config: BlendingConfig,
}

impl<F: GridFloat> AnisotropicGridder<F> {
    /// Take ownership of `tensors`, rejecting any eigenvalue outside
    /// `[config.epsilon, 1]`.
    pub fn new(tensors: EigenTensors3<F>, config: BlendingConfig) -> GridResult<Self> {
        config.validate()?;
        tensors.ensure_well_conditioned(config.epsilon)?;
        Ok(Self { tensors, config })
    }

    pub fn tensors(&self) -> &EigenTensors3<F> {
        &self.tensors
    }

    pub fn config(&self) -> &BlendingConfig {
        &self.config
    }

    pub fn into_tensors(self) -> EigenTensors3<F> {
        self.tensors
    }

    /// Global smoothness used by the next [`grid_blended`](Self::grid_blended).
    pub fn set_smoothness(&mut self, smoothness: f64) -> GridResult<()> {
        if !(smoothness >= 0.0 && smoothness.is_finite()) {
            return Err(GridError::InvalidConfig(format!(
                "smoothness must be finite and >= 0, got {smoothness}"
            )));
        }
        self.config.smoothness = smoothness;
        Ok(())
    }

    /// Fill every voxel from the nearest known voxel of `sparse`.
    pub fn grid_nearest(&self, sparse: &SparseGrid<F>) -> GridResult<NearestGrid<F>> {
        nearest_fill(&self.tensors, sparse)
    }

    /// Nearest fill treating voxels of `volume` equal to `null` as empty.
    pub fn grid_nearest_null(
        &self,
        null: F,
        volume: ArrayView3<F>,
    ) -> GridResult<NearestGrid<F>> {
        self.grid_nearest(&SparseGrid::from_sentinel(null, volume))
    }

    /// Blend the nearest-fill `seed` using the distance volume `distance`.
    ///
    /// Voxels with zero distance keep their seed value. Non-convergence is
    /// reported in [`SolveReport`] and logged; the best estimate is
    /// returned.
    pub fn grid_blended(
        &self,
        distance: ArrayView3<F>,
        seed: ArrayView3<F>,
    ) -> GridResult<BlendedGrid<F>> {
        let shape = self.tensors.shape();
        ensure_same_shape("blending distance vs tensors", shape, distance.dim())?;
        ensure_same_shape("blending seed vs tensors", shape, seed.dim())?;

        let distance = clip_distance(distance, self.config.max_distance);
        let operator =
            BlendingOperator::new(&self.tensors, distance.view(), self.config.smoothness);
        let seed: Vec<f64> = seed.iter().map(|x| x.as_f64()).collect();
        let (solution, report) = solve_blended(
            &operator,
            &seed,
            CgSettings {
                max_iterations: self.config.max_iterations,
                tolerance: self.config.tolerance,
            },
        );

        if report.converged {
            log::debug!(
                "AnisotropicGridder::grid_blended: converged in {} iterations (residual {:.3e}, {} free voxels)",
                report.iterations,
                report.relative_residual,
                report.free_voxels
            );
        } else {
            log::warn!(
                "AnisotropicGridder::grid_blended: no convergence after {} iterations (residual {:.3e} > {:.3e})",
                report.iterations,
                report.relative_residual,
                self.config.tolerance
            );
        }

        let (_, n2, n1) = shape;
        let values = Array3::from_shape_fn(shape, |(i3, i2, i1)| {
            F::from_f64_c(solution[i1 + n1 * (i2 + n2 * i3)])
        });
        Ok(BlendedGrid { values, report })
    }
}
