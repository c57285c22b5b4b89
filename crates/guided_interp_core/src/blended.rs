//! Blended interpolation: tensor-guided diffusion of a seed field.
//!
//! Solves `q - 0.5*lambda*div(t² D grad q) = p` where `p` is the nearest-fill
//! seed and `t` the distance to the nearest sample. Voxels with `t == 0`
//! are sample locations and stay fixed at `p`.
//!
//! The operator is `A = I + 0.25*lambda*(G₊ᵀ S G₊ + G₋ᵀ S G₋)` with `S = t² D`
//! and `G₊`/`G₋` forward/backward differences that exist only where the
//! neighbor exists. Restricted to the free voxels `A` is symmetric positive
//! definite, so conjugate gradients apply.

use ndarray::ArrayView3;
use rayon::prelude::*;

use crate::float_trait::GridFloat;
use crate::gridder::SolveReport;
use crate::tensors::EigenTensors3;

/// Chunk length for deterministic parallel reductions.
const REDUCTION_CHUNK: usize = 4096;

/// Sum of `a[i]*b[i]`, reduced in fixed-size chunks so the result does not
/// depend on thread count.
fn dot(a: &[f64], b: &[f64]) -> f64 {
    let partials: Vec<f64> = a
        .par_chunks(REDUCTION_CHUNK)
        .zip(b.par_chunks(REDUCTION_CHUNK))
        .map(|(x, y)| x.iter().zip(y).map(|(p, q)| p * q).sum::<f64>())
        .collect();
    partials.iter().sum()
}

/// `y += alpha * x`
fn axpy(y: &mut [f64], alpha: f64, x: &[f64]) {
    y.par_iter_mut()
        .zip(x.par_iter())
        .for_each(|(yi, &xi)| *yi += alpha * xi);
}

#[inline]
fn symmetric_apply(s: &[f64; 6], g: [f64; 3]) -> [f64; 3] {
    [
        s[0] * g[0] + s[1] * g[1] + s[2] * g[2],
        s[1] * g[0] + s[3] * g[1] + s[4] * g[2],
        s[2] * g[0] + s[4] * g[1] + s[5] * g[2],
    ]
}

/// Discretized blending operator on a flat voxel vector.
pub(crate) struct BlendingOperator {
    n1: usize,
    n2: usize,
    n3: usize,
    /// Per-voxel `0.25 * lambda * t² * D` coefficients.
    stiffness: Vec<[f64; 6]>,
    /// Voxels held at the seed value.
    fixed: Vec<bool>,
}

impl BlendingOperator {
    pub(crate) fn new<F: GridFloat>(
        tensors: &EigenTensors3<F>,
        distance: ArrayView3<F>,
        smoothness: f64,
    ) -> Self {
        let (n3, n2, n1) = tensors.shape();
        let scale = 0.25 * smoothness;
        let stiffness: Vec<[f64; 6]> = tensors
            .tensors()
            .iter()
            .zip(distance.iter())
            .map(|(tensor, &t)| {
                let t = t.as_f64();
                tensor.coefficients().map(|c| scale * t * t * c)
            })
            .collect();
        let fixed = distance.iter().map(|&t| t <= F::zero()).collect();
        Self {
            n1,
            n2,
            n3,
            stiffness,
            fixed,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.n1 * self.n2 * self.n3
    }

    pub(crate) fn free_count(&self) -> usize {
        self.fixed.iter().filter(|&&f| !f).count()
    }

    #[inline]
    fn coords(&self, j: usize) -> [usize; 3] {
        [
            j % self.n1,
            (j / self.n1) % self.n2,
            j / (self.n1 * self.n2),
        ]
    }

    #[inline]
    fn strides(&self) -> [usize; 3] {
        [1, self.n1, self.n1 * self.n2]
    }

    #[inline]
    fn extents(&self) -> [usize; 3] {
        [self.n1, self.n2, self.n3]
    }

    /// `y = A x`, with `flux_plus`/`flux_minus` as scratch.
    pub(crate) fn apply(
        &self,
        x: &[f64],
        flux_plus: &mut [[f64; 3]],
        flux_minus: &mut [[f64; 3]],
        y: &mut [f64],
    ) {
        let strides = self.strides();
        let extents = self.extents();

        flux_plus
            .par_iter_mut()
            .zip(flux_minus.par_iter_mut())
            .enumerate()
            .for_each(|(j, (fp, fm))| {
                let c = self.coords(j);
                let mut gp = [0.0; 3];
                let mut gm = [0.0; 3];
                for k in 0..3 {
                    if c[k] + 1 < extents[k] {
                        gp[k] = x[j + strides[k]] - x[j];
                    }
                    if c[k] > 0 {
                        gm[k] = x[j] - x[j - strides[k]];
                    }
                }
                *fp = symmetric_apply(&self.stiffness[j], gp);
                *fm = symmetric_apply(&self.stiffness[j], gm);
            });

        let flux_plus = &*flux_plus;
        let flux_minus = &*flux_minus;
        y.par_iter_mut().enumerate().for_each(|(j, yj)| {
            let c = self.coords(j);
            let mut acc = x[j];
            for k in 0..3 {
                if c[k] + 1 < extents[k] {
                    acc -= flux_plus[j][k];
                    acc -= flux_minus[j + strides[k]][k];
                }
                if c[k] > 0 {
                    acc += flux_plus[j - strides[k]][k];
                    acc += flux_minus[j][k];
                }
            }
            *yj = acc;
        });
    }

    /// Zero the fixed entries of `v`.
    fn project(&self, v: &mut [f64]) {
        v.par_iter_mut()
            .zip(self.fixed.par_iter())
            .for_each(|(x, &f)| {
                if f {
                    *x = 0.0;
                }
            });
    }
}

/// Conjugate-gradient stopping rule.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CgSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
}

/// Solve the blending system for `seed`, holding fixed voxels at the seed.
pub(crate) fn solve_blended(
    operator: &BlendingOperator,
    seed: &[f64],
    settings: CgSettings,
) -> (Vec<f64>, SolveReport) {
    let n = operator.len();
    let free_voxels = operator.free_count();
    if free_voxels == 0 {
        return (
            seed.to_vec(),
            SolveReport {
                iterations: 0,
                relative_residual: 0.0,
                converged: true,
                free_voxels,
            },
        );
    }

    let mut flux_plus = vec![[0.0; 3]; n];
    let mut flux_minus = vec![[0.0; 3]; n];
    let mut ap = vec![0.0; n];

    // Fixed part of the seed, zero on free voxels.
    let mut known = seed.to_vec();
    known
        .par_iter_mut()
        .zip(operator.fixed.par_iter())
        .for_each(|(x, &f)| {
            if !f {
                *x = 0.0;
            }
        });

    // b = P (p - A p_known)
    operator.apply(&known, &mut flux_plus, &mut flux_minus, &mut ap);
    let mut b: Vec<f64> = seed.iter().zip(&ap).map(|(p, a)| p - a).collect();
    operator.project(&mut b);
    let b_norm = dot(&b, &b).sqrt();
    let reference = if b_norm > 0.0 { b_norm } else { 1.0 };

    // Start from the seed on free voxels; r = P (p - A p).
    let mut x = seed.to_vec();
    operator.project(&mut x);
    operator.apply(seed, &mut flux_plus, &mut flux_minus, &mut ap);
    let mut r: Vec<f64> = seed.iter().zip(&ap).map(|(p, a)| p - a).collect();
    operator.project(&mut r);

    let mut p = r.clone();
    let mut rr = dot(&r, &r);
    let mut relative_residual = rr.sqrt() / reference;
    let mut iterations = 0;

    while relative_residual > settings.tolerance && iterations < settings.max_iterations {
        operator.apply(&p, &mut flux_plus, &mut flux_minus, &mut ap);
        operator.project(&mut ap);
        let pap = dot(&p, &ap);
        if !(pap > 0.0) {
            break;
        }
        let alpha = rr / pap;
        axpy(&mut x, alpha, &p);
        axpy(&mut r, -alpha, &ap);
        let rr_next = dot(&r, &r);
        let beta = rr_next / rr;
        p.par_iter_mut()
            .zip(r.par_iter())
            .for_each(|(pi, &ri)| *pi = ri + beta * *pi);
        rr = rr_next;
        relative_residual = rr.sqrt() / reference;
        iterations += 1;
    }

    let converged = relative_residual <= settings.tolerance;
    for (xi, ki) in x.iter_mut().zip(&known) {
        *xi += ki;
    }
    (
        x,
        SolveReport {
            iterations,
            relative_residual,
            converged,
            free_voxels,
        },
    )
}
