//! Structure tensors: per-voxel symmetric positive-definite 3x3 tensors.
//!
//! Each tensor is stored in eigen form: unit vectors `u` and `w` (with
//! `v = w x u`) and eigenvalues `(au, av, aw)`. Vector components are
//! ordered along volume axes `(1, 2, 3)`.
//!
//! [`LocalOrientFilter`] estimates tensors from image gradients, after
//! which eigenvalues are usually overwritten from independent confidence
//! measurements with [`EigenTensors3::scale_with_confidence`]. Eigenvectors
//! are never altered by eigenvalue updates.

use nalgebra::Matrix3;
use ndarray::{Array3, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_same_shape, GridError, GridResult};
use crate::float_trait::GridFloat;
use crate::mask::VolumeMask;
use crate::smoothing::{for_each_lane, gaussian_smooth_3d, AXIS_1, AXIS_2, AXIS_3};

/// Default smoothing half-width of gradient products along axis 1.
const DEFAULT_ORIENT_SIGMA: f64 = 8.0;

/// Default smoothing applied to the image before differencing.
const DEFAULT_GRADIENT_SIGMA: f64 = 1.0;

/// Default eigenvalue floor after confidence scaling.
const DEFAULT_EPSILON: f64 = 1e-3;

/// Default exponent applied to the second confidence volume.
const DEFAULT_V_EXPONENT: f64 = 4.0;

/// Default fill values for masked-out voxels of the three confidences.
const DEFAULT_CONFIDENCE_FILLS: [f64; 3] = [1.0, 1.0, 1e-4];

#[inline]
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn normalize(a: [f64; 3]) -> Option<[f64; 3]> {
    let n = dot(a, a).sqrt();
    if n > 1e-12 && n.is_finite() {
        Some([a[0] / n, a[1] / n, a[2] / n])
    } else {
        None
    }
}

/// Any unit vector perpendicular to unit vector `u`.
fn perpendicular(u: [f64; 3]) -> [f64; 3] {
    let axis = if u[0].abs() <= u[1].abs() && u[0].abs() <= u[2].abs() {
        [1.0, 0.0, 0.0]
    } else if u[1].abs() <= u[2].abs() {
        [0.0, 1.0, 0.0]
    } else {
        [0.0, 0.0, 1.0]
    };
    normalize(cross(u, axis)).unwrap_or([0.0, 0.0, 1.0])
}

/// One symmetric positive-definite tensor in eigen form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTensor<F: GridFloat> {
    u: [F; 3],
    w: [F; 3],
    eigenvalues: [F; 3],
}

impl<F: GridFloat> LocalTensor<F> {
    /// Build from eigenvectors `u`, `w` and eigenvalues `(au, av, aw)`.
    ///
    /// `u` is normalized and `w` is orthonormalized against it.
    /// Negative eigenvalues are clamped to zero.
    pub fn new(u: [f64; 3], w: [f64; 3], eigenvalues: [f64; 3]) -> Self {
        let u = normalize(u).unwrap_or([1.0, 0.0, 0.0]);
        let wu = dot(w, u);
        let w = normalize([w[0] - wu * u[0], w[1] - wu * u[1], w[2] - wu * u[2]])
            .unwrap_or_else(|| perpendicular(u));
        let cast = |a: [f64; 3]| a.map(F::from_f64_c);
        Self {
            u: cast(u),
            w: cast(w),
            eigenvalues: cast(eigenvalues.map(|e| e.max(0.0))),
        }
    }

    /// Identity tensor.
    pub fn identity() -> Self {
        Self::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0, 1.0])
    }

    /// Eigen-decompose coefficients `(a11, a12, a13, a22, a23, a33)`.
    ///
    /// `u` carries the largest eigenvalue and `w` the smallest; `u` is
    /// oriented so that its axis-1 component is non-negative.
    pub fn from_coefficients(c: [f64; 6]) -> Self {
        let m = Matrix3::new(c[0], c[1], c[2], c[1], c[3], c[4], c[2], c[4], c[5]);
        let eig = m.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let column = |k: usize| {
            let col = eig.eigenvectors.column(k);
            [col[0], col[1], col[2]]
        };
        let mut u = column(order[0]);
        if u[0] < 0.0 {
            u = [-u[0], -u[1], -u[2]];
        }
        let w = column(order[2]);
        Self::new(
            u,
            w,
            [
                eig.eigenvalues[order[0]],
                eig.eigenvalues[order[1]],
                eig.eigenvalues[order[2]],
            ],
        )
    }

    #[inline]
    fn u64(&self) -> [f64; 3] {
        self.u.map(|x| x.as_f64())
    }

    #[inline]
    fn w64(&self) -> [f64; 3] {
        self.w.map(|x| x.as_f64())
    }

    pub fn u(&self) -> [F; 3] {
        self.u
    }

    pub fn w(&self) -> [F; 3] {
        self.w
    }

    pub fn v(&self) -> [F; 3] {
        cross(self.w64(), self.u64()).map(F::from_f64_c)
    }

    /// Eigenvalues `(au, av, aw)`.
    pub fn eigenvalues(&self) -> [F; 3] {
        self.eigenvalues
    }

    /// Callers guarantee finite, non-negative values.
    pub(crate) fn set_eigenvalues(&mut self, au: F, av: F, aw: F) {
        self.eigenvalues = [au, av, aw];
    }

    /// Coefficients `(a11, a12, a13, a22, a23, a33)`.
    pub fn coefficients(&self) -> [f64; 6] {
        let u = self.u64();
        let w = self.w64();
        let v = cross(w, u);
        let [au, av, aw] = self.eigenvalues.map(|x| x.as_f64());
        let a = |i: usize, j: usize| au * u[i] * u[j] + av * v[i] * v[j] + aw * w[i] * w[j];
        [a(0, 0), a(0, 1), a(0, 2), a(1, 1), a(1, 2), a(2, 2)]
    }

    /// `D d` for a vector `d` with components along axes `(1, 2, 3)`.
    #[inline]
    pub fn apply(&self, d: [f64; 3]) -> [f64; 3] {
        let u = self.u64();
        let w = self.w64();
        let v = cross(w, u);
        let [au, av, aw] = self.eigenvalues.map(|x| x.as_f64());
        let (du, dv, dw) = (au * dot(d, u), av * dot(d, v), aw * dot(d, w));
        [
            du * u[0] + dv * v[0] + dw * w[0],
            du * u[1] + dv * v[1] + dw * w[1],
            du * u[2] + dv * v[2] + dw * w[2],
        ]
    }

    /// Coefficients of `D⁻¹`. Requires strictly positive eigenvalues.
    pub fn inverse_coefficients(&self) -> [f64; 6] {
        let u = self.u64();
        let w = self.w64();
        let v = cross(w, u);
        let [au, av, aw] = self.eigenvalues.map(|x| 1.0 / x.as_f64());
        let a = |i: usize, j: usize| au * u[i] * u[j] + av * v[i] * v[j] + aw * w[i] * w[j];
        [a(0, 0), a(0, 1), a(0, 2), a(1, 1), a(1, 2), a(2, 2)]
    }

    /// `dᵀ D⁻¹ d`, the squared metric length of step `d`.
    ///
    /// Requires strictly positive eigenvalues.
    #[inline]
    pub fn inverse_quadratic(&self, d: [f64; 3]) -> f64 {
        let u = self.u64();
        let w = self.w64();
        let v = cross(w, u);
        let [au, av, aw] = self.eigenvalues.map(|x| x.as_f64());
        let (du, dv, dw) = (dot(d, u), dot(d, v), dot(d, w));
        du * du / au + dv * dv / av + dw * dw / aw
    }
}

/// First non-finite or negative value in an eigenvalue volume, as an error.
fn check_eigenvalues<F: GridFloat>(volume: ArrayView3<F>) -> GridResult<()> {
    match volume
        .indexed_iter()
        .find(|(_, x)| !x.is_finite() || **x < F::zero())
    {
        Some(((i3, i2, i1), &value)) => Err(GridError::InvalidEigenvalue {
            i3,
            i2,
            i1,
            value: value.as_f64(),
        }),
        None => Ok(()),
    }
}

/// A field of tensors with array shape `(n3, n2, n1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenTensors3<F: GridFloat> {
    tensors: Array3<LocalTensor<F>>,
}

impl<F: GridFloat> EigenTensors3<F> {
    pub fn from_tensors(tensors: Array3<LocalTensor<F>>) -> Self {
        Self { tensors }
    }

    /// Same tensor at every voxel.
    pub fn uniform(
        shape: (usize, usize, usize),
        u: [f64; 3],
        w: [f64; 3],
        eigenvalues: [f64; 3],
    ) -> Self {
        Self {
            tensors: Array3::from_elem(shape, LocalTensor::new(u, w, eigenvalues)),
        }
    }

    /// Identity tensor at every voxel.
    pub fn isotropic(shape: (usize, usize, usize)) -> Self {
        Self {
            tensors: Array3::from_elem(shape, LocalTensor::identity()),
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.tensors.dim()
    }

    #[inline]
    pub fn get(&self, i3: usize, i2: usize, i1: usize) -> LocalTensor<F> {
        self.tensors[[i3, i2, i1]]
    }

    pub fn tensors(&self) -> &Array3<LocalTensor<F>> {
        &self.tensors
    }

    pub fn tensors_mut(&mut self) -> &mut Array3<LocalTensor<F>> {
        &mut self.tensors
    }

    pub fn coefficients(&self, i3: usize, i2: usize, i1: usize) -> [f64; 6] {
        self.tensors[[i3, i2, i1]].coefficients()
    }

    pub fn set_coefficients(&mut self, i3: usize, i2: usize, i1: usize, c: [f64; 6]) {
        self.tensors[[i3, i2, i1]] = LocalTensor::from_coefficients(c);
    }

    /// Overwrite the eigenvalues at every voxel, keeping eigenvectors.
    ///
    /// All three volumes are checked for shape and for finite,
    /// non-negative values before anything is written.
    pub fn set_eigenvalues<'a>(
        &mut self,
        au: ArrayView3<'a, F>,
        av: ArrayView3<'a, F>,
        aw: ArrayView3<'a, F>,
    ) -> GridResult<()> {
        let shape = self.shape();
        ensure_same_shape("eigenvalue volume au", shape, au.dim())?;
        ensure_same_shape("eigenvalue volume av", shape, av.dim())?;
        ensure_same_shape("eigenvalue volume aw", shape, aw.dim())?;
        for volume in [au, av, aw] {
            check_eigenvalues(volume)?;
        }
        Zip::from(&mut self.tensors)
            .and(au)
            .and(av)
            .and(aw)
            .par_for_each(|t, &a, &b, &c| t.set_eigenvalues(a, b, c));
        Ok(())
    }

    /// Overwrite the eigenvalues at every voxel with constants.
    pub fn set_uniform_eigenvalues(&mut self, au: F, av: F, aw: F) -> GridResult<()> {
        for value in [au, av, aw] {
            if !value.is_finite() || value < F::zero() {
                return Err(GridError::InvalidEigenvalue {
                    i3: 0,
                    i2: 0,
                    i1: 0,
                    value: value.as_f64(),
                });
            }
        }
        self.tensors
            .par_map_inplace(|t| t.set_eigenvalues(au, av, aw));
        Ok(())
    }

    /// Smallest and largest eigenvalue over the field.
    pub fn eigenvalue_range(&self) -> (F, F) {
        let mut range = (F::infinity(), F::neg_infinity());
        for t in self.tensors.iter() {
            for e in t.eigenvalues() {
                range = (range.0.min(e), range.1.max(e));
            }
        }
        range
    }

    /// Fail with [`GridError::IllConditionedTensor`] unless every
    /// eigenvalue lies in `[epsilon, 1]`.
    pub fn ensure_well_conditioned(&self, epsilon: f64) -> GridResult<()> {
        let lo = F::from_f64_c(epsilon);
        for ((i3, i2, i1), t) in self.tensors.indexed_iter() {
            for e in t.eigenvalues() {
                if !(e >= lo && e <= F::one()) {
                    return Err(GridError::IllConditionedTensor {
                        i3,
                        i2,
                        i1,
                        value: e.as_f64(),
                        min: epsilon,
                    });
                }
            }
        }
        Ok(())
    }

    /// Fuse three confidence volumes into the eigenvalues.
    ///
    /// `c1` measures coherence along `w`, `c2` along `v` and `c3` along `u`.
    /// Each is masked with its fill value, shaped, clipped to
    /// `[epsilon, 1]` and assigned as `(au, av, aw) = (c3, c2, c1)`.
    pub fn scale_with_confidence(
        &mut self,
        c1: Array3<F>,
        c2: Array3<F>,
        c3: Array3<F>,
        mask: Option<&VolumeMask>,
        scaling: &ConfidenceScaling,
    ) -> GridResult<()> {
        scaling.validate()?;
        let shape = self.shape();
        ensure_same_shape("confidence volume 1", shape, c1.dim())?;
        ensure_same_shape("confidence volume 2", shape, c2.dim())?;
        ensure_same_shape("confidence volume 3", shape, c3.dim())?;
        if let Some(mask) = mask {
            ensure_same_shape("confidence mask", shape, mask.shape())?;
        }

        let eps = F::from_f64_c(scaling.epsilon);
        let v_exponent = F::from_f64_c(scaling.v_exponent);
        let clip = |x: F| {
            if x.is_nan() {
                eps
            } else {
                x.max(eps).min(F::one())
            }
        };

        let mut volumes = [c1, c2, c3];
        if let Some(mask) = mask {
            for (volume, &fill) in volumes.iter_mut().zip(scaling.fills.iter()) {
                mask.apply(F::from_f64_c(fill), volume)?;
            }
        }
        let [mut c1, mut c2, mut c3] = volumes;

        c2.par_mapv_inplace(|x| x.max(F::zero()).powf(v_exponent));
        if scaling.pin_u_to_epsilon {
            c3.fill(eps);
        }
        c1.par_mapv_inplace(clip);
        c2.par_mapv_inplace(clip);
        c3.par_mapv_inplace(clip);

        log::debug!(
            "EigenTensors3::scale_with_confidence: epsilon={}, v_exponent={}, pin_u={}",
            scaling.epsilon,
            scaling.v_exponent,
            scaling.pin_u_to_epsilon
        );
        self.set_eigenvalues(c3.view(), c2.view(), c1.view())
    }
}

/// How confidence volumes become tensor eigenvalues.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceScaling {
    /// Eigenvalue floor; every eigenvalue ends up in `[epsilon, 1]`.
    pub epsilon: f64,
    /// Values written into masked-out voxels of `(c1, c2, c3)`.
    pub fills: [f64; 3],
    /// Exponent applied to `c2` before clipping. Default: 4.0
    pub v_exponent: f64,
    /// Replace `c3` by `epsilon` everywhere, making travel across layers
    /// uniformly expensive. Default: true
    pub pin_u_to_epsilon: bool,
}

impl Default for ConfidenceScaling {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            fills: DEFAULT_CONFIDENCE_FILLS,
            v_exponent: DEFAULT_V_EXPONENT,
            pin_u_to_epsilon: true,
        }
    }
}

impl ConfidenceScaling {
    pub fn validate(&self) -> GridResult<()> {
        if !(self.epsilon > 0.0 && self.epsilon <= 1.0) {
            return Err(GridError::InvalidConfig(format!(
                "epsilon must be in (0, 1], got {}",
                self.epsilon
            )));
        }
        if !(self.v_exponent > 0.0 && self.v_exponent.is_finite()) {
            return Err(GridError::InvalidConfig(format!(
                "v_exponent must be finite and > 0, got {}",
                self.v_exponent
            )));
        }
        if self.fills.iter().any(|f| !f.is_finite()) {
            return Err(GridError::InvalidConfig(
                "confidence fill values must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Estimates structure tensors from gradient outer products.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOrientFilter {
    /// Smoothing half-width along axis 1. Default: 8.0
    pub sigma1: f64,
    /// Smoothing half-width along axes 2 and 3. Default: `sigma1`
    pub sigma2: f64,
    /// Pre-smoothing before differencing. Default: 1.0
    pub gradient_sigma: f64,
}

impl Default for LocalOrientFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ORIENT_SIGMA)
    }
}

impl LocalOrientFilter {
    pub fn new(sigma: f64) -> Self {
        Self::with_sigmas(sigma, sigma)
    }

    pub fn with_sigmas(sigma1: f64, sigma2: f64) -> Self {
        Self {
            sigma1,
            sigma2,
            gradient_sigma: DEFAULT_GRADIENT_SIGMA,
        }
    }

    pub fn validate(&self) -> GridResult<()> {
        for (name, value) in [
            ("sigma1", self.sigma1),
            ("sigma2", self.sigma2),
            ("gradient_sigma", self.gradient_sigma),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(GridError::InvalidConfig(format!(
                    "{name} must be finite and >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Structure tensors of `image`, one per voxel.
    pub fn apply_for_tensors<F: GridFloat>(
        &self,
        image: ArrayView3<F>,
    ) -> GridResult<EigenTensors3<F>> {
        self.validate()?;
        let g = F::from_f64_c(self.gradient_sigma);
        let smoothed = gaussian_smooth_3d(image, g, g);

        let g1 = centered_derivative(&smoothed, AXIS_1);
        let g2 = centered_derivative(&smoothed, AXIS_2);
        let g3 = centered_derivative(&smoothed, AXIS_3);

        let s1 = F::from_f64_c(self.sigma1);
        let s2 = F::from_f64_c(self.sigma2);
        let product = |a: &Array3<F>, b: &Array3<F>| gaussian_smooth_3d((a * b).view(), s1, s2);
        let p11 = product(&g1, &g1);
        let p12 = product(&g1, &g2);
        let p13 = product(&g1, &g3);
        let p22 = product(&g2, &g2);
        let p23 = product(&g2, &g3);
        let p33 = product(&g3, &g3);

        let mut tensors = Array3::from_elem(image.dim(), LocalTensor::identity());
        Zip::indexed(&mut tensors).par_for_each(|idx, t| {
            let c = [
                p11[idx].as_f64(),
                p12[idx].as_f64(),
                p13[idx].as_f64(),
                p22[idx].as_f64(),
                p23[idx].as_f64(),
                p33[idx].as_f64(),
            ];
            *t = LocalTensor::from_coefficients(c);
        });

        Ok(EigenTensors3 { tensors })
    }
}

/// Centered first difference along `axis`, one-sided at the ends.
fn centered_derivative<F: GridFloat>(volume: &Array3<F>, axis: Axis) -> Array3<F> {
    let mut out = volume.clone();
    let half = F::from_f64_c(0.5);
    for_each_lane(&mut out, axis, |lane| {
        let n = lane.len();
        if n < 2 {
            lane.iter_mut().for_each(|x| *x = F::zero());
            return;
        }
        let src = lane.to_vec();
        lane[0] = src[1] - src[0];
        lane[n - 1] = src[n - 1] - src[n - 2];
        for i in 1..n - 1 {
            lane[i] = half * (src[i + 1] - src[i - 1]);
        }
    });
    out
}
