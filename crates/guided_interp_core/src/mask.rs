//! Validity masks over 3D volumes.
//!
//! A mask marks the voxels that carry meaningful image data. Null regions
//! (padding, dead traces, blown-up amplitudes) are masked out and later
//! overwritten with a fill value, or given an isotropic tensor so that
//! diffusion through them is not steered by noise.

use ndarray::{Array3, ArrayView3, Zip};

use crate::error::{ensure_same_shape, GridError, GridResult};
use crate::float_trait::GridFloat;
use crate::smoothing::gaussian_smooth_3d;
use crate::tensors::{EigenTensors3, LocalTensor};

/// Tensor coefficients `(a11, a12, a13, a22, a23, a33)` of the identity.
pub const IDENTITY_COEFFICIENTS: [f64; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 1.0];

/// Boolean validity mask with the shape of the volume it modulates.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMask {
    valid: Array3<bool>,
}

impl VolumeMask {
    /// Derive a mask from local amplitude.
    ///
    /// The local mean absolute amplitude is |x| smoothed with half-width
    /// `sigma1` along axis 1 and `sigma2` along axes 2 and 3. A voxel is
    /// valid when that local value lies within `[small*m, large*m]`, with
    /// `m` the global mean absolute amplitude.
    pub fn from_thresholds<F: GridFloat>(
        small: f64,
        large: f64,
        sigma1: f64,
        sigma2: f64,
        image: ArrayView3<F>,
    ) -> GridResult<Self> {
        if !(small >= 0.0 && small.is_finite()) {
            return Err(GridError::InvalidConfig(format!(
                "mask lower bound must be finite and >= 0, got {small}"
            )));
        }
        if !(large > small) {
            return Err(GridError::InvalidConfig(format!(
                "mask upper bound {large} must exceed lower bound {small}"
            )));
        }
        if sigma1 < 0.0 || sigma2 < 0.0 {
            return Err(GridError::InvalidConfig(format!(
                "mask smoothing widths must be >= 0, got ({sigma1}, {sigma2})"
            )));
        }

        let magnitude = image.mapv(|x| x.abs());
        let n = magnitude.len().max(1);
        let global = magnitude.iter().map(|x| x.as_f64()).sum::<f64>() / n as f64;
        let local = gaussian_smooth_3d(
            magnitude.view(),
            F::from_f64_c(sigma1),
            F::from_f64_c(sigma2),
        );

        let lo = small * global;
        let hi = large * global;
        let mut valid = Array3::from_elem(image.dim(), false);
        Zip::from(&mut valid).and(&local).par_for_each(|v, &a| {
            let a = a.as_f64();
            *v = a >= lo && a <= hi;
        });

        log::debug!(
            "VolumeMask::from_thresholds: global mean |x| = {:.4e}, {} of {} voxels valid",
            global,
            valid.iter().filter(|&&v| v).count(),
            valid.len()
        );
        Ok(Self { valid })
    }

    /// Wrap a precomputed mask volume: non-zero means valid.
    pub fn from_volume<F: GridFloat>(binary: ArrayView3<F>) -> Self {
        Self {
            valid: binary.mapv(|x| x != F::zero()),
        }
    }

    pub fn from_bools(valid: Array3<bool>) -> Self {
        Self { valid }
    }

    /// A mask with every voxel valid.
    pub fn all_valid(shape: (usize, usize, usize)) -> Self {
        Self {
            valid: Array3::from_elem(shape, true),
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.valid.dim()
    }

    #[inline]
    pub fn is_valid(&self, i3: usize, i2: usize, i1: usize) -> bool {
        self.valid[[i3, i2, i1]]
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    pub fn as_bools(&self) -> &Array3<bool> {
        &self.valid
    }

    /// Mask as a 0.0/1.0 volume.
    pub fn as_floats<F: GridFloat>(&self) -> Array3<F> {
        self.valid.mapv(|v| if v { F::one() } else { F::zero() })
    }

    /// Overwrite every masked-out voxel of `volume` with `fill`.
    ///
    /// Valid voxels are untouched, so applying the same mask twice is a
    /// no-op the second time.
    pub fn apply<F: GridFloat>(&self, fill: F, volume: &mut Array3<F>) -> GridResult<()> {
        ensure_same_shape("mask application", self.shape(), volume.dim())?;
        Zip::from(volume).and(&self.valid).par_for_each(|x, &v| {
            if !v {
                *x = fill;
            }
        });
        Ok(())
    }

    /// Replace the tensors at masked-out voxels by `coefficients`
    /// `(a11, a12, a13, a22, a23, a33)`, typically the identity so that
    /// null regions diffuse isotropically.
    pub fn apply_to_tensors<F: GridFloat>(
        &self,
        coefficients: [f64; 6],
        tensors: &mut EigenTensors3<F>,
    ) -> GridResult<()> {
        ensure_same_shape("tensor masking", self.shape(), tensors.shape())?;
        let replacement = LocalTensor::from_coefficients(coefficients);
        Zip::from(tensors.tensors_mut())
            .and(&self.valid)
            .par_for_each(|t, &v| {
                if !v {
                    *t = replacement;
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard_mask(shape: (usize, usize, usize)) -> VolumeMask {
        let valid = Array3::from_shape_fn(shape, |(i3, i2, i1)| (i1 + i2 + i3) % 2 == 0);
        VolumeMask::from_bools(valid)
    }

    #[test]
    fn test_apply_fills_only_invalid() {
        let mask = checkerboard_mask((3, 4, 5));
        let original =
            Array3::from_shape_fn((3, 4, 5), |(i3, i2, i1)| (i1 + 10 * i2 + 100 * i3) as f32);
        let mut v = original.clone();
        mask.apply(-7.0, &mut v).unwrap();
        for ((idx, &x), &o) in v.indexed_iter().zip(original.iter()) {
            if mask.is_valid(idx.0, idx.1, idx.2) {
                assert_eq!(x, o);
            } else {
                assert_eq!(x, -7.0);
            }
        }
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mask = checkerboard_mask((4, 4, 4));
        let mut once = Array3::from_elem((4, 4, 4), 2.5f64);
        mask.apply(0.0, &mut once).unwrap();
        let mut twice = once.clone();
        mask.apply(0.0, &mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_apply_shape_mismatch_leaves_volume_untouched() {
        let mask = checkerboard_mask((2, 2, 2));
        let mut v = Array3::from_elem((2, 2, 3), 1.0f32);
        let result = mask.apply(0.0, &mut v);
        assert!(matches!(result, Err(GridError::ShapeMismatch { .. })));
        assert!(v.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_from_volume_and_as_floats() {
        let binary =
            Array3::from_shape_fn((2, 3, 4), |(_, _, i1)| if i1 < 2 { 1.0f32 } else { 0.0 });
        let mask = VolumeMask::from_volume(binary.view());
        assert_eq!(mask.valid_count(), 12);
        let floats: Array3<f32> = mask.as_floats();
        assert_eq!(floats, binary);
    }

    #[test]
    fn test_from_thresholds_masks_dead_and_hot_regions() {
        // Unit-amplitude alternating pattern with a dead slab and a hot slab.
        let image = Array3::from_shape_fn((32, 8, 32), |(i3, i2, i1)| {
            let sign = if (i1 + i2 + i3) % 2 == 0 { 1.0f32 } else { -1.0 };
            if i3 == 0 {
                0.0
            } else if i3 == 31 {
                sign * 50.0
            } else {
                sign
            }
        });
        let mask = VolumeMask::from_thresholds(0.1, 10.0, 0.5, 0.5, image.view()).unwrap();
        assert!(!mask.is_valid(0, 4, 16));
        assert!(!mask.is_valid(31, 4, 16));
        assert!(mask.is_valid(1, 4, 16));
        assert!(mask.is_valid(16, 4, 16));
    }

    #[test]
    fn test_from_thresholds_rejects_bad_bounds() {
        let image = Array3::<f32>::ones((2, 2, 2));
        for (small, large, sigma1) in [(0.5, 0.1, 1.0), (-0.1, 1.0, 1.0), (0.1, 1.0, -1.0)] {
            let result = VolumeMask::from_thresholds(small, large, sigma1, 1.0, image.view());
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_apply_to_tensors_sets_identity() {
        let mut tensors = EigenTensors3::<f32>::uniform(
            (2, 2, 2),
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
            [1.0, 0.01, 0.5],
        );
        let mask = checkerboard_mask((2, 2, 2));
        mask.apply_to_tensors(IDENTITY_COEFFICIENTS, &mut tensors)
            .unwrap();
        let c = tensors.coefficients(0, 0, 1);
        for (a, b) in c.iter().zip(IDENTITY_COEFFICIENTS.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        let kept = tensors.get(0, 0, 0);
        assert!((kept.eigenvalues()[1] - 0.01).abs() < 1e-6);
    }
}
