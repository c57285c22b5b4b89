//! Uniform axis sampling and sampled 3D volumes.
//!
//! Arrays are laid out `[i3, i2, i1]` (shape `(n3, n2, n1)`) so that axis 1,
//! the depth/time axis, is contiguous in memory.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::float_trait::GridFloat;

/// Uniform sampling of one axis: `count` samples starting at `first`,
/// spaced by `delta`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    pub count: usize,
    pub delta: f64,
    pub first: f64,
}

impl Sampling {
    pub fn new(count: usize, delta: f64, first: f64) -> GridResult<Self> {
        if !(delta.is_finite() && delta > 0.0) {
            return Err(GridError::SamplingMismatch(format!(
                "delta must be finite and > 0, got {delta}"
            )));
        }
        if !first.is_finite() {
            return Err(GridError::SamplingMismatch(format!(
                "first must be finite, got {first}"
            )));
        }
        Ok(Self {
            count,
            delta,
            first,
        })
    }

    /// Unit sampling `0, 1, .., count-1`.
    pub fn unit(count: usize) -> Self {
        Self {
            count,
            delta: 1.0,
            first: 0.0,
        }
    }

    /// Coordinate of the last sample.
    pub fn last(&self) -> f64 {
        self.first + self.delta * (self.count.saturating_sub(1)) as f64
    }

    pub fn value(&self, index: usize) -> f64 {
        self.first + self.delta * index as f64
    }

    /// Nearest sample index for coordinate `x`, or `None` when the rounded
    /// index falls outside `[0, count)` or `x` is not finite.
    pub fn index_of_nearest(&self, x: f64) -> Option<usize> {
        if !x.is_finite() {
            return None;
        }
        let k = ((x - self.first) / self.delta).round();
        if k < 0.0 || k >= self.count as f64 {
            None
        } else {
            Some(k as usize)
        }
    }
}

/// Sampling of the three axes of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampling3 {
    pub s1: Sampling,
    pub s2: Sampling,
    pub s3: Sampling,
}

impl Sampling3 {
    pub fn new(s1: Sampling, s2: Sampling, s3: Sampling) -> Self {
        Self { s1, s2, s3 }
    }

    /// Unit sampling on all three axes.
    pub fn unit(n1: usize, n2: usize, n3: usize) -> Self {
        Self::new(Sampling::unit(n1), Sampling::unit(n2), Sampling::unit(n3))
    }

    /// Array shape `(n3, n2, n1)` described by this sampling.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.s3.count, self.s2.count, self.s1.count)
    }

    pub fn len(&self) -> usize {
        self.s1.count * self.s2.count * self.s3.count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nearest voxel `(i3, i2, i1)` for world coordinates `(x1, x2, x3)`.
    pub fn voxel_of(&self, x1: f64, x2: f64, x3: f64) -> Option<(usize, usize, usize)> {
        let i1 = self.s1.index_of_nearest(x1)?;
        let i2 = self.s2.index_of_nearest(x2)?;
        let i3 = self.s3.index_of_nearest(x3)?;
        Some((i3, i2, i1))
    }
}

/// A dense sampled volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<F: GridFloat> {
    pub sampling: Sampling3,
    pub data: Array3<F>,
}

impl<F: GridFloat> Volume<F> {
    /// Wrap `data`, checking that its shape matches `sampling`.
    pub fn new(sampling: Sampling3, data: Array3<F>) -> GridResult<Self> {
        if data.dim() != sampling.shape() {
            return Err(GridError::shape_mismatch(
                "volume data vs sampling",
                sampling.shape(),
                data.dim(),
            ));
        }
        Ok(Self { sampling, data })
    }

    pub fn zeros(sampling: Sampling3) -> Self {
        Self {
            data: Array3::zeros(sampling.shape()),
            sampling,
        }
    }

    /// Volume with the same sampling and new data.
    pub fn with_data(&self, data: Array3<F>) -> GridResult<Self> {
        Self::new(self.sampling, data)
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Fail unless `other` shares this volume's sampling.
    pub fn ensure_same_sampling(&self, what: &str, other: &Sampling3) -> GridResult<()> {
        if self.sampling != *other {
            return Err(GridError::SamplingMismatch(format!(
                "{what}: expected {:?}, got {:?}",
                self.sampling, other
            )));
        }
        Ok(())
    }
}
