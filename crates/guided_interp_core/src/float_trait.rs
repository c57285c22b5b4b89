//! Float trait abstraction for f32/f64 support.
//!
//! Volumes, tensors and solver state are generic over the sample type so
//! the same code serves single-precision seismic data and double-precision
//! reference runs.

use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::Debug;
use std::iter::Sum;

/// Trait alias for floating point types supported by the gridder.
///
/// This trait combines all the bounds needed for gridding operations:
/// - Basic float operations (Float, NumAssign)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Thread-safe sharing across rayon workers
pub trait GridFloat:
    Float + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// Truncation factor for Gaussian kernels, in units of sigma.
    const GAUSSIAN_TRUNCATE: Self;

    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Widen to f64 for accumulation and eigen-decomposition.
    fn as_f64(self) -> f64;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;
}

impl GridFloat for f32 {
    const GAUSSIAN_TRUNCATE: Self = 4.0;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }
}

impl GridFloat for f64 {
    const GAUSSIAN_TRUNCATE: Self = 4.0;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_trait_impl() {
        let val: f32 = GridFloat::from_f64_c(std::f64::consts::PI);
        assert!((val - std::f32::consts::PI).abs() < 1e-5);

        let usize_val: f32 = GridFloat::usize_as(42);
        assert_eq!(usize_val, 42.0f32);

        assert!((1.5f32.as_f64() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_f64_trait_impl() {
        let val: f64 = GridFloat::from_f64_c(std::f64::consts::PI);
        assert!((val - std::f64::consts::PI).abs() < 1e-14);

        let usize_val: f64 = GridFloat::usize_as(42);
        assert_eq!(usize_val, 42.0f64);
    }

    #[test]
    fn test_gaussian_truncate() {
        assert_eq!(f32::GAUSSIAN_TRUNCATE, 4.0f32);
        assert_eq!(f64::GAUSSIAN_TRUNCATE, 4.0f64);
    }
}
