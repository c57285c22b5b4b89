//! Separable smoothing of 3D volumes.
//!
//! Two smoothers are provided:
//! - Truncated Gaussian convolution with reflect boundaries, applied lane by
//!   lane along any axis (structure tensors, amplitude masks).
//! - A two-sided recursive exponential filter along axis 1 (gain).
//!
//! ## SIMD Optimization Notes
//!
//! The Gaussian convolution runs on pre-padded contiguous buffers so the
//! inner loop is branch-free and auto-vectorizes.

use ndarray::{Array3, ArrayView3, ArrayViewMut1, Axis, Zip};

use crate::float_trait::GridFloat;

/// Minimum number of lanes for parallel processing.
/// Below this, rayon overhead dominates.
const PARALLEL_LANE_THRESHOLD: usize = 64;

/// Ndarray axis holding volume axis 1 (depth), given `[i3, i2, i1]` layout.
pub const AXIS_1: Axis = Axis(2);
/// Ndarray axis holding volume axis 2.
pub const AXIS_2: Axis = Axis(1);
/// Ndarray axis holding volume axis 3.
pub const AXIS_3: Axis = Axis(0);

/// Compute 1D Gaussian kernel with given sigma.
/// Kernel size is ceil(4 * sigma) * 2 + 1.
pub(crate) fn gaussian_kernel_1d<F: GridFloat>(sigma: F) -> Vec<F> {
    if sigma <= F::zero() {
        return vec![F::one()];
    }

    let radius = (F::GAUSSIAN_TRUNCATE * sigma)
        .ceil()
        .to_usize()
        .unwrap_or(0);
    let size = 2 * radius + 1;
    let mut kernel = vec![F::zero(); size];

    let sigma2 = sigma * sigma;
    let mut sum = F::zero();
    let two = F::from_f64_c(2.0);

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = F::usize_as(i) - F::usize_as(radius);
        let val = (-(x * x) / (two * sigma2)).exp();
        *k = val;
        sum += val;
    }

    let inv_sum = F::one() / sum;
    for val in kernel.iter_mut() {
        *val *= inv_sum;
    }

    kernel
}

/// Edge-inclusive mirror, the same at both ends: `d c b a | a b c d | d c b a`.
///
/// reflect(-1) = 0, reflect(-2) = 1, reflect(n) = n-1, reflect(n+1) = n-2.
/// Offsets past one full mirror clamp to the far edge.
#[inline(always)]
fn reflect_index(idx: isize, len: usize) -> usize {
    let n = len as isize;
    if idx < 0 {
        (-idx - 1).min(n - 1) as usize
    } else if idx >= n {
        let excess = idx - n;
        (n - 1 - excess).max(0) as usize
    } else {
        idx as usize
    }
}

/// Fill a pre-allocated padded buffer with reflected boundaries.
#[inline]
fn fill_padded<F: GridFloat>(input: &[F], radius: usize, padded: &mut Vec<F>) {
    let n = input.len();
    padded.clear();
    padded.reserve(n + 2 * radius);
    for i in 0..radius {
        let src = reflect_index(i as isize - radius as isize, n);
        padded.push(input[src]);
    }
    padded.extend_from_slice(input);
    for i in 0..radius {
        let src = reflect_index((n + i) as isize, n);
        padded.push(input[src]);
    }
}

/// Apply 1D convolution to a padded buffer (no bounds checking needed).
#[inline]
fn convolve_1d_padded<F: GridFloat>(padded: &[F], kernel: &[F], output: &mut [F]) {
    for (i, out) in output.iter_mut().enumerate() {
        let mut sum = F::zero();
        for (k, &w) in kernel.iter().enumerate() {
            sum += padded[i + k] * w;
        }
        *out = sum;
    }
}

/// Gaussian-smooth a single 1D signal with reflect boundaries.
pub fn gaussian_smooth_1d<F: GridFloat>(input: &[F], sigma: F) -> Vec<F> {
    let kernel = gaussian_kernel_1d(sigma);
    let mut padded = Vec::new();
    let mut output = vec![F::zero(); input.len()];
    if input.is_empty() {
        return output;
    }
    fill_padded(input, kernel.len() / 2, &mut padded);
    convolve_1d_padded(&padded, &kernel, &mut output);
    output
}

/// Run `f` on every lane of `volume` along `axis`, in parallel when the
/// volume has enough lanes. The lane is handed over as a contiguous buffer
/// and written back afterwards.
pub(crate) fn for_each_lane<F, Op>(volume: &mut Array3<F>, axis: Axis, op: Op)
where
    F: GridFloat,
    Op: Fn(&mut [F]) + Sync + Send,
{
    let lane_count = volume.len() / volume.len_of(axis).max(1);
    let run = |mut lane: ArrayViewMut1<F>| {
        let mut buffer: Vec<F> = lane.iter().copied().collect();
        op(&mut buffer);
        for (dst, src) in lane.iter_mut().zip(buffer) {
            *dst = src;
        }
    };

    if lane_count >= PARALLEL_LANE_THRESHOLD {
        Zip::from(volume.lanes_mut(axis)).par_for_each(run);
    } else {
        Zip::from(volume.lanes_mut(axis)).for_each(run);
    }
}

/// Gaussian-smooth `volume` in place along one ndarray axis.
pub fn gaussian_smooth_axis<F: GridFloat>(volume: &mut Array3<F>, axis: Axis, sigma: F) {
    if sigma <= F::zero() || volume.len_of(axis) < 2 {
        return;
    }
    let kernel = gaussian_kernel_1d(sigma);
    let radius = kernel.len() / 2;
    for_each_lane(volume, axis, |lane| {
        let mut padded = Vec::with_capacity(lane.len() + 2 * radius);
        fill_padded(lane, radius, &mut padded);
        convolve_1d_padded(&padded, &kernel, lane);
    });
}

/// Gaussian-smooth a volume with half-width `sigma1` along axis 1 and
/// `sigma23` along axes 2 and 3.
pub fn gaussian_smooth_3d<F: GridFloat>(input: ArrayView3<F>, sigma1: F, sigma23: F) -> Array3<F> {
    let mut output = input.to_owned();
    gaussian_smooth_axis(&mut output, AXIS_1, sigma1);
    gaussian_smooth_axis(&mut output, AXIS_2, sigma23);
    gaussian_smooth_axis(&mut output, AXIS_3, sigma23);
    output
}

/// Two-sided recursive exponential smoothing filter.
///
/// A causal pass `y[i] = a*y[i-1] + (1-a)*x[i]` followed by the matching
/// anti-causal pass; the cascade is zero-phase with variance `sigma^2`.
/// Edges use zero-slope initial conditions, so constant signals pass
/// through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct RecursiveExponentialFilter {
    sigma: f64,
    a: f64,
}

impl RecursiveExponentialFilter {
    pub fn new(sigma: f64) -> Self {
        Self {
            sigma,
            a: Self::a_from_sigma(sigma),
        }
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Pole that yields a two-sided impulse response of variance `sigma^2`.
    pub fn a_from_sigma(sigma: f64) -> f64 {
        if sigma.is_nan() || sigma <= 0.0 {
            return 0.0;
        }
        let ss = sigma * sigma;
        (1.0 + ss - (1.0 + 2.0 * ss).sqrt()) / ss
    }

    /// Smooth one signal in place.
    pub fn smooth_in_place<F: GridFloat>(&self, x: &mut [F]) {
        let n = x.len();
        if n < 2 || self.a == 0.0 {
            return;
        }
        let a = F::from_f64_c(self.a);
        let b = F::one() - a;

        let mut yi = x[0];
        for xi in x.iter_mut() {
            yi = a * yi + b * *xi;
            *xi = yi;
        }
        let mut yi = x[n - 1];
        for xi in x.iter_mut().rev() {
            yi = a * yi + b * *xi;
            *xi = yi;
        }
    }

    /// Smooth every trace of `volume` along axis 1 (depth).
    pub fn apply1<F: GridFloat>(&self, volume: &mut Array3<F>) {
        for_each_lane(volume, AXIS_1, |lane| self.smooth_in_place(lane));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(0, 5), 0);
        assert_eq!(reflect_index(4, 5), 4);
        assert_eq!(reflect_index(-1, 5), 0);
        assert_eq!(reflect_index(-2, 5), 1);
        assert_eq!(reflect_index(5, 5), 4);
        assert_eq!(reflect_index(6, 5), 3);
        assert_eq!(reflect_index(-3, 1), 0);
        assert_eq!(reflect_index(3, 1), 0);
    }

    #[test]
    fn test_reflect_two_sample_lane() {
        assert_eq!(reflect_index(-1, 2), 0);
        assert_eq!(reflect_index(-2, 2), 1);
        assert_eq!(reflect_index(-3, 2), 1);
        assert_eq!(reflect_index(2, 2), 1);
        assert_eq!(reflect_index(3, 2), 0);
        assert_eq!(reflect_index(4, 2), 0);

        // Both ends mirror alike, so a step smooths antisymmetrically.
        let out = gaussian_smooth_1d(&[0.0f64, 1.0], 2.0);
        assert!(out[0] > 0.0 && out[0] < 0.5);
        assert!((out[0] + out[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gaussian_kernel_sums_to_one() {
        for sigma in [0.5f32, 1.0, 2.0, 3.0, 8.0] {
            let kernel = gaussian_kernel_1d(sigma);
            let sum: f32 = kernel.iter().sum();
            assert!(approx_eq(sum, 1.0, 1e-5), "sigma={} sums to {}", sigma, sum);
        }
    }

    #[test]
    fn test_gaussian_kernel_zero_sigma() {
        let kernel = gaussian_kernel_1d(0.0f64);
        assert_eq!(kernel, vec![1.0]);
    }

    #[test]
    fn test_gaussian_smooth_1d_uniform() {
        let input = vec![5.0f64; 12];
        let output = gaussian_smooth_1d(&input, 2.0);
        for v in output {
            assert!((v - 5.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_gaussian_smooth_short_signal_longer_kernel() {
        // kernel radius exceeds the signal length: reflection must still work
        let input = vec![1.0f64, 2.0, 3.0];
        let output = gaussian_smooth_1d(&input, 5.0);
        assert_eq!(output.len(), 3);
        for v in &output {
            assert!(*v >= 1.0 && *v <= 3.0);
        }
    }

    #[test]
    fn test_gaussian_smooth_axis_only_touches_that_axis() {
        // A volume that varies only along axis 1 is unchanged by smoothing along axes 2 and 3.
        let input = Array3::from_shape_fn((4, 5, 6), |(_, _, i1)| i1 as f64);
        let output = {
            let mut v = input.clone();
            gaussian_smooth_axis(&mut v, AXIS_2, 2.0);
            gaussian_smooth_axis(&mut v, AXIS_3, 2.0);
            v
        };
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_gaussian_smooth_3d_spreads_impulse() {
        let mut input = Array3::<f32>::zeros((9, 9, 9));
        input[[4, 4, 4]] = 1.0;
        let output = gaussian_smooth_3d(input.view(), 1.0, 1.0);
        assert!(output[[4, 4, 4]] < 1.0);
        assert!(output[[4, 4, 5]] > 0.0);
        assert!(output[[4, 5, 4]] > 0.0);
        assert!(output[[5, 4, 4]] > 0.0);
        assert!(approx_eq(output[[4, 4, 5]], output[[5, 4, 4]], 1e-6));
        let total: f32 = output.iter().sum();
        assert!(approx_eq(total, 1.0, 1e-4));
    }

    #[test]
    fn test_a_from_sigma() {
        assert_eq!(RecursiveExponentialFilter::a_from_sigma(0.0), 0.0);
        let a = RecursiveExponentialFilter::a_from_sigma(4.0);
        assert!(a > 0.0 && a < 1.0);
        // Two-sided variance of the cascade is 2a/(1-a)^2.
        let variance = 2.0 * a / ((1.0 - a) * (1.0 - a));
        assert!((variance - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_recursive_filter_preserves_constant() {
        let filter = RecursiveExponentialFilter::new(10.0);
        let mut x = vec![3.0f64; 50];
        filter.smooth_in_place(&mut x);
        for v in x {
            assert!((v - 3.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_recursive_filter_is_symmetric() {
        let filter = RecursiveExponentialFilter::new(3.0);
        let mut x = vec![0.0f64; 41];
        x[20] = 1.0;
        filter.smooth_in_place(&mut x);
        for k in 1..10 {
            assert!((x[20 - k] - x[20 + k]).abs() < 1e-5, "lag {}", k);
        }
        assert!(x[20] > x[21]);
    }

    #[test]
    fn test_apply1_smooths_traces_independently() {
        let filter = RecursiveExponentialFilter::new(2.0);
        let mut v = Array3::<f64>::zeros((2, 2, 16));
        v[[1, 0, 8]] = 1.0;
        filter.apply1(&mut v);
        assert!(v[[1, 0, 7]] > 0.0);
        assert_eq!(v[[0, 0, 8]], 0.0);
        assert_eq!(v[[1, 1, 8]], 0.0);
    }
}
