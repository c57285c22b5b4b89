//! Depth-gain normalization.
//!
//! Local energy is estimated by smoothing `x*x` along axis 1 with a
//! zero-phase recursive exponential filter. Each sample is then divided by
//! the local RMS amplitude, flattening depth-dependent energy decay.

use ndarray::{Array3, ArrayView3, Zip};

use crate::error::{GridError, GridResult};
use crate::float_trait::GridFloat;
use crate::smoothing::RecursiveExponentialFilter;

/// Default half-width of the energy smoother, in samples.
pub const DEFAULT_GAIN_SIGMA: f64 = 100.0;

/// Lower bound on local energy before the square root.
const DEFAULT_ENERGY_FLOOR: f64 = 1e-12;

/// Normalizes traces by their local RMS amplitude.
#[derive(Debug, Clone, Copy)]
pub struct GainNormalizer {
    filter: RecursiveExponentialFilter,
    floor: f64,
}

impl Default for GainNormalizer {
    fn default() -> Self {
        Self {
            filter: RecursiveExponentialFilter::new(DEFAULT_GAIN_SIGMA),
            floor: DEFAULT_ENERGY_FLOOR,
        }
    }
}

impl GainNormalizer {
    pub fn new(sigma: f64) -> GridResult<Self> {
        if !(sigma > 0.0 && sigma.is_finite()) {
            return Err(GridError::InvalidConfig(format!(
                "gain sigma must be finite and > 0, got {sigma}"
            )));
        }
        Ok(Self {
            filter: RecursiveExponentialFilter::new(sigma),
            floor: DEFAULT_ENERGY_FLOOR,
        })
    }

    /// Override the energy floor. Must be strictly positive.
    pub fn with_floor(mut self, floor: f64) -> GridResult<Self> {
        if !(floor > 0.0 && floor.is_finite()) {
            return Err(GridError::InvalidConfig(format!(
                "energy floor must be finite and > 0, got {floor}"
            )));
        }
        self.floor = floor;
        Ok(self)
    }

    pub fn sigma(&self) -> f64 {
        self.filter.sigma()
    }

    /// Gain-normalized copy of `image`.
    pub fn apply<F: GridFloat>(&self, image: ArrayView3<F>) -> Array3<F> {
        let mut energy = image.mapv(|x| x * x);
        self.filter.apply1(&mut energy);

        let floor = F::from_f64_c(self.floor);
        let mut output = Array3::zeros(image.dim());
        Zip::from(&mut output)
            .and(&image)
            .and(&energy)
            .par_for_each(|y, &x, &g| {
                *y = x / g.max(floor).sqrt();
            });
        output
    }
}

/// Gain-normalize `image` with energy half-width `sigma`.
pub fn gain<F: GridFloat>(image: ArrayView3<F>, sigma: f64) -> GridResult<Array3<F>> {
    Ok(GainNormalizer::new(sigma)?.apply(image))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_amplitude_gives_unit_rms() {
        let n1 = 400;
        let amplitude = 37.0f64;
        let image = Array3::from_shape_fn((2, 3, n1), |(_, _, i1)| {
            amplitude * (i1 as f64 * std::f64::consts::TAU / 10.0).sin()
        });
        let y = gain(image.view(), 8.0).unwrap();
        for i3 in 0..2 {
            for i2 in 0..3 {
                let trace = y.slice(ndarray::s![i3, i2, 100..300]);
                let rms = (trace.iter().map(|v| v * v).sum::<f64>() / trace.len() as f64).sqrt();
                assert!((rms - 1.0).abs() < 0.05, "rms = {}", rms);
            }
        }
    }

    #[test]
    fn test_decaying_amplitude_is_flattened() {
        let n1 = 600;
        let image = Array3::from_shape_fn((1, 1, n1), |(_, _, i1)| {
            let envelope = (-(i1 as f32) / 200.0).exp();
            envelope * (i1 as f32 * 0.9).sin()
        });
        let y = GainNormalizer::new(10.0).unwrap().apply(image.view());
        let rms = |a: usize, b: usize| {
            let t = y.slice(ndarray::s![0, 0, a..b]);
            (t.iter().map(|v| v * v).sum::<f32>() / (b - a) as f32).sqrt()
        };
        let shallow = rms(50, 150);
        let deep = rms(450, 550);
        assert!((shallow - deep).abs() < 0.1, "{} vs {}", shallow, deep);
    }

    #[test]
    fn test_all_zero_input_is_finite() {
        let image = Array3::<f32>::zeros((2, 2, 50));
        let y = gain(image.view(), DEFAULT_GAIN_SIGMA).unwrap();
        assert!(y.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_owned_copy_gains_on_worker_thread() {
        let image = Array3::from_shape_fn((2, 2, 80), |(i3, i2, i1)| {
            (1.0 + i3 as f32 + i2 as f32) * (i1 as f32 * 0.7).sin()
        });
        let expected = gain(image.view(), 6.0).unwrap();
        let input = image.to_owned();
        let output = std::thread::scope(|s| s.spawn(|| gain(input.view(), 6.0)).join());
        assert_eq!(output.unwrap().unwrap(), expected);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(GainNormalizer::new(0.0).is_err());
        assert!(GainNormalizer::new(f64::NAN).is_err());
        assert!(GainNormalizer::default().with_floor(0.0).is_err());
        assert_eq!(GainNormalizer::default().sigma(), DEFAULT_GAIN_SIGMA);
    }
}
