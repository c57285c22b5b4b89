//! End-to-end image-guided interpolation pipeline
//!
//! Runs the full well-log gridding workflow on one seismic image:
//! - Validity mask from amplitude thresholds (or a supplied mask)
//! - Structure tensors from image gradients, isotropic in null regions
//! - Eigenvalue scaling from three confidence volumes
//! - Sample insertion, nearest-sample fill and blended interpolation
//! - Terminal masking of every published volume
//!
//! Stage timings are logged at info level when the
//! `GUIDED_INTERP_PROFILE_TIMING` environment variable is set.

use std::path::Path;
use std::time::Instant;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_same_shape, GridError, GridResult};
use crate::float_trait::GridFloat;
use crate::gridder::{AnisotropicGridder, BlendingConfig, SolveReport};
use crate::inserter::{InsertReport, WellLogGridder};
use crate::mask::{VolumeMask, IDENTITY_COEFFICIENTS};
use crate::sampling::Volume;
use crate::tensors::{ConfidenceScaling, EigenTensors3, LocalOrientFilter};
use crate::well_logs::SampleSet;

// =============================================================================
// Constants
// =============================================================================

/// Environment switch for per-stage timing logs
const PROFILE_TIMING_ENV: &str = "GUIDED_INTERP_PROFILE_TIMING";

/// Default fraction of the mean amplitude below which voxels are null
const DEFAULT_MASK_SMALL: f64 = 0.1;

/// Default multiple of the mean amplitude above which voxels are null
const DEFAULT_MASK_LARGE: f64 = 10.0;

/// Default amplitude smoothing along axis 1 for masking
const DEFAULT_MASK_SIGMA1: f64 = 1.0;

/// Default amplitude smoothing along axes 2 and 3 for masking
const DEFAULT_MASK_SIGMA2: f64 = 1.0;

/// Default value written into masked-out voxels of the outputs
const DEFAULT_NULL_VALUE: f64 = 0.0;

// =============================================================================
// Types
// =============================================================================

/// Amplitude thresholds for deriving a [`VolumeMask`] from the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskThresholds {
    /// Default: 0.1
    pub small: f64,
    /// Default: 10.0
    pub large: f64,
    /// Default: 1.0
    pub sigma1: f64,
    /// Default: 1.0
    pub sigma2: f64,
}

impl Default for MaskThresholds {
    fn default() -> Self {
        Self {
            small: DEFAULT_MASK_SMALL,
            large: DEFAULT_MASK_LARGE,
            sigma1: DEFAULT_MASK_SIGMA1,
            sigma2: DEFAULT_MASK_SIGMA2,
        }
    }
}

/// Where the validity mask comes from.
#[derive(Debug, Clone, Default)]
pub enum MaskSource {
    /// Derive from the image with [`PipelineConfig::mask`].
    #[default]
    FromImage,
    /// Use a mask computed elsewhere.
    Precomputed(VolumeMask),
    /// Treat every voxel as valid.
    Disabled,
}

/// Configuration for [`run_guided_interpolation`].
///
/// Every field has a default; a JSON document only needs the fields it
/// overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mask: MaskThresholds,
    pub orientation: LocalOrientFilter,
    pub confidence: ConfidenceScaling,
    pub blending: BlendingConfig,
    /// Tensor coefficients placed at masked-out voxels. Default: identity
    pub tensor_fill: [f64; 6],
    /// Value written into masked-out voxels of every output. Default: 0.0
    pub null_value: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mask: MaskThresholds::default(),
            orientation: LocalOrientFilter::default(),
            confidence: ConfidenceScaling::default(),
            blending: BlendingConfig::default(),
            tensor_fill: IDENTITY_COEFFICIENTS,
            null_value: DEFAULT_NULL_VALUE,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> GridResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| GridError::ConfigLoad(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> GridResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| GridError::ConfigLoad(e.to_string()))
    }

    pub fn validate(&self) -> GridResult<()> {
        self.orientation.validate()?;
        self.confidence.validate()?;
        self.blending.validate()?;
        if self.blending.epsilon > self.confidence.epsilon {
            return Err(GridError::InvalidConfig(format!(
                "blending epsilon {} exceeds confidence epsilon {}",
                self.blending.epsilon, self.confidence.epsilon
            )));
        }
        if !self.null_value.is_finite() {
            return Err(GridError::InvalidConfig(
                "null_value must be finite".to_string(),
            ));
        }
        if self.tensor_fill.iter().any(|c| !c.is_finite()) {
            return Err(GridError::InvalidConfig(
                "tensor_fill coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read a [`PipelineConfig`] from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> GridResult<PipelineConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| GridError::ConfigLoad(format!("{}: {}", path.display(), e)))?;
    PipelineConfig::from_json_str(&text)
}

/// The three confidence volumes, one per principal direction: `c1` along
/// `w`, `c2` along `v` and `c3` along `u`.
#[derive(Debug, Clone)]
pub struct ConfidenceVolumes<F: GridFloat> {
    pub c1: Array3<F>,
    pub c2: Array3<F>,
    pub c3: Array3<F>,
}

impl<F: GridFloat> ConfidenceVolumes<F> {
    /// Same constant confidence in all three volumes.
    pub fn uniform(shape: (usize, usize, usize), value: F) -> Self {
        Self {
            c1: Array3::from_elem(shape, value),
            c2: Array3::from_elem(shape, value),
            c3: Array3::from_elem(shape, value),
        }
    }
}

/// Counters and convergence data gathered along the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDiagnostics {
    pub insert: InsertReport,
    pub solve: SolveReport,
    pub valid_voxels: usize,
    pub total_voxels: usize,
    /// Smallest and largest eigenvalue after confidence scaling.
    pub eigenvalue_range: (f64, f64),
    /// `(stage, milliseconds)`, filled only when profiling is enabled.
    pub stage_timings: Vec<(&'static str, f64)>,
}

/// Everything the pipeline publishes. Volumes share the image sampling.
#[derive(Debug, Clone)]
pub struct GriddingOutputs<F: GridFloat> {
    pub nearest: Volume<F>,
    pub distance: Volume<F>,
    pub blended: Volume<F>,
    pub tensors: EigenTensors3<F>,
    pub mask: VolumeMask,
    pub diagnostics: PipelineDiagnostics,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_flag(value: &str) -> bool {
    let v = value.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

fn resolve_profile_timing() -> bool {
    std::env::var(PROFILE_TIMING_ENV)
        .ok()
        .map(|value| parse_flag(&value))
        .unwrap_or(false)
}

/// Records stage durations when enabled.
struct StageTimer {
    enabled: bool,
    last: Instant,
    stages: Vec<(&'static str, f64)>,
}

impl StageTimer {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last: Instant::now(),
            stages: Vec::new(),
        }
    }

    fn lap(&mut self, stage: &'static str) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        let ms = now.duration_since(self.last).as_secs_f64() * 1000.0;
        log::debug!("guided_interp stage={} ms={:.3}", stage, ms);
        self.stages.push((stage, ms));
        self.last = now;
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

/// Grid scattered samples into the image volume, guided by its structure.
///
/// # Arguments
///
/// * `image` - Seismic image whose sampling defines the output grid
/// * `confidences` - Confidence volumes, consumed by eigenvalue scaling
/// * `samples` - Scattered samples in world coordinates
/// * `mask_source` - How to obtain the validity mask
/// * `config` - Pipeline parameters
///
/// # Errors
///
/// Shape mismatches and invalid configuration are reported before any
/// computation. [`GridError::NoSamples`] when no sample lands inside the
/// volume. Dropped samples and non-convergence are not errors; see
/// [`PipelineDiagnostics`].
pub fn run_guided_interpolation<F: GridFloat>(
    image: &Volume<F>,
    confidences: ConfidenceVolumes<F>,
    samples: &SampleSet,
    mask_source: MaskSource,
    config: &PipelineConfig,
) -> GridResult<GriddingOutputs<F>> {
    config.validate()?;
    let shape = image.shape();
    ensure_same_shape("confidence volume 1 vs image", shape, confidences.c1.dim())?;
    ensure_same_shape("confidence volume 2 vs image", shape, confidences.c2.dim())?;
    ensure_same_shape("confidence volume 3 vs image", shape, confidences.c3.dim())?;
    if let MaskSource::Precomputed(mask) = &mask_source {
        ensure_same_shape("precomputed mask vs image", shape, mask.shape())?;
    }

    let mut timer = StageTimer::new(resolve_profile_timing());
    log::info!(
        "run_guided_interpolation: volume {:?}, {} samples",
        shape,
        samples.len()
    );

    // Step 1: Validity mask
    let mask = match mask_source {
        MaskSource::FromImage => VolumeMask::from_thresholds(
            config.mask.small,
            config.mask.large,
            config.mask.sigma1,
            config.mask.sigma2,
            image.data.view(),
        )?,
        MaskSource::Precomputed(mask) => mask,
        MaskSource::Disabled => VolumeMask::all_valid(shape),
    };
    timer.lap("mask");

    // Step 2: Structure tensors, isotropic where the image is null
    let mut tensors = config.orientation.apply_for_tensors(image.data.view())?;
    mask.apply_to_tensors(config.tensor_fill, &mut tensors)?;
    timer.lap("tensors");

    // Step 3: Eigenvalues from confidences
    let ConfidenceVolumes { c1, c2, c3 } = confidences;
    tensors.scale_with_confidence(c1, c2, c3, Some(&mask), &config.confidence)?;
    let (lo, hi) = tensors.eigenvalue_range();
    timer.lap("scale");

    // Step 4: Insert samples
    let mut inserter = WellLogGridder::new(image.sampling);
    let insert = inserter.insert(samples);
    let sparse = inserter.into_gridded_values();
    timer.lap("insert");

    // Step 5: Nearest fill and blending
    let gridder = AnisotropicGridder::new(tensors, config.blending)?;
    let nearest = gridder.grid_nearest(&sparse)?;
    timer.lap("nearest");
    let mut distance = nearest.clipped_distance(config.blending.max_distance);
    let blended = gridder.grid_blended(distance.view(), nearest.values.view())?;
    timer.lap("blended");

    // Step 6: Terminal masking
    let null = F::from_f64_c(config.null_value);
    let mut nearest_values = nearest.values;
    let mut blended_values = blended.values;
    mask.apply(null, &mut nearest_values)?;
    mask.apply(null, &mut distance)?;
    mask.apply(null, &mut blended_values)?;
    timer.lap("publish");

    let diagnostics = PipelineDiagnostics {
        insert,
        solve: blended.report,
        valid_voxels: mask.valid_count(),
        total_voxels: shape.0 * shape.1 * shape.2,
        eigenvalue_range: (lo.as_f64(), hi.as_f64()),
        stage_timings: timer.stages,
    };
    if timer.enabled {
        let total: f64 = diagnostics.stage_timings.iter().map(|(_, ms)| ms).sum();
        log::info!(
            "guided_interp_profile size={:?} stages={:?} wall_ms={:.3}",
            shape,
            diagnostics.stage_timings,
            total
        );
    }
    log::info!(
        "run_guided_interpolation: inserted={} dropped={} valid_voxels={}/{} cg_iterations={} converged={}",
        diagnostics.insert.inserted,
        diagnostics.insert.dropped(),
        diagnostics.valid_voxels,
        diagnostics.total_voxels,
        diagnostics.solve.iterations,
        diagnostics.solve.converged
    );

    Ok(GriddingOutputs {
        nearest: image.with_data(nearest_values)?,
        distance: image.with_data(distance)?,
        blended: image.with_data(blended_values)?,
        tensors: gridder.into_tensors(),
        mask,
        diagnostics,
    })
}
