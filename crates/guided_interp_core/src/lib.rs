//! Guided Interpolation Core Library
//!
//! Pure Rust implementation of structure-tensor-guided gridding of sparse
//! well-log samples into 3D seismic volumes, plus depth-gain normalization.
//! This crate contains all algorithm logic without Python bindings.

mod blended;
pub mod error;
pub mod float_trait;
pub mod gain;
pub mod gridder;
pub mod inserter;
pub mod mask;
mod nearest;
pub mod orchestration;
pub mod sampling;
pub mod smoothing;
pub mod tensors;
pub mod well_logs;

// Re-export commonly used types at the crate root
pub use error::{GridError, GridResult};
pub use float_trait::GridFloat;
pub use gain::{gain, GainNormalizer};
pub use gridder::{AnisotropicGridder, BlendedGrid, BlendingConfig, NearestGrid, SolveReport};
pub use inserter::{InsertReport, SparseGrid, WellLogGridder};
pub use mask::{VolumeMask, IDENTITY_COEFFICIENTS};
pub use orchestration::{
    load_config, run_guided_interpolation, ConfidenceVolumes, GriddingOutputs, MaskSource,
    MaskThresholds, PipelineConfig, PipelineDiagnostics,
};
pub use sampling::{Sampling, Sampling3, Volume};
pub use smoothing::RecursiveExponentialFilter;
pub use tensors::{ConfidenceScaling, EigenTensors3, LocalOrientFilter, LocalTensor};
pub use well_logs::{
    gather_log_samples, GatherReport, LogCurve, Sample, SampleSet, WellLocations, WellLog,
};
