//! Error types shared by every stage of the gridding pipeline.

use thiserror::Error;

/// Result type for gridding operations
pub type GridResult<T> = Result<T, GridError>;

/// Fatal conditions that abort a stage before it computes anything.
///
/// Recoverable conditions (dropped samples, non-convergence of the blended
/// solve) are reported through diagnostics structs instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    /// Two volumes that must share a grid do not.
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    /// Sampling metadata disagrees with the data it describes.
    #[error("Sampling mismatch: {0}")]
    SamplingMismatch(String),

    /// A tensor eigenvalue outside `[epsilon, 1]` reached the gridder.
    #[error(
        "Ill-conditioned tensor at (i3={i3}, i2={i2}, i1={i1}): eigenvalue {value} outside [{min}, 1]"
    )]
    IllConditionedTensor {
        i3: usize,
        i2: usize,
        i1: usize,
        value: f64,
        min: f64,
    },

    /// Eigenvalue input volume carried a negative or non-finite value.
    #[error("Invalid eigenvalue {value} at (i3={i3}, i2={i2}, i1={i1})")]
    InvalidEigenvalue {
        i3: usize,
        i2: usize,
        i1: usize,
        value: f64,
    },

    /// Nearest-neighbor gridding needs at least one known sample.
    #[error("No samples available for gridding")]
    NoSamples,

    /// Configuration failed validation.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Configuration could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),
}

impl GridError {
    pub(crate) fn shape_mismatch(
        what: impl Into<String>,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    ) -> Self {
        GridError::ShapeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

/// Fail with [`GridError::ShapeMismatch`] unless both shapes agree.
pub(crate) fn ensure_same_shape(
    what: &str,
    expected: (usize, usize, usize),
    actual: (usize, usize, usize),
) -> GridResult<()> {
    if expected != actual {
        return Err(GridError::shape_mismatch(what, expected, actual));
    }
    Ok(())
}
