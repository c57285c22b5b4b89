//! PyO3 Python bindings for guided interpolation.
//!
//! This crate provides thin Python bindings for the guided_interp_core
//! library. All algorithm logic is in guided_interp_core; this crate only
//! handles Python/NumPy type conversions. Volumes are float32 arrays of
//! shape (n3, n2, n1) with axis 1 (depth) last.

use numpy::{PyArray3, PyReadonlyArray1, PyReadonlyArray3, ToPyArray};
use pyo3::prelude::*;

use guided_interp_core::{
    gain, run_guided_interpolation, ConfidenceVolumes, GridError, MaskSource, PipelineConfig,
    Sampling, Sampling3, SampleSet, Volume, VolumeMask,
};

fn to_py_err(e: GridError) -> PyErr {
    pyo3::exceptions::PyValueError::new_err(e.to_string())
}

/// Depth-gain normalization of a 3D image.
#[pyfunction]
#[pyo3(signature = (image, sigma = 100.0))]
pub fn gain_normalize<'py>(
    py: Python<'py>,
    image: PyReadonlyArray3<f32>,
    sigma: f64,
) -> PyResult<&'py PyArray3<f32>> {
    let input = image.as_array().to_owned();
    let result = py.allow_threads(|| gain(input.view(), sigma));
    let output = result.map_err(to_py_err)?;
    Ok(output.to_pyarray(py))
}

/// Amplitude-threshold validity mask as a 0/1 float32 volume.
#[pyfunction]
#[pyo3(signature = (image, small = 0.1, large = 10.0, sigma1 = 1.0, sigma2 = 1.0))]
pub fn compute_mask<'py>(
    py: Python<'py>,
    image: PyReadonlyArray3<f32>,
    small: f64,
    large: f64,
    sigma1: f64,
    sigma2: f64,
) -> PyResult<&'py PyArray3<f32>> {
    let input = image.as_array().to_owned();
    let result = py.allow_threads(|| {
        VolumeMask::from_thresholds(small, large, sigma1, sigma2, input.view())
    });
    let mask = result.map_err(to_py_err)?;
    Ok(mask.as_floats::<f32>().to_pyarray(py))
}

/// Grid well-log samples into the image volume.
///
/// Returns `(nearest, distance, blended)`. Sample coordinates are in the
/// world units defined by `origin` and `spacing`, both ordered (x1, x2, x3).
#[pyfunction]
#[pyo3(signature = (image, c1, c2, c3, values, x1, x2, x3, origin = (0.0, 0.0, 0.0), spacing = (1.0, 1.0, 1.0), mask = None, config_json = None))]
#[allow(clippy::too_many_arguments)]
pub fn image_guided_interpolation<'py>(
    py: Python<'py>,
    image: PyReadonlyArray3<f32>,
    c1: PyReadonlyArray3<f32>,
    c2: PyReadonlyArray3<f32>,
    c3: PyReadonlyArray3<f32>,
    values: PyReadonlyArray1<f64>,
    x1: PyReadonlyArray1<f64>,
    x2: PyReadonlyArray1<f64>,
    x3: PyReadonlyArray1<f64>,
    origin: (f64, f64, f64),
    spacing: (f64, f64, f64),
    mask: Option<PyReadonlyArray3<f32>>,
    config_json: Option<&str>,
) -> PyResult<(&'py PyArray3<f32>, &'py PyArray3<f32>, &'py PyArray3<f32>)> {
    let config = match config_json {
        Some(json) => PipelineConfig::from_json_str(json).map_err(to_py_err)?,
        None => PipelineConfig::default(),
    };

    let data = image.as_array().to_owned();
    let (n3, n2, n1) = data.dim();
    let sampling = Sampling3::new(
        Sampling::new(n1, spacing.0, origin.0).map_err(to_py_err)?,
        Sampling::new(n2, spacing.1, origin.1).map_err(to_py_err)?,
        Sampling::new(n3, spacing.2, origin.2).map_err(to_py_err)?,
    );
    let volume = Volume::new(sampling, data).map_err(to_py_err)?;

    let confidences = ConfidenceVolumes {
        c1: c1.as_array().to_owned(),
        c2: c2.as_array().to_owned(),
        c3: c3.as_array().to_owned(),
    };
    let samples = SampleSet::from_columns(
        values.as_slice()?,
        x1.as_slice()?,
        x2.as_slice()?,
        x3.as_slice()?,
    );
    let mask_source = match mask {
        Some(m) => MaskSource::Precomputed(VolumeMask::from_volume(m.as_array())),
        None => MaskSource::FromImage,
    };

    let result = py.allow_threads(|| {
        run_guided_interpolation(&volume, confidences, &samples, mask_source, &config)
    });
    let outputs = result.map_err(to_py_err)?;

    Ok((
        outputs.nearest.data.to_pyarray(py),
        outputs.distance.data.to_pyarray(py),
        outputs.blended.data.to_pyarray(py),
    ))
}

#[pymodule]
fn guided_interp_rust(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(gain_normalize, m)?)?;
    m.add_function(wrap_pyfunction!(compute_mask, m)?)?;
    m.add_function(wrap_pyfunction!(image_guided_interpolation, m)?)?;
    Ok(())
}
