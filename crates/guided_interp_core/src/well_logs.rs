//! Well-log curves and their conversion into scattered samples.
//!
//! A well is logged along depth at a fixed map location. Map locations
//! are not carried by the logs themselves; they come from an explicit
//! [`WellLocations`] table keyed by well name.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One scattered measurement: `value` at depth `x1` and map position
/// `(x2, x3)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub x1: f64,
    pub x2: f64,
    pub x3: f64,
}

impl Sample {
    pub fn new(value: f64, x1: f64, x2: f64, x3: f64) -> Self {
        Self { value, x1, x2, x3 }
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.x1.is_finite() && self.x2.is_finite() && self.x3.is_finite()
    }
}

/// Ordered collection of samples. Insertion order matters: on voxel
/// collisions the later sample wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel arrays `(values, x1, x2, x3)`, truncating to the
    /// shortest.
    pub fn from_columns(values: &[f64], x1: &[f64], x2: &[f64], x3: &[f64]) -> Self {
        let samples = values
            .iter()
            .zip(x1)
            .zip(x2)
            .zip(x3)
            .map(|(((&f, &a), &b), &c)| Sample::new(f, a, b, c))
            .collect();
        Self { samples }
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Smallest and largest finite sample value.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.samples
            .iter()
            .map(|s| s.value)
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

impl FromIterator<Sample> for SampleSet {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SampleSet {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// A curve recorded along a well: `values[k]` measured at `depths[k]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogCurve {
    pub values: Vec<f64>,
    pub depths: Vec<f64>,
}

/// Named well with its curves keyed by label ("velocity", "density", ..).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WellLog {
    pub name: String,
    pub curves: FxHashMap<String, LogCurve>,
}

impl WellLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            curves: FxHashMap::default(),
        }
    }

    pub fn with_curve(
        mut self,
        label: impl Into<String>,
        values: Vec<f64>,
        depths: Vec<f64>,
    ) -> Self {
        let curve = LogCurve { values, depths };
        self.curves.insert(label.into(), curve);
        self
    }

    pub fn curve(&self, label: &str) -> Option<&LogCurve> {
        self.curves.get(label)
    }
}

/// Well name to map coordinates `(x2, x3)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WellLocations {
    locations: FxHashMap<String, (f64, f64)>,
}

impl WellLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, x2: f64, x3: f64) {
        self.locations.insert(name.into(), (x2, x3));
    }

    pub fn get(&self, name: &str) -> Option<(f64, f64)> {
        self.locations.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64, f64)> for WellLocations {
    fn from_iter<I: IntoIterator<Item = (S, f64, f64)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (name, x2, x3) in iter {
            out.insert(name, x2, x3);
        }
        out
    }
}

/// Result of [`gather_log_samples`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatherReport {
    pub samples: SampleSet,
    /// Wells carrying the curve but absent from the location table.
    pub missing_locations: Vec<String>,
    /// Wells that do not carry the curve.
    pub skipped_logs: Vec<String>,
    /// Wells whose value and depth arrays differed in length.
    pub truncated_logs: Vec<String>,
}

/// Collect every reading of `curve` from `logs` into one sample set,
/// placing each well at its tabulated map location.
pub fn gather_log_samples(
    logs: &[WellLog],
    curve: &str,
    locations: &WellLocations,
) -> GatherReport {
    let mut report = GatherReport::default();
    for log in logs {
        let Some(data) = log.curve(curve) else {
            report.skipped_logs.push(log.name.clone());
            continue;
        };
        let Some((x2, x3)) = locations.get(&log.name) else {
            log::warn!("gather_log_samples: no map location for well {}", log.name);
            report.missing_locations.push(log.name.clone());
            continue;
        };
        if data.values.len() != data.depths.len() {
            log::warn!(
                "gather_log_samples: well {} has {} values but {} depths, truncating",
                log.name,
                data.values.len(),
                data.depths.len()
            );
            report.truncated_logs.push(log.name.clone());
        }
        for (&value, &x1) in data.values.iter().zip(&data.depths) {
            report.samples.push(Sample::new(value, x1, x2, x3));
        }
    }
    log::debug!(
        "gather_log_samples: curve={} samples={} wells_missing_location={} wells_skipped={}",
        curve,
        report.samples.len(),
        report.missing_locations.len(),
        report.skipped_logs.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locations() -> WellLocations {
        [("A", 10.0, 20.0), ("B", 30.0, 40.0)].into_iter().collect()
    }

    #[test]
    fn test_gather_places_wells_at_their_locations() {
        let logs = vec![
            WellLog::new("A").with_curve("velocity", vec![2.0, 2.5], vec![100.0, 101.0]),
            WellLog::new("B").with_curve("velocity", vec![3.0], vec![200.0]),
        ];
        let report = gather_log_samples(&logs, "velocity", &locations());
        assert_eq!(report.samples.len(), 3);
        let gathered = report.samples.as_slice();
        assert_eq!(gathered[1], Sample::new(2.5, 101.0, 10.0, 20.0));
        assert_eq!(gathered[2], Sample::new(3.0, 200.0, 30.0, 40.0));
        assert!(report.missing_locations.is_empty());
        assert!(report.skipped_logs.is_empty());
    }

    #[test]
    fn test_gather_reports_missing_and_skipped() {
        let logs = vec![
            WellLog::new("A").with_curve("density", vec![1.0], vec![5.0]),
            WellLog::new("C").with_curve("velocity", vec![1.0], vec![5.0]),
            WellLog::new("B").with_curve("velocity", vec![4.0, 5.0, 6.0], vec![1.0, 2.0]),
        ];
        let report = gather_log_samples(&logs, "velocity", &locations());
        assert_eq!(report.skipped_logs, vec!["A".to_string()]);
        assert_eq!(report.missing_locations, vec!["C".to_string()]);
        assert_eq!(report.truncated_logs, vec!["B".to_string()]);
        assert_eq!(report.samples.len(), 2);
    }

    #[test]
    fn test_value_range_ignores_non_finite() {
        let set: SampleSet = vec![
            Sample::new(f64::NAN, 0.0, 0.0, 0.0),
            Sample::new(-1.0, 0.0, 0.0, 0.0),
            Sample::new(4.0, 0.0, 0.0, 0.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.value_range(), Some((-1.0, 4.0)));
        assert_eq!(SampleSet::new().value_range(), None);
    }

    #[test]
    fn test_from_columns_truncates() {
        let set = SampleSet::from_columns(&[1.0, 2.0, 3.0], &[0.0, 1.0], &[0.0; 3], &[0.0; 3]);
        assert_eq!(set.len(), 2);
    }
}
