//! Insertion of scattered samples into a dense sparse grid.

use ndarray::{Array3, ArrayView3, Zip};

use crate::error::GridResult;
use crate::float_trait::GridFloat;
use crate::sampling::{Sampling3, Volume};
use crate::well_logs::SampleSet;

/// Counters describing one call to [`WellLogGridder::insert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    pub dropped_out_of_bounds: usize,
    pub dropped_non_finite: usize,
    /// Samples that overwrote an earlier sample in the same voxel.
    pub collisions: usize,
}

impl InsertReport {
    pub fn dropped(&self) -> usize {
        self.dropped_out_of_bounds + self.dropped_non_finite
    }
}

/// Dense values plus a per-voxel flag marking which voxels hold a sample.
///
/// Zero is a legitimate sample value; only `known` says whether a voxel
/// carries data.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseGrid<F: GridFloat> {
    pub values: Array3<F>,
    pub known: Array3<bool>,
}

impl<F: GridFloat> SparseGrid<F> {
    pub fn empty(shape: (usize, usize, usize)) -> Self {
        Self {
            values: Array3::zeros(shape),
            known: Array3::from_elem(shape, false),
        }
    }

    /// Interpret voxels equal to `null` as empty.
    pub fn from_sentinel(null: F, volume: ArrayView3<F>) -> Self {
        Self {
            values: volume.to_owned(),
            known: volume.mapv(|x| x != null),
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    pub fn known_count(&self) -> usize {
        self.known.iter().filter(|&&k| k).count()
    }

    /// Render with `null` at every unknown voxel.
    pub fn to_sentinel(&self, null: F) -> Array3<F> {
        let mut out = self.values.clone();
        Zip::from(&mut out).and(&self.known).for_each(|x, &k| {
            if !k {
                *x = null;
            }
        });
        out
    }

    /// Linear indices `i1 + n1*(i2 + n2*i3)` of the known voxels, ascending.
    pub(crate) fn known_indices(&self) -> Vec<usize> {
        self.known
            .iter()
            .enumerate()
            .filter_map(|(k, &known)| known.then_some(k))
            .collect()
    }
}

/// Accumulates scattered samples into voxels of a fixed sampling.
#[derive(Debug, Clone)]
pub struct WellLogGridder<F: GridFloat> {
    sampling: Sampling3,
    grid: SparseGrid<F>,
}

impl<F: GridFloat> WellLogGridder<F> {
    pub fn new(sampling: Sampling3) -> Self {
        Self {
            grid: SparseGrid::empty(sampling.shape()),
            sampling,
        }
    }

    pub fn sampling(&self) -> &Sampling3 {
        &self.sampling
    }

    /// Place each sample at its nearest voxel. Later samples overwrite
    /// earlier ones in the same voxel.
    pub fn insert(&mut self, samples: &SampleSet) -> InsertReport {
        let mut report = InsertReport::default();
        for sample in samples {
            if !sample.is_finite() {
                report.dropped_non_finite += 1;
                continue;
            }
            let voxel = self.sampling.voxel_of(sample.x1, sample.x2, sample.x3);
            let Some((i3, i2, i1)) = voxel else {
                report.dropped_out_of_bounds += 1;
                continue;
            };
            let idx = [i3, i2, i1];
            if self.grid.known[idx] {
                report.collisions += 1;
            }
            self.grid.values[idx] = F::from_f64_c(sample.value);
            self.grid.known[idx] = true;
            report.inserted += 1;
        }
        if report.dropped() > 0 {
            log::warn!(
                "WellLogGridder::insert: dropped {} of {} samples ({} out of bounds, {} non-finite)",
                report.dropped(),
                samples.len(),
                report.dropped_out_of_bounds,
                report.dropped_non_finite
            );
        }
        log::debug!(
            "WellLogGridder::insert: inserted={} collisions={}",
            report.inserted,
            report.collisions
        );
        report
    }

    pub fn gridded_values(&self) -> &SparseGrid<F> {
        &self.grid
    }

    pub fn into_gridded_values(self) -> SparseGrid<F> {
        self.grid
    }

    /// Sentinel rendering of the grid as a sampled volume.
    pub fn gridded_volume(&self, null: F) -> GridResult<Volume<F>> {
        Volume::new(self.sampling, self.grid.to_sentinel(null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::Sampling;
    use crate::well_logs::Sample;

    fn sampling() -> Sampling3 {
        Sampling3::new(
            Sampling::new(10, 0.5, 100.0).unwrap(),
            Sampling::new(4, 25.0, 1000.0).unwrap(),
            Sampling::new(3, 25.0, 2000.0).unwrap(),
        )
    }

    #[test]
    fn test_insert_rounds_to_nearest_voxel() {
        let mut g = WellLogGridder::<f32>::new(sampling());
        let samples: SampleSet = vec![Sample::new(3.5, 101.2, 1049.0, 2030.0)]
            .into_iter()
            .collect();
        let report = g.insert(&samples);
        assert_eq!(report.inserted, 1);
        let grid = g.gridded_values();
        assert!(grid.known[[1, 2, 2]]);
        assert_eq!(grid.values[[1, 2, 2]], 3.5);
        assert_eq!(grid.known_count(), 1);
    }

    #[test]
    fn test_insert_last_sample_wins_and_counts_collisions() {
        let mut g = WellLogGridder::<f64>::new(sampling());
        let samples: SampleSet = vec![
            Sample::new(1.0, 100.0, 1000.0, 2000.0),
            Sample::new(2.0, 100.1, 1001.0, 2001.0),
        ]
        .into_iter()
        .collect();
        let report = g.insert(&samples);
        assert_eq!(report.collisions, 1);
        assert_eq!(g.gridded_values().values[[0, 0, 0]], 2.0);
    }

    #[test]
    fn test_insert_drops_out_of_bounds_and_non_finite() {
        let mut g = WellLogGridder::<f32>::new(sampling());
        let samples: SampleSet = vec![
            Sample::new(1.0, 50.0, 1000.0, 2000.0),
            Sample::new(1.0, 100.0, 1000.0, 9999.0),
            Sample::new(f64::NAN, 100.0, 1000.0, 2000.0),
            Sample::new(0.0, 100.0, 1000.0, 2000.0),
        ]
        .into_iter()
        .collect();
        let report = g.insert(&samples);
        assert_eq!(report.dropped_out_of_bounds, 2);
        assert_eq!(report.dropped_non_finite, 1);
        assert_eq!(report.inserted, 1);
        // a zero-valued sample is still known
        assert!(g.gridded_values().known[[0, 0, 0]]);
    }

    #[test]
    fn test_sentinel_roundtrip_distinguishes_known_zero() {
        let mut g = WellLogGridder::<f32>::new(sampling());
        let samples: SampleSet = vec![Sample::new(0.0, 100.0, 1000.0, 2000.0)]
            .into_iter()
            .collect();
        g.insert(&samples);
        let rendered = g.gridded_values().to_sentinel(-999.0);
        assert_eq!(rendered[[0, 0, 0]], 0.0);
        assert_eq!(rendered[[0, 0, 1]], -999.0);
        let back = SparseGrid::from_sentinel(-999.0, rendered.view());
        assert_eq!(back.known, g.gridded_values().known);
        let volume = g.gridded_volume(-999.0).unwrap();
        assert_eq!(volume.shape(), (3, 4, 10));
    }

    #[test]
    fn test_known_indices_are_linear_and_sorted() {
        let mut grid = SparseGrid::<f32>::empty((2, 2, 3));
        grid.known[[1, 0, 2]] = true;
        grid.known[[0, 1, 0]] = true;
        assert_eq!(grid.known_indices(), vec![3, 8]);
    }
}
