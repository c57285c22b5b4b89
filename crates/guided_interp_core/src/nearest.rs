//! Nearest-sample fill under a tensor-guided distance.
//!
//! Multi-source Dijkstra over the 26-neighborhood of the voxel grid. The
//! cost of a step `d` between voxels `a` and `b` is the trapezoid
//! `0.5 * (|d|_a + |d|_b)` with `|d|_x = sqrt(dᵀ D_x⁻¹ d)`, so steps along
//! directions of large eigenvalue are cheap.
//!
//! Frontier entries are ordered by `(distance, source)`, which makes the
//! result independent of heap internals: every voxel takes the nearest
//! source, and among equally near sources the one with the lowest linear
//! index.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ndarray::{Array3, Zip};

use crate::error::{ensure_same_shape, GridError, GridResult};
use crate::float_trait::GridFloat;
use crate::gridder::NearestGrid;
use crate::inserter::SparseGrid;
use crate::tensors::EigenTensors3;

/// Marker for voxels not yet reached by any source.
const NO_SOURCE: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Front {
    distance: f64,
    source: usize,
    node: usize,
}

impl Eq for Front {}

impl Ord for Front {
    // Reversed so BinaryHeap pops the smallest (distance, source) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.source.cmp(&self.source))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Front {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `(d3, d2, d1)` offsets of the 26-neighborhood.
fn neighbor_offsets() -> Vec<(isize, isize, isize)> {
    let mut offsets = Vec::with_capacity(26);
    for d3 in -1..=1 {
        for d2 in -1..=1 {
            for d1 in -1..=1 {
                if (d3, d2, d1) != (0, 0, 0) {
                    offsets.push((d3, d2, d1));
                }
            }
        }
    }
    offsets
}

#[inline]
fn metric_length(inv: &[f64; 6], d: [f64; 3]) -> f64 {
    let q = inv[0] * d[0] * d[0]
        + inv[3] * d[1] * d[1]
        + inv[5] * d[2] * d[2]
        + 2.0 * (inv[1] * d[0] * d[1] + inv[2] * d[0] * d[2] + inv[4] * d[1] * d[2]);
    q.max(0.0).sqrt()
}

/// Fill every voxel from its nearest known sample.
///
/// Tensors must have strictly positive eigenvalues.
pub(crate) fn nearest_fill<F: GridFloat>(
    tensors: &EigenTensors3<F>,
    sparse: &SparseGrid<F>,
) -> GridResult<NearestGrid<F>> {
    let shape = tensors.shape();
    ensure_same_shape("sparse grid vs tensors", shape, sparse.shape())?;
    let sources = sparse.known_indices();
    if sources.is_empty() {
        return Err(GridError::NoSamples);
    }

    let (n3, n2, n1) = shape;
    let n = n1 * n2 * n3;

    let mut inverse = Array3::from_elem(shape, [0.0f64; 6]);
    Zip::from(&mut inverse)
        .and(tensors.tensors())
        .par_for_each(|inv, t| *inv = t.inverse_coefficients());
    let inverse: Vec<[f64; 6]> = inverse.iter().copied().collect();

    let mut best = vec![f64::INFINITY; n];
    let mut source_of = vec![NO_SOURCE; n];
    let mut heap = BinaryHeap::with_capacity(sources.len() * 4);
    for &s in &sources {
        best[s] = 0.0;
        source_of[s] = s;
        heap.push(Front {
            distance: 0.0,
            source: s,
            node: s,
        });
    }

    let offsets = neighbor_offsets();
    let mut settled = 0usize;
    while let Some(Front {
        distance,
        source,
        node,
    }) = heap.pop()
    {
        if distance != best[node] || source != source_of[node] {
            continue;
        }
        settled += 1;
        let i1 = node % n1;
        let i2 = (node / n1) % n2;
        let i3 = node / (n1 * n2);
        for &(d3, d2, d1) in &offsets {
            let (j3, j2, j1) = (i3 as isize + d3, i2 as isize + d2, i1 as isize + d1);
            if j3 < 0 || j2 < 0 || j1 < 0 {
                continue;
            }
            let (j3, j2, j1) = (j3 as usize, j2 as usize, j1 as usize);
            if j3 >= n3 || j2 >= n2 || j1 >= n1 {
                continue;
            }
            let next = j1 + n1 * (j2 + n2 * j3);
            let d = [d1 as f64, d2 as f64, d3 as f64];
            let here = metric_length(&inverse[node], d);
            let there = metric_length(&inverse[next], d);
            let candidate = distance + 0.5 * (here + there);
            if candidate < best[next] || (candidate == best[next] && source < source_of[next]) {
                best[next] = candidate;
                source_of[next] = source;
                heap.push(Front {
                    distance: candidate,
                    source,
                    node: next,
                });
            }
        }
    }
    log::debug!(
        "nearest_fill: {} sources, {} voxels settled",
        sources.len(),
        settled
    );

    let seed: Vec<F> = sparse.values.iter().copied().collect();
    let linear = |(i3, i2, i1): (usize, usize, usize)| i1 + n1 * (i2 + n2 * i3);
    Ok(NearestGrid {
        values: Array3::from_shape_fn(shape, |idx| seed[source_of[linear(idx)]]),
        distance: Array3::from_shape_fn(shape, |idx| F::from_f64_c(best[linear(idx)])),
        sources: Array3::from_shape_fn(shape, |idx| source_of[linear(idx)]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isotropic(shape: (usize, usize, usize)) -> EigenTensors3<f64> {
        EigenTensors3::isotropic(shape)
    }

    #[test]
    fn test_single_source_fills_everything() {
        let shape = (5, 5, 5);
        let mut sparse = SparseGrid::<f64>::empty(shape);
        sparse.values[[2, 2, 2]] = 10.0;
        sparse.known[[2, 2, 2]] = true;
        let out = nearest_fill(&isotropic(shape), &sparse).unwrap();
        assert!(out.values.iter().all(|&v| v == 10.0));
        assert_eq!(out.distance[[2, 2, 2]], 0.0);
        assert!((out.distance[[2, 2, 3]] - 1.0).abs() < 1e-12);
        assert!((out.distance[[2, 3, 3]] - 2f64.sqrt()).abs() < 1e-12);
        assert!((out.distance[[3, 3, 3]] - 3f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_distance_monotone_in_euclidean_distance() {
        let shape = (5, 5, 5);
        let mut sparse = SparseGrid::<f64>::empty(shape);
        sparse.values[[2, 2, 2]] = 10.0;
        sparse.known[[2, 2, 2]] = true;
        let out = nearest_fill(&isotropic(shape), &sparse).unwrap();
        let points: Vec<(f64, f64)> = out.distance
            .indexed_iter()
            .map(|((i3, i2, i1), &d)| {
                let offset = [i3, i2, i1].map(|i| i as f64 - 2.0);
                let e = offset.iter().map(|x| x * x).sum::<f64>().sqrt();
                (e, d)
            })
            .collect();
        for &(ea, da) in &points {
            for &(eb, db) in &points {
                if ea < eb - 1e-9 {
                    assert!(da <= db + 1e-9, "{} -> {}, {} -> {}", ea, da, eb, db);
                }
            }
        }
    }

    #[test]
    fn test_line_splits_at_midpoint() {
        let shape = (1, 1, 10);
        let mut sparse = SparseGrid::<f32>::empty(shape);
        sparse.values[[0, 0, 0]] = 0.0;
        sparse.known[[0, 0, 0]] = true;
        sparse.values[[0, 0, 9]] = 100.0;
        sparse.known[[0, 0, 9]] = true;
        let out = nearest_fill(&EigenTensors3::isotropic(shape), &sparse).unwrap();
        for i1 in 0..10 {
            let expected = if i1 < 5 { 0.0 } else { 100.0 };
            assert_eq!(out.values[[0, 0, i1]], expected, "voxel {}", i1);
        }
        assert_eq!(out.distance[[0, 0, 9]], 0.0);
        assert_eq!(out.distance[[0, 0, 4]], 4.0);
    }

    #[test]
    fn test_ties_go_to_lowest_source_index() {
        let shape = (1, 1, 5);
        let mut sparse = SparseGrid::<f64>::empty(shape);
        sparse.values[[0, 0, 0]] = 1.0;
        sparse.known[[0, 0, 0]] = true;
        sparse.values[[0, 0, 4]] = 2.0;
        sparse.known[[0, 0, 4]] = true;
        let out = nearest_fill(&isotropic(shape), &sparse).unwrap();
        assert_eq!(out.values[[0, 0, 2]], 1.0);
        assert_eq!(out.sources[[0, 0, 2]], 0);
    }

    #[test]
    fn test_anisotropy_prefers_cheap_direction() {
        // u along axis 1 with small eigenvalue: crossing layers costs 10x.
        let shape = (1, 9, 9);
        let tensors = EigenTensors3::<f64>::uniform(
            shape,
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.01, 1.0, 1.0],
        );
        let mut sparse = SparseGrid::<f64>::empty(shape);
        sparse.values[[0, 4, 0]] = 1.0;
        sparse.known[[0, 4, 0]] = true;
        sparse.values[[0, 0, 4]] = 2.0;
        sparse.known[[0, 0, 4]] = true;
        let out = nearest_fill(&tensors, &sparse).unwrap();
        // (i2=4, i1=3) is 3 steps across layers from the first source but
        // mostly along layers from the second.
        assert_eq!(out.values[[0, 4, 3]], 2.0);
        assert!((out.distance[[0, 0, 0]] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_samples_is_an_error() {
        let shape = (2, 2, 2);
        let sparse = SparseGrid::<f32>::empty(shape);
        assert_eq!(
            nearest_fill(&EigenTensors3::isotropic(shape), &sparse).unwrap_err(),
            GridError::NoSamples
        );
    }
}
