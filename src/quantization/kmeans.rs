//! Lloyd's-algorithm k-means over fixed-width subvectors.
//!
//! Used by [`super::ProductQuantizer::train`] to learn one sub-codebook per
//! PQ slot. Deliberately single-purpose (no k-means++ seeding, no elkan
//! pruning) — the caller already bounds the training set to at most
//! `256 * k` points (spec §4.B), so a handful of Lloyd iterations over a
//! modest point count is cheap enough that a fancier seeding strategy isn't
//! worth the complexity.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use crate::vector_ops;

/// Runs k-means on `points` (row-major, `n` rows of width `dim`), returning
/// the `k` learned centroids flattened the same way.
///
/// Splits the largest cluster into any cluster that goes empty during
/// Lloyd reassignment, per spec §7 ("Training convergence issues ...
/// resolved locally by splitting the largest cluster; logged but not
/// surfaced").
pub fn train(points: &[f32], n: usize, dim: usize, k: usize, max_iterations: usize, seed: u64) -> Vec<f32> {
    debug_assert_eq!(points.len(), n * dim);
    let mut rng = StdRng::seed_from_u64(seed);

    let init_indices = sample(&mut rng, n, k.min(n));
    let mut centroids = vec![0.0f32; k * dim];
    for (c, idx) in init_indices.iter().enumerate() {
        centroids[c * dim..(c + 1) * dim].copy_from_slice(&points[idx * dim..(idx + 1) * dim]);
    }
    // If n < k (shouldn't happen given the caller's InsufficientTrainingData
    // guard, but keep this total), pad remaining centroids by cycling.
    for c in init_indices.len()..k {
        let src = c % n.max(1);
        centroids[c * dim..(c + 1) * dim].copy_from_slice(&points[src * dim..(src + 1) * dim]);
    }

    let mut assignments = vec![0u32; n];
    for _iter in 0..max_iterations {
        let mut changed = false;
        for i in 0..n {
            let p = &points[i * dim..(i + 1) * dim];
            let mut best = 0u32;
            let mut best_dist = f32::INFINITY;
            for c in 0..k {
                let cen = &centroids[c * dim..(c + 1) * dim];
                let dist = vector_ops::l2sqr(p, cen, dim);
                if dist < best_dist {
                    best_dist = dist;
                    best = c as u32;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        let mut sums = vec![0.0f32; k * dim];
        let mut counts = vec![0u32; k];
        for i in 0..n {
            let c = assignments[i] as usize;
            let p = &points[i * dim..(i + 1) * dim];
            vector_ops::add_into(&mut sums[c * dim..(c + 1) * dim], p, dim);
            counts[c] += 1;
        }

        let empty: Vec<usize> = (0..k).filter(|&c| counts[c] == 0).collect();
        if !empty.is_empty() {
            tracing::info!(count = empty.len(), "k-means: splitting empty clusters from the largest cluster");
        }
        for &c in &empty {
            let largest = (0..k).max_by_key(|&c2| counts[c2]).unwrap();
            // Perturb the donated centroid so it doesn't sit exactly on top
            // of `largest`'s: an unperturbed copy ties on distance with the
            // donor every time, so the next Lloyd pass reassigns nothing to
            // `c` and it re-empties instead of actually splitting.
            let donor_point: Vec<f32> = sums[largest * dim..(largest + 1) * dim]
                .iter()
                .map(|s| {
                    let mean = s / counts[largest].max(1) as f32;
                    let jitter = (rng.gen::<f32>() * 2.0 - 1.0) * (0.01 * mean.abs() + 1e-4);
                    mean + jitter
                })
                .collect();
            sums[c * dim..(c + 1) * dim].copy_from_slice(&donor_point);
            counts[c] = 1;
        }

        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            for j in 0..dim {
                centroids[c * dim + j] = sums[c * dim + j] / counts[c] as f32;
            }
        }

        if !changed && _iter > 0 {
            break;
        }
    }

    centroids
}
