//! Product quantization (spec component B).
//!
//! A [`ProductQuantizer`] slices a `d`-dimensional vector into `m` equal
//! subvectors and independently vector-quantizes each with its own
//! `k = 2^nbits` sub-codebook. The norm quantizer used by
//! [`crate::index::IndexCore`] is just a `ProductQuantizer` with `d = m = 1`.

mod kmeans;

use crate::error::{IvfHnswError, Result};
use crate::vector_ops;

/// Maximum training points kept per PQ slot before deterministic subsampling
/// kicks in (spec §4.B: "≤ 256·K training points per slice").
const MAX_TRAINING_POINTS_PER_SLOT_FACTOR: usize = 256;
const MAX_KMEANS_ITERATIONS: usize = 25;

#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    d: usize,
    m: usize,
    dsub: usize,
    nbits: u32,
    k: usize,
    /// Flattened `[m, k, dsub]` codebook; slot `m`'s centroid `k` occupies
    /// `codebook[(m * k + k_idx) * dsub .. +dsub]`.
    codebook: Vec<f32>,
    trained: bool,
    seed: u64,
}

impl ProductQuantizer {
    /// Creates an untrained quantizer. `d` must be divisible by `m`
    /// (spec §3 invariant `M·dsub = d`).
    pub fn new(d: usize, m: usize, nbits: u32, seed: u64) -> Self {
        assert_eq!(d % m, 0, "d must be divisible by m");
        let dsub = d / m;
        let k = 1usize << nbits;
        ProductQuantizer {
            d,
            m,
            dsub,
            nbits,
            k,
            codebook: vec![0.0; m * k * dsub],
            trained: false,
            seed,
        }
    }

    pub fn d(&self) -> usize {
        self.d
    }
    pub fn m(&self) -> usize {
        self.m
    }
    pub fn dsub(&self) -> usize {
        self.dsub
    }
    pub fn nbits(&self) -> u32 {
        self.nbits
    }
    pub fn k(&self) -> usize {
        self.k
    }
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Trains each of the `m` sub-quantizers independently on its slice of
    /// `samples` (row-major, `n` rows of width `d`).
    ///
    /// At most `25` Lloyd iterations and `256 * k` points per slot are used;
    /// when `n` exceeds that cap the training set is subsampled
    /// deterministically (a fixed stride over the input, not random) so that
    /// repeated training on the same input is reproducible.
    pub fn train(&mut self, samples: &[f32], n: usize) -> Result<()> {
        if n < self.k {
            return Err(IvfHnswError::InsufficientTrainingData {
                required: self.k,
                actual: n,
            });
        }
        debug_assert_eq!(samples.len(), n * self.d);

        let cap = MAX_TRAINING_POINTS_PER_SLOT_FACTOR * self.k;
        let use_n = n.min(cap);
        let stride = if n > cap { n / use_n } else { 1 };

        for slot in 0..self.m {
            let mut slot_points = Vec::with_capacity(use_n * self.dsub);
            let mut taken = 0;
            let mut i = 0;
            while taken < use_n && i < n {
                let row = &samples[i * self.d + slot * self.dsub..i * self.d + (slot + 1) * self.dsub];
                slot_points.extend_from_slice(row);
                taken += 1;
                i += stride;
            }

            let slot_seed = self.seed ^ (0x9E3779B97F4A7C15u64.wrapping_mul(slot as u64 + 1));
            let centroids = kmeans::train(
                &slot_points,
                taken,
                self.dsub,
                self.k,
                MAX_KMEANS_ITERATIONS,
                slot_seed,
            );
            self.codebook[slot * self.k * self.dsub..(slot + 1) * self.k * self.dsub]
                .copy_from_slice(&centroids);
        }

        self.trained = true;
        Ok(())
    }

    fn slot_codebook(&self, slot: usize) -> &[f32] {
        &self.codebook[slot * self.k * self.dsub..(slot + 1) * self.k * self.dsub]
    }

    fn centroid(&self, slot: usize, code: u8) -> &[f32] {
        let base = slot * self.k * self.dsub + (code as usize) * self.dsub;
        &self.codebook[base..base + self.dsub]
    }

    /// Encodes `vec` (length `d`) into one byte per slot: for slot `m`, the
    /// index of the nearest sub-centroid by squared L2 distance.
    pub fn encode(&self, vec: &[f32]) -> Result<Vec<u8>> {
        if vec.len() != self.d {
            return Err(IvfHnswError::DimensionMismatch {
                expected: self.d,
                actual: vec.len(),
            });
        }
        let mut code = vec![0u8; self.m];
        for slot in 0..self.m {
            let sub = &vec[slot * self.dsub..(slot + 1) * self.dsub];
            let cb = self.slot_codebook(slot);
            let mut best = 0u8;
            let mut best_dist = f32::INFINITY;
            for c in 0..self.k {
                let cen = &cb[c * self.dsub..(c + 1) * self.dsub];
                let dist = vector_ops::l2sqr(sub, cen, self.dsub);
                if dist < best_dist {
                    best_dist = dist;
                    best = c as u8;
                }
            }
            code[slot] = best;
        }
        Ok(code)
    }

    /// Reconstructs a `d`-length vector by concatenating each slot's chosen
    /// centroid.
    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>> {
        if code.len() != self.m {
            return Err(IvfHnswError::DimensionMismatch {
                expected: self.m,
                actual: code.len(),
            });
        }
        let mut out = Vec::with_capacity(self.d);
        for slot in 0..self.m {
            out.extend_from_slice(self.centroid(slot, code[slot]));
        }
        Ok(out)
    }

    /// Builds the per-slot inner-product table for `q`: `table[m*k + c] =
    /// <q_m, codebook[m, c]>`. This is the precomputation that makes the
    /// asymmetric scan in `IndexCore::search` a table lookup per slot
    /// (spec §4.B "Scoring identity").
    pub fn inner_prod_table(&self, q: &[f32]) -> Result<Vec<f32>> {
        if q.len() != self.d {
            return Err(IvfHnswError::DimensionMismatch {
                expected: self.d,
                actual: q.len(),
            });
        }
        let mut table = vec![0.0f32; self.m * self.k];
        for slot in 0..self.m {
            let qsub = &q[slot * self.dsub..(slot + 1) * self.dsub];
            let cb = self.slot_codebook(slot);
            for c in 0..self.k {
                let cen = &cb[c * self.dsub..(c + 1) * self.dsub];
                table[slot * self.k + c] = vector_ops::dot(qsub, cen, self.dsub);
            }
        }
        Ok(table)
    }

    /// Raw codebook accessor for persistence (spec §6 sidecar format).
    pub fn codebook(&self) -> &[f32] {
        &self.codebook
    }

    /// Reconstructs a quantizer from a previously-trained codebook, e.g.
    /// when loading the sidecar file (spec §6).
    pub fn from_parts(d: usize, m: usize, nbits: u32, codebook: Vec<f32>) -> Result<Self> {
        let dsub = d / m;
        let k = 1usize << nbits;
        if codebook.len() != m * k * dsub {
            return Err(IvfHnswError::malformed(
                "ProductQuantizer::from_parts",
                format!(
                    "codebook length {} does not match m*k*dsub = {}",
                    codebook.len(),
                    m * k * dsub
                ),
            ));
        }
        Ok(ProductQuantizer {
            d,
            m,
            dsub,
            nbits,
            k,
            codebook,
            trained: true,
            seed: 0,
        })
    }
}
