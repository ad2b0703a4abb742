//! Runtime configuration (spec §6 "Runtime configuration").
//!
//! Distinct from the on-disk index/quantizer formats in [`crate::persistence`]:
//! this is the tuning surface a caller sets before build/query, round-trippable
//! as JSON so it can live alongside a deployment's other config.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Vector dimension.
    pub d: usize,
    /// Number of coarse centroids.
    pub c: usize,
    /// Residual-PQ slot count (`M`); must divide `d`.
    pub pq_m: usize,
    /// Bits per PQ slot (`K = 2^nbits`); spec says "always 8 in practice".
    pub pq_nbits: u32,
    /// Cells scanned per query. Default 16, in `[1, C]`.
    pub nprobe: usize,
    /// Soft cap on candidates examined per query. Default 10000.
    pub max_codes: usize,
    /// HNSW dynamic-list width at query time.
    pub ef_search: usize,
    /// HNSW dynamic-list width during insertion. Default 240.
    pub ef_construction: usize,
    /// Layer-≥1 graph degree. Default 16.
    pub m: usize,
    /// Layer-0 graph degree, `2*m`. Default 32.
    pub m0: usize,
    /// `ef_search` floor used by `assign()` (spec §4.E step 4: "ef_search ≥
    /// 220"). Default 220.
    pub assign_ef_search: usize,
    /// Seed threaded to every subcomponent (graph layer draws, k-means) so
    /// a build is reproducible end to end (spec §9).
    pub seed: u64,
    /// Batch size used by [`crate::assignment::PrecomputedAssignment`].
    pub assignment_batch_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            d: 128,
            c: 1 << 16,
            pq_m: 16,
            pq_nbits: 8,
            nprobe: 16,
            max_codes: 10_000,
            ef_search: 128,
            ef_construction: 240,
            m: 16,
            m0: 32,
            assign_ef_search: 220,
            seed: 0,
            assignment_batch_size: 1_000_000,
        }
    }
}

impl RuntimeConfig {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
