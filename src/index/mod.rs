//! `IndexCore` (spec component E): owns both quantizers, the coarse graph,
//! the inverted lists, and the centroid-norm table, and exposes the public
//! build/query contract.

mod build;
mod search;

use crate::config::RuntimeConfig;
use crate::graph::{CoarseGraph, GraphParams};
use crate::inverted_lists::InvertedLists;
use crate::quantization::ProductQuantizer;

/// `{d, C, code_size=M, nprobe, max_codes, pq, norm_pq, graph, lists,
/// c_norm}` (spec §3 "IndexCore runtime state").
pub struct IndexCore {
    config: RuntimeConfig,
    pq: ProductQuantizer,
    norm_pq: ProductQuantizer,
    graph: CoarseGraph,
    lists: InvertedLists,
    c_norm: Vec<f32>,
    /// Becomes `true` once the coarse graph is built, both quantizers are
    /// trained, and population has completed (or a saved index has been
    /// loaded). `search` before then fails with `NotReady` (spec §4.E).
    ready: bool,
}

impl IndexCore {
    pub fn new(config: RuntimeConfig) -> Self {
        let graph_params = GraphParams {
            m: config.m,
            m0: config.m0,
            ef_construction: config.ef_construction,
        };
        let pq = ProductQuantizer::new(config.d, config.pq_m, config.pq_nbits, config.seed);
        let norm_pq = ProductQuantizer::new(1, 1, config.pq_nbits, config.seed ^ 0xA5A5_A5A5_A5A5_A5A5);
        let graph = CoarseGraph::with_capacity(config.d, config.c, graph_params, config.seed);
        let lists = InvertedLists::new(config.c, config.pq_m + 1);
        IndexCore {
            pq,
            norm_pq,
            graph,
            lists,
            c_norm: Vec::new(),
            ready: false,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn pq(&self) -> &ProductQuantizer {
        &self.pq
    }

    pub fn norm_pq(&self) -> &ProductQuantizer {
        &self.norm_pq
    }

    pub fn graph(&self) -> &CoarseGraph {
        &self.graph
    }

    pub fn lists(&self) -> &InvertedLists {
        &self.lists
    }

    pub fn c_norm(&self) -> &[f32] {
        &self.c_norm
    }

    /// Marks the index usable for `search`. Called once `add` has finished
    /// populating every list, or by [`crate::persistence`] after a
    /// successful load.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Reassembles a ready-to-query index from previously-loaded parts
    /// (spec §4.F: `read()` is the inverse of `write()`). Used by
    /// [`crate::persistence::load_index`].
    pub fn from_parts(
        config: RuntimeConfig,
        pq: ProductQuantizer,
        norm_pq: ProductQuantizer,
        graph: CoarseGraph,
        lists: InvertedLists,
    ) -> Self {
        let c_norm = graph.build_norm_table();
        IndexCore {
            config,
            pq,
            norm_pq,
            graph,
            lists,
            c_norm,
            ready: true,
        }
    }
}
