//! The coarse quantizer: a hierarchical navigable small-world graph over
//! the collection's `C` centroids (spec component C).
//!
//! Built once from the centroid set and then read-only for the lifetime of
//! the index — population and query both use it only to find nearby
//! coarse cells, never to mutate it. Insertion is parallel-safe (spec §5):
//! each node's neighbour lists are independently locked, and the entry
//! point is updated under its own lock.

mod node;

use std::collections::HashSet;

use parking_lot::RwLock;

use node::NodeInner;

use crate::vector_ops;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    id: u32,
}

impl Eq for Candidate {}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy)]
struct EntryPoint {
    id: u32,
    layer: usize,
}

/// Graph construction/search parameters (spec §6: `M`, `M0 = 2*M`,
/// `ef_construction`).
#[derive(Debug, Clone, Copy)]
pub struct GraphParams {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
}

impl Default for GraphParams {
    fn default() -> Self {
        GraphParams {
            m: 16,
            m0: 32,
            ef_construction: 240,
        }
    }
}

pub struct CoarseGraph {
    d: usize,
    params: GraphParams,
    seed: u64,
    nodes: RwLock<Vec<Option<NodeInner>>>,
    entry_point: RwLock<Option<EntryPoint>>,
}

impl CoarseGraph {
    pub fn new(d: usize, params: GraphParams, seed: u64) -> Self {
        CoarseGraph {
            d,
            params,
            seed,
            nodes: RwLock::new(Vec::new()),
            entry_point: RwLock::new(None),
        }
    }

    pub fn with_capacity(d: usize, capacity: usize, params: GraphParams, seed: u64) -> Self {
        let g = Self::new(d, params, seed);
        let mut nodes = g.nodes.write();
        nodes.resize_with(capacity, || None);
        drop(nodes);
        g
    }

    pub fn len(&self) -> usize {
        self.nodes.read().iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.nodes.read().len()
    }

    /// Deterministic per-id layer draw: `floor(-ln(u) * mult)`, `mult = 1 /
    /// ln(M)`, where `u` is derived from a seeded hash of `id` rather than a
    /// shared stateful RNG. This keeps the final topology reproducible for
    /// a fixed sequence of ids regardless of how many threads raced to
    /// insert them (spec §5: "recall quality must not depend on thread
    /// count"; spec §6 Design Notes: "take an explicit seed ... thread it
    /// to all subcomponents").
    fn random_level(&self, id: u32) -> usize {
        let mut x = self.seed ^ (id as u64).wrapping_mul(0x9E3779B97F4A7C15);
        // splitmix64 finalizer
        x ^= x >> 30;
        x = x.wrapping_mul(0xBF58476D1CE4E5B9);
        x ^= x >> 27;
        x = x.wrapping_mul(0x94D049BB133111EB);
        x ^= x >> 31;
        let u = ((x >> 11) as f64) * (1.0 / (1u64 << 53) as f64);
        let u = u.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);
        let mult = 1.0 / (self.params.m as f64).ln();
        let level = (-u.ln() * mult).floor() as usize;
        level.min(31)
    }

    fn vector_of(nodes: &[Option<NodeInner>], id: u32) -> &[f32] {
        nodes[id as usize].as_ref().expect("node must exist").vector.as_slice()
    }

    fn ensure_capacity(&self, id: u32) {
        let mut nodes = self.nodes.write();
        if (id as usize) >= nodes.len() {
            nodes.resize_with(id as usize + 1, || None);
        }
    }

    /// Inserts `vec` (a centroid) under `id`. Idempotent: a repeat `id`
    /// returns without effect (spec §4.C).
    pub fn insert(&self, id: u32, vec: Vec<f32>) {
        debug_assert_eq!(vec.len(), self.d);
        self.ensure_capacity(id);

        let layer = self.random_level(id);
        {
            let mut nodes = self.nodes.write();
            if nodes[id as usize].is_some() {
                return;
            }
            nodes[id as usize] = Some(NodeInner::new(vec, layer));
        }

        let ep = *self.entry_point.read();
        let Some(ep) = ep else {
            let mut entry = self.entry_point.write();
            if entry.is_none() {
                *entry = Some(EntryPoint { id, layer });
            }
            return;
        };

        let nodes = self.nodes.read();
        let query = Self::vector_of(&nodes, id).to_vec();
        let mut curr_obj = ep.id;

        if layer < ep.layer {
            for lc in (layer + 1..=ep.layer).rev() {
                let found = self.search_layer(&nodes, &query, curr_obj, 1, lc, Some(id));
                if let Some(best) = found.first() {
                    curr_obj = best.id;
                }
            }
        }

        let start_layer = layer.min(ep.layer);
        for lc in (0..=start_layer).rev() {
            let candidates = self.search_layer(&nodes, &query, curr_obj, self.params.ef_construction, lc, Some(id));
            let m_level = if lc == 0 { self.params.m0 } else { self.params.m };
            let neighbors = self.select_neighbors_heuristic(&nodes, &candidates, m_level);

            nodes[id as usize]
                .as_ref()
                .unwrap()
                .set_neighbors(lc, neighbors.clone());

            for &nbr in &neighbors {
                if let Some(nbr_node) = nodes[nbr as usize].as_ref() {
                    if nbr_node.layer_max < lc {
                        continue;
                    }
                    nbr_node.push_neighbor(lc, id);
                    let max_links = if lc == 0 { self.params.m0 } else { self.params.m };
                    self.prune_neighbors(&nodes, nbr, lc, max_links);
                }
            }

            if let Some(first) = candidates.first() {
                curr_obj = first.id;
            }
        }
        drop(nodes);

        if layer > ep.layer {
            let mut entry = self.entry_point.write();
            if entry.map(|e| layer > e.layer).unwrap_or(true) {
                *entry = Some(EntryPoint { id, layer });
            }
        }
    }

    /// Re-selects up to `max_links` neighbours for `center` at `layer`
    /// using the same angular-separation heuristic used at insertion,
    /// pruning any overflow (spec §4.C: "pruning any overflowing
    /// neighbour's list by the same heuristic").
    fn prune_neighbors(&self, nodes: &[Option<NodeInner>], center: u32, layer: usize, max_links: usize) {
        let center_node = nodes[center as usize].as_ref().unwrap();
        let current = center_node.neighbors(layer);
        if current.len() <= max_links {
            return;
        }
        let center_vec = center_node.vector.as_slice();
        let mut candidates: Vec<Candidate> = current
            .iter()
            .map(|&id| Candidate {
                distance: vector_ops::l2sqr(center_vec, Self::vector_of(nodes, id), self.d),
                id,
            })
            .collect();
        candidates.sort();
        let pruned = self.select_neighbors_heuristic(nodes, &candidates, max_links);
        center_node.set_neighbors(layer, pruned);
    }

    /// "Keep a candidate `c` only if no already-chosen neighbour is
    /// strictly closer to `c` than `c` is to the new node" (spec §4.C).
    fn select_neighbors_heuristic(
        &self,
        nodes: &[Option<NodeInner>],
        candidates: &[Candidate],
        m: usize,
    ) -> Vec<u32> {
        let mut selected: Vec<u32> = Vec::with_capacity(m.min(candidates.len()));
        for cand in candidates {
            if selected.len() >= m {
                break;
            }
            let cand_vec = Self::vector_of(nodes, cand.id);
            let mut keep = true;
            for &chosen in &selected {
                let chosen_vec = Self::vector_of(nodes, chosen);
                let dist_to_chosen = vector_ops::l2sqr(cand_vec, chosen_vec, self.d);
                if dist_to_chosen < cand.distance {
                    keep = false;
                    break;
                }
            }
            if keep {
                selected.push(cand.id);
            }
        }
        selected
    }

    /// Best-first search at a single layer, starting greedy descent from
    /// `entry_id`, returning up to `ef` candidates sorted ascending by
    /// distance. `exclude` (the node currently being inserted, if any) is
    /// pre-seeded into the visited set so it never matches itself.
    fn search_layer(
        &self,
        nodes: &[Option<NodeInner>],
        query: &[f32],
        entry_id: u32,
        ef: usize,
        layer: usize,
        exclude: Option<u32>,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        if let Some(x) = exclude {
            visited.insert(x);
        }

        let entry_node = match nodes[entry_id as usize].as_ref() {
            Some(n) if n.layer_max >= layer => n,
            _ => return Vec::new(),
        };
        let entry_dist = vector_ops::l2sqr(query, &entry_node.vector, self.d);
        visited.insert(entry_id);

        let mut candidates = std::collections::BinaryHeap::new();
        candidates.push(std::cmp::Reverse(Candidate {
            distance: entry_dist,
            id: entry_id,
        }));
        let mut found: Vec<Candidate> = vec![Candidate {
            distance: entry_dist,
            id: entry_id,
        }];

        while let Some(std::cmp::Reverse(curr)) = candidates.pop() {
            let worst = found
                .iter()
                .fold(f32::MIN, |acc, c| acc.max(c.distance));
            if curr.distance > worst && found.len() >= ef {
                break;
            }

            let Some(curr_node) = nodes[curr.id as usize].as_ref() else {
                continue;
            };
            if curr_node.layer_max < layer {
                continue;
            }
            for nbr in curr_node.neighbors(layer) {
                if visited.contains(&nbr) {
                    continue;
                }
                visited.insert(nbr);
                let Some(nbr_node) = nodes[nbr as usize].as_ref() else {
                    continue;
                };
                let dist = vector_ops::l2sqr(query, &nbr_node.vector, self.d);

                let worst = found.iter().fold(f32::MIN, |acc, c| acc.max(c.distance));
                if found.len() < ef || dist < worst {
                    let c = Candidate { distance: dist, id: nbr };
                    candidates.push(std::cmp::Reverse(c));
                    found.push(c);
                    if found.len() > ef {
                        found.sort();
                        found.pop();
                    }
                }
            }
        }

        found.sort();
        found
    }

    /// Top-`k` nearest centroids to `query`, searched with dynamic-list
    /// width `ef` (spec §4.C). Returns `(distance, id)` pairs ascending by
    /// distance. Empty graph returns empty.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(f32, u32)> {
        let nodes = self.nodes.read();
        let Some(ep) = *self.entry_point.read() else {
            return Vec::new();
        };
        let mut curr_obj = ep.id;

        for lc in (1..=ep.layer).rev() {
            let found = self.search_layer(&nodes, query, curr_obj, 1, lc, None);
            if let Some(best) = found.first() {
                curr_obj = best.id;
            }
        }

        let ef = ef.max(k);
        let mut found = self.search_layer(&nodes, query, curr_obj, ef, 0, None);
        found.truncate(k);
        found.into_iter().map(|c| (c.distance, c.id)).collect()
    }

    /// `CentroidNormTable`: `table[i] = ||centroid_i||^2` (spec §3),
    /// recomputed whenever the graph changes. Entries for ids never
    /// inserted are `0.0` and must not be consulted by the caller.
    pub fn build_norm_table(&self) -> Vec<f32> {
        let nodes = self.nodes.read();
        nodes
            .iter()
            .map(|n| match n {
                Some(node) => vector_ops::norm_sqr(&node.vector, self.d),
                None => 0.0,
            })
            .collect()
    }

    pub fn get_vector(&self, id: u32) -> Option<Vec<f32>> {
        self.nodes.read()[id as usize].as_ref().map(|n| n.vector.clone())
    }

    pub fn dim(&self) -> usize {
        self.d
    }

    pub fn params(&self) -> GraphParams {
        self.params
    }

    /// Snapshots `(layer_max, per-layer neighbour lists)` for every present
    /// node, in id order, for persistence (spec §6 "coarse-graph files").
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self.nodes.read();
        let mut layer_counts = Vec::with_capacity(nodes.len());
        let mut edges = Vec::with_capacity(nodes.len());
        for n in nodes.iter() {
            match n {
                Some(node) => {
                    layer_counts.push(node.layer_count() as u32);
                    let layers: Vec<Vec<u32>> = (0..node.layer_count()).map(|l| node.neighbors(l)).collect();
                    edges.push(layers);
                }
                None => {
                    layer_counts.push(0);
                    edges.push(Vec::new());
                }
            }
        }
        GraphSnapshot {
            entry_point: *self.entry_point.read(),
            layer_counts,
            edges,
        }
    }

    /// Rebuilds a graph from a snapshot plus the centroid vectors (loaded
    /// separately, per spec §4.E step 1: centroids come from an external
    /// clustering pass).
    pub fn from_snapshot(
        d: usize,
        params: GraphParams,
        seed: u64,
        centroids: &[Vec<f32>],
        snapshot: &GraphSnapshot,
    ) -> Self {
        let g = Self::with_capacity(d, centroids.len(), params, seed);
        {
            let mut nodes = g.nodes.write();
            for (id, vec) in centroids.iter().enumerate() {
                if snapshot.layer_counts[id] == 0 {
                    continue;
                }
                let layer_max = snapshot.layer_counts[id] as usize - 1;
                let node = NodeInner::new(vec.clone(), layer_max);
                for (l, layer_edges) in snapshot.edges[id].iter().enumerate() {
                    node.set_neighbors(l, layer_edges.clone());
                }
                nodes[id] = Some(node);
            }
        }
        *g.entry_point.write() = snapshot.entry_point.map(|e| EntryPoint { id: e.id, layer: e.layer });
        g
    }
}

#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    entry_point: Option<EntryPoint>,
    pub layer_counts: Vec<u32>,
    pub edges: Vec<Vec<Vec<u32>>>,
}

impl GraphSnapshot {
    pub fn entry_point_id(&self) -> Option<u32> {
        self.entry_point.map(|e| e.id)
    }
    pub fn entry_point_layer(&self) -> Option<usize> {
        self.entry_point.map(|e| e.layer)
    }
    pub fn from_parts(entry_id: Option<u32>, entry_layer: Option<usize>, layer_counts: Vec<u32>, edges: Vec<Vec<Vec<u32>>>) -> Self {
        let entry_point = match (entry_id, entry_layer) {
            (Some(id), Some(layer)) => Some(EntryPoint { id, layer }),
            _ => None,
        };
        GraphSnapshot {
            entry_point,
            layer_counts,
            edges,
        }
    }
}
