//! Query algorithm (spec §4.E "Query algorithm"): probe the coarse graph,
//! build the per-query inner-product table, then scan inverted lists with
//! the fused asymmetric scoring identity until the work budget is spent.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::IndexCore;
use crate::error::{IvfHnswError, Result};

#[derive(Debug, Clone, Copy)]
struct Scored {
    dist: f32,
    id: u32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist
    }
}
impl Eq for Scored {}
impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.partial_cmp(&other.dist).unwrap_or(Ordering::Equal)
    }
}

impl IndexCore {
    /// `search(q, k) → [id; k]` (spec §4.E). Fails with `NotReady` if the
    /// index hasn't finished building or loading.
    pub fn search(&self, q: &[f32], k: usize) -> Result<Vec<u32>> {
        if !self.ready {
            return Err(IvfHnswError::NotReady("index has not finished building or loading"));
        }
        if q.len() != self.config.d {
            return Err(IvfHnswError::DimensionMismatch {
                expected: self.config.d,
                actual: q.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let nprobe = self.config.nprobe.min(self.graph.capacity().max(1));
        let probes = self.graph.search(q, nprobe, self.config.ef_search);

        let table = self.pq.inner_prod_table(q)?;
        let k_codes = self.pq.k();
        let m = self.pq.m();
        let code_size = m + 1;

        // Max-heap on distance: keeping at most `k` elements, the worst
        // (largest distance) sits on top and is evicted first, so after
        // the scan the heap holds exactly the `k` smallest distances seen.
        let mut heap: BinaryHeap<Scored> = BinaryHeap::with_capacity(k + 1);
        let mut examined = 0usize;

        'probes: for (d_c, c) in probes {
            let c = c as usize;
            let term1 = d_c - self.c_norm[c];
            let (ids, codes) = self.lists.scan(c);

            for (i, &id) in ids.iter().enumerate() {
                let code = &codes[i * code_size..(i + 1) * code_size];
                let mut q_r = 0.0f32;
                for slot in 0..m {
                    q_r += table[slot * k_codes + code[slot] as usize];
                }
                let norm = self.norm_pq.decode(&code[m..m + 1])?[0];
                let dist = term1 - 2.0 * q_r + norm;

                heap.push(Scored { dist, id });
                if heap.len() > k {
                    heap.pop();
                }
            }

            // Candidates examined, not kept: the stop condition bounds the
            // work budget, checked only at list boundaries (spec §4.E step
            // 3, spec §9 "Open question: stop condition").
            examined += ids.len();
            if examined >= self.config.max_codes {
                break 'probes;
            }
        }

        let mut results: Vec<(f32, u32)> = heap.into_iter().map(|s| (s.dist, s.id)).collect();
        results.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        if results.len() < k {
            tracing::warn!(
                found = results.len(),
                requested = k,
                "query returned fewer than k results"
            );
        }

        Ok(results.into_iter().map(|(_, id)| id).collect())
    }
}
