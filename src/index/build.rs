//! Build pipeline: `load_or_build_coarse` → `train_residual_pq` →
//! `train_norm_pq` → `add` → `write` (spec §4.E, steps 1-5; `write` lives
//! in [`crate::persistence`]).

use rayon::prelude::*;

use super::IndexCore;
use crate::error::{IvfHnswError, Result};
use crate::vector_ops;

impl IndexCore {
    /// Inserts `centroids` (already produced by an external clustering
    /// pass, spec §3 "Lifecycle") into the coarse graph and builds the
    /// centroid-norm table. `centroids[i]` is taken as coarse id `i`.
    pub fn load_or_build_coarse(&mut self, centroids: &[Vec<f32>]) -> Result<()> {
        for (id, v) in centroids.iter().enumerate() {
            if v.len() != self.config.d {
                return Err(IvfHnswError::DimensionMismatch {
                    expected: self.config.d,
                    actual: v.len(),
                });
            }
            self.graph.insert(id as u32, v.clone());
        }
        self.c_norm = self.graph.build_norm_table();
        Ok(())
    }

    /// Single nearest-centroid search used by both training and by
    /// [`crate::assignment::PrecomputedAssignment`] (spec §4.E step 4:
    /// "ef_search ≥ 220").
    pub fn assign(&self, v: &[f32]) -> Result<u32> {
        if v.len() != self.config.d {
            return Err(IvfHnswError::DimensionMismatch {
                expected: self.config.d,
                actual: v.len(),
            });
        }
        let ef = self.config.assign_ef_search.max(220);
        let found = self.graph.search(v, 1, ef);
        found
            .first()
            .map(|&(_, id)| id)
            .ok_or(IvfHnswError::NotReady("coarse graph has no centroids"))
    }

    fn residual_of(&self, v: &[f32], centroid: &[f32]) -> Vec<f32> {
        let mut r = v.to_vec();
        vector_ops::sub_into(&mut r, centroid, self.config.d);
        r
    }

    /// Trains the residual product quantizer on `sample` (spec §4.E step
    /// 2): assign each sample to its nearest centroid, form residuals,
    /// then `pq.train`.
    pub fn train_residual_pq(&mut self, sample: &[Vec<f32>]) -> Result<()> {
        let n = sample.len();
        let mut residuals = Vec::with_capacity(n * self.config.d);
        for v in sample {
            let a = self.assign(v)?;
            let centroid = self
                .graph
                .get_vector(a)
                .ok_or_else(|| IvfHnswError::InvariantViolation(format!("assigned centroid {a} missing")))?;
            residuals.extend_from_slice(&self.residual_of(v, &centroid));
        }
        self.pq.train(&residuals, n)
    }

    /// Trains the norm quantizer on `sample` (spec §4.E step 3): re-derive
    /// assignments, encode/decode the residual PQ to get the reconstructed
    /// vector, take its squared norm, then `norm_pq.train`. Must run after
    /// [`Self::train_residual_pq`] (spec §9: "training order is fixed").
    pub fn train_norm_pq(&mut self, sample: &[Vec<f32>]) -> Result<()> {
        if !self.pq.is_trained() {
            return Err(IvfHnswError::NotReady("residual PQ must be trained before norm PQ"));
        }
        let n = sample.len();
        let mut norms = Vec::with_capacity(n);
        for v in sample {
            let a = self.assign(v)?;
            let centroid = self
                .graph
                .get_vector(a)
                .ok_or_else(|| IvfHnswError::InvariantViolation(format!("assigned centroid {a} missing")))?;
            let residual = self.residual_of(v, &centroid);
            let code = self.pq.encode(&residual)?;
            let mut v_hat = self.pq.decode(&code)?;
            vector_ops::add_into(&mut v_hat, &centroid, self.config.d);
            norms.push(vector_ops::norm_sqr(&v_hat, self.config.d));
        }
        self.norm_pq.train(&norms, n)
    }

    /// Mean nearest-centroid squared-L2 distance over `sample` (SPEC_FULL
    /// §11, folded in from the original's `compute_average_distance`): a
    /// coarse-quantization health check used by tests to confirm that
    /// `load_or_build_coarse` produced centroids the sample actually sits
    /// near, rather than asserting on search recall directly.
    pub fn assignment_quality(&self, sample: &[Vec<f32>]) -> Result<f32> {
        if sample.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0f32;
        for v in sample {
            let a = self.assign(v)?;
            let centroid = self
                .graph
                .get_vector(a)
                .ok_or_else(|| IvfHnswError::InvariantViolation(format!("assigned centroid {a} missing")))?;
            total += vector_ops::l2sqr(v, &centroid, self.config.d);
        }
        Ok(total / sample.len() as f32)
    }

    /// Populates the inverted lists for `batch` (spec §4.E step 4).
    /// `assignments[i]` must be the coarse cell for `batch[i]`, typically
    /// produced ahead of time via [`crate::assignment::PrecomputedAssignment`]
    /// rather than recomputed here. Parallel over vectors, matching the
    /// "embarrassingly parallel per-vector add phase" in spec §5.
    pub fn add(&self, batch: &[Vec<f32>], ids: &[u32], assignments: &[u32]) -> Result<()> {
        if batch.len() != ids.len() || batch.len() != assignments.len() {
            return Err(IvfHnswError::malformed(
                "IndexCore::add",
                "batch, ids, and assignments must have equal length",
            ));
        }
        if !self.pq.is_trained() || !self.norm_pq.is_trained() {
            return Err(IvfHnswError::NotReady("both quantizers must be trained before add"));
        }

        batch
            .par_iter()
            .zip(ids.par_iter())
            .zip(assignments.par_iter())
            .try_for_each(|((v, &id), &a)| -> Result<()> {
                if v.len() != self.config.d {
                    return Err(IvfHnswError::DimensionMismatch {
                        expected: self.config.d,
                        actual: v.len(),
                    });
                }
                let centroid = self.graph.get_vector(a).ok_or_else(|| {
                    IvfHnswError::InvariantViolation(format!("assignment references unknown cell {a}"))
                })?;
                let residual = self.residual_of(v, &centroid);
                let mut code = self.pq.encode(&residual)?;

                let mut v_hat = self.pq.decode(&code)?;
                vector_ops::add_into(&mut v_hat, &centroid, self.config.d);
                let norm = vector_ops::norm_sqr(&v_hat, self.config.d);
                let norm_code = self.norm_pq.encode(&[norm])?;

                code.push(norm_code[0]);
                self.lists.append(a as usize, id, &code);
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn toy_config() -> RuntimeConfig {
        RuntimeConfig {
            d: 4,
            c: 4,
            pq_m: 2,
            pq_nbits: 4,
            nprobe: 4,
            max_codes: 1000,
            ef_search: 64,
            ef_construction: 64,
            m: 8,
            m0: 16,
            assign_ef_search: 64,
            seed: 1,
            assignment_batch_size: 1000,
        }
    }

    fn toy_centroids() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0, 0.0, 0.0],
            vec![10.0, 0.0, 0.0, 0.0],
            vec![0.0, 10.0, 0.0, 0.0],
            vec![0.0, 0.0, 10.0, 0.0],
        ]
    }

    #[test]
    fn build_pipeline_runs_end_to_end() {
        let mut idx = IndexCore::new(toy_config());
        idx.load_or_build_coarse(&toy_centroids()).unwrap();

        let mut sample = Vec::new();
        for i in 0..64u32 {
            let base = &toy_centroids()[(i % 4) as usize];
            let v: Vec<f32> = base.iter().map(|x| x + (i as f32 * 0.01)).collect();
            sample.push(v);
        }
        idx.train_residual_pq(&sample).unwrap();
        idx.train_norm_pq(&sample).unwrap();
        assert!(idx.pq.is_trained());
        assert!(idx.norm_pq.is_trained());

        let ids: Vec<u32> = (0..sample.len() as u32).collect();
        let assignments: Vec<u32> = sample.iter().map(|v| idx.assign(v).unwrap()).collect();
        idx.add(&sample, &ids, &assignments).unwrap();
        assert_eq!(idx.lists.total_len(), sample.len());
    }

    #[test]
    fn norm_pq_before_residual_pq_is_rejected() {
        let mut idx = IndexCore::new(toy_config());
        idx.load_or_build_coarse(&toy_centroids()).unwrap();
        let err = idx.train_norm_pq(&[vec![1.0, 1.0, 1.0, 1.0]]).unwrap_err();
        assert!(matches!(err, IvfHnswError::NotReady(_)));
    }

    #[test]
    fn assignment_quality_is_small_for_points_near_their_centroid() {
        let mut idx = IndexCore::new(toy_config());
        idx.load_or_build_coarse(&toy_centroids()).unwrap();

        let tight: Vec<Vec<f32>> = toy_centroids()
            .iter()
            .flat_map(|c| (0..8).map(move |i| c.iter().map(|x| x + i as f32 * 0.01).collect::<Vec<_>>()))
            .collect();
        let far: Vec<Vec<f32>> = toy_centroids()
            .iter()
            .flat_map(|c| (0..8).map(move |i| c.iter().map(|x| x + i as f32 * 3.0).collect::<Vec<_>>()))
            .collect();

        let tight_quality = idx.assignment_quality(&tight).unwrap();
        let far_quality = idx.assignment_quality(&far).unwrap();
        assert!(
            tight_quality < far_quality,
            "tight={tight_quality}, far={far_quality}"
        );
        assert_eq!(idx.assignment_quality(&[]).unwrap(), 0.0);
    }
}
