//! Sample cache and per-anchor statistics of one beam search.

use super::{SearchResult, StepExamples};
use crate::perturb::BinaryMatrix;
use std::collections::{BTreeMap, BTreeSet};

/// Statistics of one candidate anchor.
#[derive(Debug, Clone, Default)]
pub(crate) struct AnchorStats {
    /// Cache rows in which every feature of the anchor was kept.
    pub idx: BTreeSet<usize>,
    pub n_samples: usize,
    pub positives: usize,
    /// Coverage pool rows in which every feature of the anchor was kept.
    pub coverage_idx: BTreeSet<usize>,
    pub coverage: f64,
    /// Features in the order they were added to the anchor.
    pub order: Vec<usize>,
    pub covered_true: Vec<String>,
    pub covered_false: Vec<String>,
}

impl AnchorStats {
    pub fn mean(&self) -> f64 {
        if self.n_samples == 0 {
            0.0
        } else {
            self.positives as f64 / self.n_samples as f64
        }
    }
}

/// Everything the search has learned so far.
#[derive(Debug)]
pub(crate) struct SearchState {
    n_features: usize,
    /// Row-major `capacity x n_features` cache of sample masks.
    data: Vec<u8>,
    labels: Vec<u8>,
    capacity: usize,
    current_idx: usize,
    prealloc: usize,
    cache_margin: usize,
    coverage_pool: BinaryMatrix,
    anchors: BTreeMap<Vec<usize>, AnchorStats>,
}

impl SearchState {
    pub fn new(
        coverage_pool: BinaryMatrix,
        batch_size: usize,
        sample_cache_size: usize,
        cache_margin: usize,
    ) -> Self {
        let n_features = coverage_pool.cols();
        let prealloc = batch_size * sample_cache_size;
        Self {
            n_features,
            data: vec![0; prealloc * n_features],
            labels: vec![0; prealloc],
            capacity: prealloc,
            current_idx: 0,
            prealloc,
            cache_margin,
            coverage_pool,
            anchors: BTreeMap::new(),
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Number of labeled samples drawn so far.
    pub fn current_idx(&self) -> usize {
        self.current_idx
    }

    pub fn stats(&self, anchor: &[usize]) -> Option<&AnchorStats> {
        self.anchors.get(anchor)
    }

    pub fn n_samples(&self, anchor: &[usize]) -> usize {
        self.stats(anchor).map_or(0, |s| s.n_samples)
    }

    pub fn mean(&self, anchor: &[usize]) -> f64 {
        self.stats(anchor).map_or(0.0, AnchorStats::mean)
    }

    pub fn coverage(&self, anchor: &[usize]) -> f64 {
        self.stats(anchor).map_or(0.0, |s| s.coverage)
    }

    fn row(&self, idx: usize) -> &[u8] {
        &self.data[idx * self.n_features..(idx + 1) * self.n_features]
    }

    /// Record a labeled batch drawn for `anchor`.
    pub fn update(
        &mut self,
        anchor: &[usize],
        mask: &BinaryMatrix,
        labels: &[bool],
        covered_true: Vec<String>,
        covered_false: Vec<String>,
    ) {
        let n = mask.rows();
        let needed = self.cache_margin.max(n);
        if self.current_idx + needed >= self.capacity {
            let grow = self.prealloc.max(needed);
            self.capacity += grow;
            self.data.resize(self.capacity * self.n_features, 0);
            self.labels.resize(self.capacity, 0);
        }

        let start = self.current_idx;
        for (offset, row) in mask.iter_rows().enumerate() {
            let at = (start + offset) * self.n_features;
            self.data[at..at + self.n_features].copy_from_slice(row);
            self.labels[start + offset] = u8::from(labels[offset]);
        }
        self.current_idx += n;

        let positives = labels.iter().filter(|l| **l).count();
        let stats = self.anchors.entry(anchor.to_vec()).or_default();
        stats.idx.extend(start..start + n);
        stats.n_samples += n;
        stats.positives += positives;
        stats.covered_true = covered_true;
        stats.covered_false = covered_false;
        if stats.order.is_empty() {
            stats.order = anchor.to_vec();
        }
    }

    /// Candidate anchors one feature larger than those in `previous_best`;
    /// all single features when `previous_best` is empty.
    pub fn propose(&mut self, previous_best: &[Vec<usize>]) -> Vec<Vec<usize>> {
        let pool_rows = self.coverage_pool.rows().max(1) as f64;

        if previous_best.is_empty() {
            let mut proposals = Vec::with_capacity(self.n_features);
            for f in 0..self.n_features {
                let idx: BTreeSet<usize> = (0..self.current_idx)
                    .filter(|&r| self.row(r)[f] != 0)
                    .collect();
                let positives = idx.iter().filter(|&&r| self.labels[r] != 0).count();
                let coverage_idx: BTreeSet<usize> = (0..self.coverage_pool.rows())
                    .filter(|&r| self.coverage_pool.get(r, f))
                    .collect();
                let stats = self.anchors.entry(vec![f]).or_default();
                stats.n_samples = idx.len();
                stats.positives = positives;
                stats.idx = idx;
                stats.coverage = coverage_idx.len() as f64 / pool_rows;
                stats.coverage_idx = coverage_idx;
                stats.order = vec![f];
                proposals.push(vec![f]);
            }
            return proposals;
        }

        let mut proposals = BTreeSet::new();
        for f in 0..self.n_features {
            for t in previous_best {
                if t.contains(&f) {
                    continue;
                }
                let mut new_t = t.clone();
                new_t.push(f);
                new_t.sort_unstable();
                if proposals.contains(&new_t) {
                    continue;
                }

                let (order, coverage_idx, idx) = {
                    let parent = self.anchors.get(t).cloned().unwrap_or_default();
                    let single = self.anchors.get(&vec![f]);
                    let mut order = parent.order.clone();
                    order.push(f);
                    let coverage_idx: BTreeSet<usize> = match single {
                        Some(single) => parent
                            .coverage_idx
                            .intersection(&single.coverage_idx)
                            .copied()
                            .collect(),
                        None => BTreeSet::new(),
                    };
                    let idx: BTreeSet<usize> = parent
                        .idx
                        .iter()
                        .copied()
                        .filter(|&r| self.row(r)[f] != 0)
                        .collect();
                    (order, coverage_idx, idx)
                };
                let positives = idx.iter().filter(|&&r| self.labels[r] != 0).count();
                let stats = self.anchors.entry(new_t.clone()).or_default();
                stats.order = order;
                stats.coverage = coverage_idx.len() as f64 / pool_rows;
                stats.coverage_idx = coverage_idx;
                stats.n_samples = idx.len();
                stats.positives = positives;
                stats.idx = idx;
                proposals.insert(new_t);
            }
        }
        proposals.into_iter().collect()
    }

    /// Per-step statistics of `anchor` in the order its features were added.
    pub fn anchor_metadata(&self, anchor: &[usize], success: bool) -> SearchResult {
        let order = self.stats(anchor).map(|s| s.order.clone()).unwrap_or_default();
        let mut result = SearchResult {
            feature: Vec::with_capacity(order.len()),
            mean: Vec::with_capacity(order.len()),
            precision: Vec::with_capacity(order.len()),
            coverage: Vec::with_capacity(order.len()),
            examples: Vec::with_capacity(order.len()),
            all_precision: 0.0,
            num_preds: self.current_idx(),
            success,
        };

        let mut current: Vec<usize> = Vec::with_capacity(order.len());
        for &f in &order {
            current.push(f);
            current.sort_unstable();
            let stats = self.stats(&current);
            let mean = stats.map_or(0.0, AnchorStats::mean);
            result.feature.push(f);
            result.mean.push(mean);
            result.precision.push(mean);
            result.coverage.push(stats.map_or(0.0, |s| s.coverage));
            result.examples.push(StepExamples {
                covered_true: stats.map(|s| s.covered_true.clone()).unwrap_or_default(),
                covered_false: stats.map(|s| s.covered_false.clone()).unwrap_or_default(),
                uncovered_true: Vec::new(),
                uncovered_false: Vec::new(),
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SearchState {
        let pool =
            BinaryMatrix::from_rows(&[vec![1, 1], vec![1, 0], vec![0, 1], vec![0, 0]], 2).unwrap();
        SearchState::new(pool, 2, 1, 1)
    }

    #[test]
    fn test_update_grows_cache_and_counts() {
        let mut state = state();
        let mask = BinaryMatrix::from_rows(&[vec![1, 0], vec![1, 1], vec![0, 1]], 2).unwrap();
        state.update(&[], &mask, &[true, false, true], vec!["a".into()], vec![]);
        assert_eq!(state.current_idx(), 3);
        assert_eq!(state.n_samples(&[]), 3);
        assert!((state.mean(&[]) - 2.0 / 3.0).abs() < 1e-12);

        state.update(&[], &mask, &[true, true, true], vec![], vec![]);
        assert_eq!(state.current_idx(), 6);
        assert_eq!(state.stats(&[]).unwrap().positives, 5);
    }

    #[test]
    fn test_singletons_reuse_cached_rows() {
        let mut state = state();
        let mask = BinaryMatrix::from_rows(&[vec![1, 0], vec![1, 1], vec![0, 1]], 2).unwrap();
        state.update(&[], &mask, &[true, false, true], vec![], vec![]);

        let proposals = state.propose(&[]);
        assert_eq!(proposals, vec![vec![0], vec![1]]);
        assert_eq!(state.n_samples(&[0]), 2);
        assert_eq!(state.stats(&[0]).unwrap().positives, 1);
        assert!((state.coverage(&[0]) - 0.5).abs() < 1e-12);
        assert!((state.coverage(&[1]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_extensions_intersect_coverage_and_keep_order() {
        let mut state = state();
        let mask = BinaryMatrix::from_rows(&[vec![1, 1], vec![1, 0]], 2).unwrap();
        state.update(&[], &mask, &[true, false], vec![], vec![]);
        state.propose(&[]);

        let proposals = state.propose(&[vec![1]]);
        assert_eq!(proposals, vec![vec![0, 1]]);
        assert_eq!(state.stats(&[0, 1]).unwrap().order, vec![1, 0]);
        assert!((state.coverage(&[0, 1]) - 0.25).abs() < 1e-12);
        assert_eq!(state.n_samples(&[0, 1]), 1);

        let meta = state.anchor_metadata(&[0, 1], true);
        assert_eq!(meta.feature, vec![1, 0]);
        assert_eq!(meta.coverage.len(), 2);
        assert_eq!(meta.num_preds, 2);
    }
}
