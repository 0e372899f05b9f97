//! Testing utilities for canopy.
//!
//! A deterministic splitting criterion, staged-data builders and a mini
//! tree builder that drives the [`Frontier`] public API the way a full
//! trainer would. Shared by unit tests, integration tests and benches:
//!
//! ```ignore
//! use canopy::testing::{stage_values, VarianceCriterion};
//! ```

use std::collections::HashSet;

use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::training::{
    Criterion, Frontier, FrontierView, IndexNode, LevelStats, SplitCand, SplitNux, SplitTask,
    StagedCell, StagedSamples,
};

// =============================================================================
// Criterion
// =============================================================================

/// Weighted sum-of-squares gain criterion for regression responses.
///
/// Evaluates binary splits between value runs of the ordered slice; the
/// gain of a cut is `y_L²/w_L + y_R²/w_R - y²/w`. Factor pairs are scored
/// with the same prefix-run scan (run subsets are a criterion-family
/// concern, not a frontier one).
///
/// Pair splittability is sampled per pair with probability `pred_prob`
/// from a seeded generator, mirroring per-predictor sampling in a real
/// forest trainer; `pred_prob = 1.0` is fully deterministic.
pub struct VarianceCriterion {
    pred_prob: f64,
    rng: Xoshiro256PlusPlus,
    safe_counts: Vec<u32>,
}

impl VarianceCriterion {
    /// Deterministic criterion: every pair is splittable.
    pub fn new() -> Self {
        Self::with_pred_prob(1.0, 0)
    }

    /// Sample pair splittability with the given probability.
    pub fn with_pred_prob(pred_prob: f64, seed: u64) -> Self {
        Self {
            pred_prob,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            safe_counts: Vec::new(),
        }
    }

    /// Safe run counts announced for the most recent level.
    pub fn last_run_sets(&self) -> &[u32] {
        &self.safe_counts
    }

    /// Best prefix cut of a node's ordered slice.
    fn best_cut(&self, task: &SplitTask<'_>) -> Option<(usize, f64, u32, u32, u32)> {
        let start = task.node.idx_start as usize;
        let extent = task.node.extent as usize;
        let slice = &task.cells[start..start + extent];
        if extent < 2 {
            return None;
        }

        let total_w: f64 = slice.iter().map(|c| c.s_count as f64).sum();
        let total_y: f64 = slice.iter().map(|c| c.y_sum).sum();
        let base = total_y * total_y / total_w;

        let mut best: Option<(usize, f64, u32, u32, u32)> = None;
        let mut w_l = 0.0;
        let mut y_l = 0.0;
        let mut s_l = 0u32;
        for i in 0..extent - 1 {
            w_l += slice[i].s_count as f64;
            y_l += slice[i].y_sum;
            s_l += slice[i].s_count;
            if slice[i].rank == slice[i + 1].rank {
                continue;
            }
            let w_r = total_w - w_l;
            let y_r = total_y - y_l;
            let info = y_l * y_l / w_l + y_r * y_r / w_r - base;
            if best.map_or(true, |(_, b, _, _, _)| info > b) {
                best = Some((i + 1, info, s_l, slice[i].rank, slice[i + 1].rank));
            }
        }
        best.filter(|&(_, info, _, _, _)| info > 0.0)
    }
}

impl Default for VarianceCriterion {
    fn default() -> Self {
        Self::new()
    }
}

impl Criterion for VarianceCriterion {
    fn level_init(&mut self, _nodes: &[IndexNode], view: &FrontierView<'_>) -> Vec<bool> {
        (0..view.pair_count())
            .map(|_| self.pred_prob >= 1.0 || self.rng.gen_bool(self.pred_prob))
            .collect()
    }

    fn run_sets(&mut self, safe_counts: &[u32]) {
        self.safe_counts = safe_counts.to_vec();
    }

    fn run_offsets(&mut self) {
        debug_assert!(self.safe_counts.iter().all(|&rl| rl > 1));
    }

    fn split_num(&self, task: &SplitTask<'_>) -> Option<SplitNux> {
        self.best_cut(task).map(|(lh_extent, info, s_count, rank_lh, rank_rh)| {
            SplitNux::new_num(
                task.node.idx_start,
                lh_extent as u32,
                s_count,
                info,
                rank_lh,
                rank_rh,
                0,
            )
        })
    }

    fn split_fac(&self, task: &SplitTask<'_>) -> Option<SplitNux> {
        debug_assert!(task.set_idx.is_some());
        self.best_cut(task).map(|(lh_extent, info, s_count, _, _)| {
            SplitNux::new(task.node.idx_start, lh_extent as u32, s_count, info)
        })
    }
}

// =============================================================================
// Staged data builders
// =============================================================================

/// Stage raw per-predictor values and a response into a pool.
///
/// Each predictor is sorted ascending (ties by sample id), assigned dense
/// ranks, and loaded into buffer 0 with unit sample counts.
pub fn stage_values(values: &[Vec<f64>], y: &[f64]) -> StagedSamples {
    let n_pred = values.len();
    let bag_count = y.len();
    let mut staged = StagedSamples::new(n_pred, bag_count);

    for (pred, vals) in values.iter().enumerate() {
        assert_eq!(vals.len(), bag_count, "predictor {pred} length mismatch");
        let mut order: Vec<u32> = (0..bag_count as u32).collect();
        order.sort_by(|&a, &b| {
            vals[a as usize]
                .partial_cmp(&vals[b as usize])
                .expect("staged values must be ordered")
                .then(a.cmp(&b))
        });

        let mut cells = Vec::with_capacity(bag_count);
        let mut rank = 0u32;
        let mut prev = f64::NEG_INFINITY;
        for (i, &s) in order.iter().enumerate() {
            let v = vals[s as usize];
            if i > 0 && v > prev {
                rank += 1;
            }
            prev = v;
            cells.push(StagedCell {
                rank,
                s_count: 1,
                y_sum: y[s as usize],
            });
        }
        staged.stage(pred, &cells, &order).unwrap();
    }
    staged
}

/// Uniform random predictor values and a linear-plus-noise response.
pub fn random_regression(n_pred: usize, bag_count: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let values: Vec<Vec<f64>> = (0..n_pred)
        .map(|_| (0..bag_count).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    let weights: Vec<f64> = (0..n_pred).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let y: Vec<f64> = (0..bag_count)
        .map(|s| {
            let signal: f64 = (0..n_pred).map(|p| weights[p] * values[p][s]).sum();
            signal + rng.gen_range(-0.1..0.1)
        })
        .collect();
    (values, y)
}

// =============================================================================
// Mini tree builder
// =============================================================================

/// One frontier node as the mini builder tracks it.
#[derive(Clone, Debug)]
pub struct BuilderNode {
    pub idx_start: u32,
    pub extent: u32,
    pub sum: f64,
    pub min_info: f64,
    pub path: u8,
    /// Live samples of the node, in bag order of discovery.
    pub samples: Vec<u32>,
}

/// Record of one grown tree.
#[derive(Debug, Default)]
pub struct GrowthTrace {
    /// Levels that produced at least one split.
    pub levels: usize,
    /// Sample ids of each leaf, in formation order.
    pub leaves: Vec<Vec<u32>>,
    /// Candidates returned per level.
    pub cands: Vec<Vec<Option<SplitCand>>>,
    /// Work counters per level.
    pub stats: Vec<LevelStats>,
}

/// Grow a tree through the frontier public API.
///
/// Plays the tree builder's role: builds `IndexNode`s, replays winning
/// splits against the staged pool to stamp sample paths, retires leaves,
/// and walks `overlap`/`inherit`/`de_overlap`. `y` is the per-sample
/// response used for node sums.
///
/// With `check_slices` set (valid only when every pair is splittable, so
/// every live pair restages every level), asserts after each level that
/// every node's restaged slice holds exactly the node's samples in
/// presort-relative order.
pub fn grow<C: Criterion>(
    frontier: &mut Frontier<C>,
    y: &[f64],
    max_levels: usize,
    check_slices: bool,
) -> GrowthTrace {
    let bag_count = frontier.bag_count();
    assert_eq!(y.len(), bag_count);
    let n_pred = frontier.n_pred();
    let original_ids: Vec<Vec<u32>> = (0..n_pred)
        .map(|p| frontier.staged().pred_ids(p, 0).to_vec())
        .collect();

    let mut nodes = vec![BuilderNode {
        idx_start: 0,
        extent: bag_count as u32,
        sum: y.iter().sum(),
        min_info: 0.0,
        path: 0,
        samples: (0..bag_count as u32).collect(),
    }];
    let mut trace = GrowthTrace::default();

    for level in 0..max_levels {
        let index_nodes: Vec<IndexNode> = nodes
            .iter()
            .map(|n| IndexNode {
                idx_start: n.idx_start,
                extent: n.extent,
                s_count: n.extent,
                sum: n.sum,
                min_info: n.min_info,
                path: n.path,
            })
            .collect();

        let cands = frontier.level_split(&index_nodes);
        trace.stats.push(frontier.last_stats());

        if check_slices && level > 0 {
            assert_level_slices(frontier, &nodes, &original_ids);
        }

        // Partition each splitting node's samples by replaying the winning
        // predictor's restaged slice.
        struct Decision {
            parent: usize,
            lh: Vec<u32>,
            rh: Vec<u32>,
            cand: SplitCand,
        }
        let mut decisions = Vec::new();
        let mut retired: Vec<usize> = Vec::new();
        for (i, cand) in cands.iter().enumerate() {
            match cand {
                Some(c) => {
                    let node = &nodes[i];
                    let ids = frontier.staged().pred_ids(c.pred_idx as usize, c.buf_idx);
                    let lh_range = node.idx_start as usize
                        ..(node.idx_start + c.nux.lh_extent) as usize;
                    let lh: Vec<u32> = ids[lh_range].to_vec();
                    let lh_set: HashSet<u32> = lh.iter().copied().collect();
                    let rh: Vec<u32> = node
                        .samples
                        .iter()
                        .copied()
                        .filter(|s| !lh_set.contains(s))
                        .collect();
                    decisions.push(Decision {
                        parent: i,
                        lh,
                        rh,
                        cand: *c,
                    });
                }
                None => retired.push(i),
            }
        }

        for &i in &retired {
            for &s in &nodes[i].samples {
                frontier.path_extinct(s);
            }
            trace.leaves.push(nodes[i].samples.clone());
        }

        let min_ratio = frontier.min_ratio();
        let mut next: Vec<BuilderNode> = Vec::new();
        let mut inherits: Vec<(usize, Option<usize>, Option<usize>)> = Vec::new();
        for d in &decisions {
            let parent = &nodes[d.parent];
            for &s in &d.lh {
                frontier.path_left(s);
            }
            for &s in &d.rh {
                frontier.path_right(s);
            }

            let min_info = d.cand.min_info(min_ratio);
            let l = BuilderNode {
                idx_start: parent.idx_start,
                extent: d.lh.len() as u32,
                sum: d.lh.iter().map(|&s| y[s as usize]).sum(),
                min_info,
                path: parent.path << 1,
                samples: d.lh.clone(),
            };
            let r = BuilderNode {
                idx_start: parent.idx_start + d.cand.nux.lh_extent,
                extent: d.rh.len() as u32,
                sum: d.rh.iter().map(|&s| y[s as usize]).sum(),
                min_info,
                path: (parent.path << 1) | 1,
                samples: d.rh.clone(),
            };

            let mut place = |child: BuilderNode| -> Option<usize> {
                if child.extent >= 2 {
                    next.push(child);
                    Some(next.len() - 1)
                } else {
                    for &s in &child.samples {
                        frontier.path_extinct(s);
                    }
                    trace.leaves.push(child.samples);
                    None
                }
            };
            let l_next = place(l);
            let r_next = place(r);
            inherits.push((d.parent, l_next, r_next));
        }

        trace.cands.push(cands);
        if decisions.is_empty() {
            return trace;
        }
        trace.levels += 1;

        if next.is_empty() {
            return trace;
        }
        frontier.overlap(next.len());
        for (parent, l_next, r_next) in inherits {
            frontier.inherit(parent, l_next, r_next);
        }
        frontier.de_overlap();
        nodes = next;
    }

    // Level limit reached: remaining nodes become leaves.
    for node in nodes {
        for &s in &node.samples {
            frontier.path_extinct(s);
        }
        trace.leaves.push(node.samples);
    }
    trace
}

/// Assert every node's restaged slices hold exactly its samples in
/// presort-relative order.
fn assert_level_slices<C: Criterion>(
    frontier: &Frontier<C>,
    nodes: &[BuilderNode],
    original_ids: &[Vec<u32>],
) {
    for (i, node) in nodes.iter().enumerate() {
        let members: HashSet<u32> = node.samples.iter().copied().collect();
        for (pred, original) in original_ids.iter().enumerate() {
            let buf = frontier.buffer_bit(i, pred);
            let slice = &frontier.staged().pred_ids(pred, buf)
                [node.idx_start as usize..(node.idx_start + node.extent) as usize];
            let expected: Vec<u32> = original
                .iter()
                .copied()
                .filter(|s| members.contains(s))
                .collect();
            assert_eq!(
                slice, &expected[..],
                "node {i} pred {pred}: restaged slice diverged"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_values_dense_ranks() {
        let staged = stage_values(&[vec![3.0, 1.0, 3.0, 2.0]], &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(staged.pred_ids(0, 0), &[1, 3, 0, 2]);
        let ranks: Vec<u32> = staged.pred_cells(0, 0).iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 2]);
    }

    #[test]
    fn test_variance_cut_prefers_mean_shift() {
        // y jumps between the low and high half of the predictor
        let values = vec![vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]];
        let y = vec![1.0, 1.0, 1.0, 5.0, 5.0, 5.0];
        let staged = stage_values(&values, &y);

        let criterion = VarianceCriterion::new();
        let node = IndexNode::root(6, 6, y.iter().sum());
        let task = SplitTask {
            bottom_idx: 0,
            level_idx: 0,
            pred_idx: 0,
            set_idx: None,
            buf_idx: 0,
            node: &node,
            cells: staged.pred_cells(0, 0),
        };
        let nux = criterion.split_num(&task).unwrap();
        assert_eq!(nux.lh_extent, 3);
        assert!(nux.info > 0.0);
        assert_eq!(nux.s_count, 3);
    }

    #[test]
    fn test_variance_cut_rejects_flat_response() {
        let values = vec![vec![0.0, 1.0, 2.0, 3.0]];
        let y = vec![2.0, 2.0, 2.0, 2.0];
        let staged = stage_values(&values, &y);

        let criterion = VarianceCriterion::new();
        let node = IndexNode::root(4, 4, 8.0);
        let task = SplitTask {
            bottom_idx: 0,
            level_idx: 0,
            pred_idx: 0,
            set_idx: None,
            buf_idx: 0,
            node: &node,
            cells: staged.pred_cells(0, 0),
        };
        assert!(criterion.split_num(&task).is_none());
    }
}
