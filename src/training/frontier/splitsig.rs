//! Split-signature registry.
//!
//! Split kernels publish their raw results ([`SplitNux`]) per
//! (node, predictor) pair into a dense per-level workspace; after the
//! split fork-join the driver asks for each node's best candidate through
//! a minimum-information gate.
//!
//! Cells are stored predictor-major (split index fastest-varying) so
//! concurrent per-predictor publications land far apart.

/// Raw numerical result of one split evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplitNux {
    /// First index of the split slice (not derivable from the node alone
    /// once dense ranks introduce implicit indices).
    pub idx_start: u32,
    /// Index count of the left-hand side.
    pub lh_extent: u32,
    /// Samples subsumed by the left-hand side.
    pub s_count: u32,
    /// Information content of the split.
    pub info: f64,
    /// Rank bounding the left-hand side (numeric only).
    pub rank_lh: u32,
    /// Rank bounding the right-hand side (numeric only).
    pub rank_rh: u32,
    /// Implicit (dense-rank) index count on the left (numeric only).
    pub lh_implicit: u32,
}

impl SplitNux {
    /// Result of a factor split; ranks are not meaningful.
    pub fn new(idx_start: u32, lh_extent: u32, s_count: u32, info: f64) -> Self {
        Self {
            idx_start,
            lh_extent,
            s_count,
            info,
            rank_lh: 0,
            rank_rh: 0,
            lh_implicit: 0,
        }
    }

    /// Result of a numeric split with explicit bounding ranks.
    pub fn new_num(
        idx_start: u32,
        lh_extent: u32,
        s_count: u32,
        info: f64,
        rank_lh: u32,
        rank_rh: u32,
        lh_implicit: u32,
    ) -> Self {
        Self {
            idx_start,
            lh_extent,
            s_count,
            info,
            rank_lh,
            rank_rh,
            lh_implicit,
        }
    }
}

/// A published split candidate, ready for the tree builder.
#[derive(Clone, Copy, Debug)]
pub struct SplitCand {
    /// Winning predictor.
    pub pred_idx: u32,
    /// Run-set slot, for factor splits.
    pub set_idx: Option<u32>,
    /// Buffer half holding the predictor's restaged slice.
    pub buf_idx: u8,
    /// Whether the left-hand side's indices are explicit.
    pub left_expl: bool,
    /// Raw split result.
    pub nux: SplitNux,
}

impl SplitCand {
    /// Information threshold the node's children must beat.
    #[inline]
    pub fn min_info(&self, min_ratio: f64) -> f64 {
        min_ratio * self.nux.info
    }

    /// Mean of the bounding ranks, for numeric decision values.
    #[inline]
    pub fn rank_mean(&self) -> f64 {
        0.5 * (self.nux.rank_lh as f64 + self.nux.rank_rh as f64)
    }
}

/// Dense per-level workspace of split candidates.
pub struct SplitSig {
    n_pred: usize,
    split_count: usize,
    cells: Vec<Option<SplitCand>>,
}

impl SplitSig {
    pub fn new(n_pred: usize) -> Self {
        Self {
            n_pred,
            split_count: 0,
            cells: Vec::new(),
        }
    }

    /// Size the workspace for a level's node count.
    pub fn level_init(&mut self, split_count: usize) {
        self.split_count = split_count;
        self.cells.clear();
        self.cells.resize(self.n_pred * split_count, None);
    }

    /// Publish a candidate at `(split_idx, pred_idx)`.
    pub fn write(
        &mut self,
        split_idx: usize,
        pred_idx: usize,
        set_idx: Option<u32>,
        buf_idx: u8,
        nux: SplitNux,
    ) {
        debug_assert!(split_idx < self.split_count && pred_idx < self.n_pred);
        let left_expl = set_idx.is_some() || nux.lh_implicit == 0;
        self.cells[pred_idx * self.split_count + split_idx] = Some(SplitCand {
            pred_idx: pred_idx as u32,
            set_idx,
            buf_idx,
            left_expl,
            nux,
        });
    }

    /// Best candidate for a node, gated by the minimum information
    /// threshold.
    ///
    /// A cell qualifies iff it was written with positive information at or
    /// above `gain_min`; ties keep the lowest predictor.
    pub fn arg_max(&self, split_idx: usize, gain_min: f64) -> Option<SplitCand> {
        let mut best: Option<SplitCand> = None;
        for pred_idx in 0..self.n_pred {
            let Some(cand) = self.cells[pred_idx * self.split_count + split_idx] else {
                continue;
            };
            if cand.nux.info <= 0.0 || cand.nux.info < gain_min {
                continue;
            }
            if best.map_or(true, |b| cand.nux.info > b.nux.info) {
                best = Some(cand);
            }
        }
        best
    }

    /// Drop the level's candidates.
    pub fn level_clear(&mut self) {
        self.cells.clear();
        self.split_count = 0;
    }
}
