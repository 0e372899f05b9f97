//! Splitting-criterion contract.
//!
//! The frontier drives *when* pairs are evaluated; a [`Criterion`]
//! implementation decides *how*. Regression and classification families
//! plug in here, along with their factor run-set workspaces. The crate
//! ships a simple variance-gain criterion in [`crate::testing`] for
//! exercising the core.

use crate::training::frontier::{FrontierView, SplitNux};
use crate::training::staged::StagedCell;

/// Per-node state the tree builder supplies for one level.
#[derive(Clone, Copy, Debug)]
pub struct IndexNode {
    /// First index of the node's slice in every restaged predictor.
    pub idx_start: u32,
    /// Width of the node's slice (live samples).
    pub extent: u32,
    /// Bagged sample count subsumed by the node.
    pub s_count: u32,
    /// Summed response over the node.
    pub sum: f64,
    /// Information a split must reach, derived from the parent split.
    pub min_info: f64,
    /// Node path stamp from the root, one bit per level.
    pub path: u8,
}

impl IndexNode {
    /// Root node over the full bag.
    pub fn root(bag_count: u32, s_count: u32, sum: f64) -> Self {
        Self {
            idx_start: 0,
            extent: bag_count,
            s_count,
            sum,
            min_info: 0.0,
            path: 0,
        }
    }

    /// Slice coordinates and path stamp, as the restage machinery reads
    /// them.
    #[inline]
    pub fn path_coords(&self) -> (u32, u32, u8) {
        (self.idx_start, self.extent, self.path)
    }
}

/// One split evaluation handed to the criterion.
pub struct SplitTask<'a> {
    /// Flat pair offset in the frontier table.
    pub bottom_idx: u32,
    /// Node index within the level.
    pub level_idx: u32,
    /// Predictor index.
    pub pred_idx: u32,
    /// Run-set slot for factor pairs.
    pub set_idx: Option<u32>,
    /// Buffer half holding the pair's restaged slice.
    pub buf_idx: u8,
    /// The enclosing node.
    pub node: &'a IndexNode,
    /// The predictor's full pane; the node's slice is
    /// `[node.idx_start, node.idx_start + node.extent)`.
    pub cells: &'a [StagedCell],
}

/// A splitting family: flags splittable pairs per level and evaluates
/// individual pairs.
///
/// `split_num`/`split_fac` run inside the split fork-join and must be
/// reentrant over `&self`; per-level mutable state belongs in
/// `level_init`/`run_sets`/`run_offsets`/`level_clear`, which the driver
/// calls outside the parallel region.
pub trait Criterion: Send + Sync {
    /// Begin a level: return one splittability flag per pair, in
    /// predictor-major pair order.
    fn level_init(&mut self, nodes: &[IndexNode], view: &FrontierView<'_>) -> Vec<bool>;

    /// Announce the level's factor run sets; `safe_counts[set_idx]` is the
    /// emitted pair's run count.
    fn run_sets(&mut self, safe_counts: &[u32]);

    /// Lay out the run workspace before split dispatch.
    fn run_offsets(&mut self) {}

    /// Evaluate a numeric pair.
    fn split_num(&self, task: &SplitTask<'_>) -> Option<SplitNux>;

    /// Evaluate a factor pair (`task.set_idx` is present).
    fn split_fac(&self, task: &SplitTask<'_>) -> Option<SplitNux>;

    /// End a level: drop per-level state.
    fn level_clear(&mut self) {}
}
