//! Level orchestrator.
//!
//! [`Frontier`] owns the most recently trained tree levels: the per-pair
//! state table, the sliding ancestor window, the sample-path tracker, the
//! staged buffer pool and the split-signature registry. The tree builder
//! calls [`Frontier::level_split`] once per level and hands surviving
//! children back through [`Frontier::overlap`] / [`Frontier::inherit`] /
//! [`Frontier::de_overlap`].
//!
//! Per level the driver:
//! 1. asks the criterion for splittability flags,
//! 2. enumerates split and restage-only pairs, seeding restage nodes in
//!    the window,
//! 3. resolves reaching paths and buffer bits, then restages in parallel,
//! 4. evaluates split pairs in parallel,
//! 5. returns each node's gated best candidate.

use fixedbitset::FixedBitSet;
use rayon::prelude::*;
use thiserror::Error;

use crate::bits::BitMatrix;
use crate::training::criterion::{Criterion, IndexNode, SplitTask};
use crate::training::logger::{TrainingLogger, Verbosity};
use crate::training::staged::StagedSamples;

use super::pairs::{
    pair_offset, split_coords, AncestorRef, FrontierNode, FrontierView, RestagePair, SplitPair,
};
use super::path::{path_mask, PathTracker, PATH_MAX};
use super::restage::{PathDest, PathNode, RestageNode, SingletonMark};
use super::splitsig::{SplitCand, SplitNux, SplitSig};
use super::window::{LevelWindow, MrraCell};

/// Fanning a level out over the pool only pays once it carries at least
/// this many restage or split tasks; smaller levels run on one thread.
const MIN_FORK_TASKS: usize = 4;

/// Construction-time configuration of the level core.
#[derive(Clone, Copy, Debug)]
pub struct FrontierConfig {
    /// A candidate split is kept only if its information reaches
    /// `min_ratio` times the parent's.
    pub min_ratio: f64,
    /// Run the restage and split fork-joins on rayon's current pool.
    ///
    /// Shallow levels near the root rarely have enough (ancestor,
    /// predictor) tasks to occupy the pool, so the driver keeps them
    /// sequential even when this is set.
    pub parallel: bool,
    /// Training output verbosity.
    pub verbosity: Verbosity,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            min_ratio: 0.0,
            parallel: false,
            verbosity: Verbosity::default(),
        }
    }
}

/// Errors raised while assembling the level core.
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("cardinality table has {got} entries, staged pool has {expected} predictors")]
    CardinalityMismatch { expected: usize, got: usize },
    #[error("staged pool has no predictors")]
    NoPredictors,
    #[error("staged pool has an empty bag")]
    EmptyBag,
}

/// Per-level work counters, for logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LevelStats {
    /// Pairs evaluated for splitting.
    pub split_pairs: usize,
    /// Pairs emitted only to keep buffers coherent.
    pub restage_only_pairs: usize,
    /// Distinct ancestors restaged.
    pub restage_nodes: usize,
    /// (ancestor, predictor) restage tasks executed.
    pub restage_pairs: usize,
    /// Fresh singletons detected during restaging.
    pub singletons: usize,
}

/// Pair enumeration output for one level.
struct LevelPlan {
    split_pairs: Vec<SplitPair>,
    restage_nodes: Vec<RestageNode>,
    path_total: u32,
    safe_counts: Vec<u32>,
}

/// Restage initialization output for one level.
struct RestagePlan {
    path_nodes: Vec<PathNode>,
    restage_pairs: Vec<RestagePair>,
    source_bits: FixedBitSet,
}

/// The level orchestrator.
pub struct Frontier<C: Criterion> {
    staged: StagedSamples,
    criterion: C,
    tracker: PathTracker,
    window: LevelWindow,
    sig: SplitSig,
    logger: TrainingLogger,

    n_pred: usize,
    n_pred_fac: usize,
    bag_count: usize,
    level_count: usize,
    level_next: usize,
    anc_tot: usize,
    min_ratio: f64,
    parallel: bool,

    nodes: Vec<FrontierNode>,
    mrra_ref: Vec<AncestorRef>,
    restaged_now: Vec<bool>,
    pre_nodes: Vec<FrontierNode>,
    pre_mrra: Vec<AncestorRef>,

    stats: LevelStats,
}

impl<C: Criterion> Frontier<C> {
    /// Assemble the core over a staged pool.
    ///
    /// `fac_card[pred]` is the factor cardinality of each predictor, 0 for
    /// numeric. The frontier starts at the root level: one node, every
    /// predictor staged in buffer 0.
    pub fn new(
        staged: StagedSamples,
        criterion: C,
        fac_card: &[u32],
        config: FrontierConfig,
    ) -> Result<Self, FrontierError> {
        let n_pred = staged.n_pred();
        let bag_count = staged.bag_count();
        if n_pred == 0 {
            return Err(FrontierError::NoPredictors);
        }
        if bag_count == 0 {
            return Err(FrontierError::EmptyBag);
        }
        if fac_card.len() != n_pred {
            return Err(FrontierError::CardinalityMismatch {
                expected: n_pred,
                got: fac_card.len(),
            });
        }

        let nodes = fac_card.iter().map(|&card| FrontierNode::init(card)).collect();
        Ok(Self {
            tracker: PathTracker::new(bag_count),
            window: LevelWindow::seed(n_pred, bag_count),
            sig: SplitSig::new(n_pred),
            logger: TrainingLogger::new(config.verbosity),
            criterion,
            staged,
            n_pred,
            n_pred_fac: fac_card.iter().filter(|&&c| c > 0).count(),
            bag_count,
            level_count: 1,
            level_next: 0,
            anc_tot: 0,
            min_ratio: config.min_ratio,
            parallel: config.parallel,
            nodes,
            mrra_ref: vec![AncestorRef::default(); n_pred],
            restaged_now: Vec::new(),
            pre_nodes: Vec::new(),
            pre_mrra: Vec::new(),
            stats: LevelStats::default(),
        })
    }

    /// Split one level.
    ///
    /// `index_nodes` describes the level's nodes in frontier order. The
    /// returned vector holds, per node, the best split candidate at or
    /// above the node's information threshold, or `None` when the node
    /// becomes a leaf.
    pub fn level_split(&mut self, index_nodes: &[IndexNode]) -> Vec<Option<SplitCand>> {
        assert_eq!(index_nodes.len(), self.level_count);
        self.stats = LevelStats::default();

        let view = FrontierView {
            nodes: &self.nodes,
            level_count: self.level_count,
            n_pred: self.n_pred,
        };
        let flags = self.criterion.level_init(index_nodes, &view);
        assert_eq!(flags.len(), self.level_count * self.n_pred);
        self.sig.level_init(self.level_count);

        // Level 0 stages every pair fresh; later levels record per-pair
        // restaging for inheritance.
        self.restaged_now.clear();
        self.restaged_now
            .resize(self.level_count * self.n_pred, self.anc_tot == 0);

        let plan = self.pair_init(&flags);
        self.criterion.run_sets(&plan.safe_counts);

        if self.anc_tot > 0 {
            let stage = self.restage_init(index_nodes, &plan);
            self.restage(&plan.restage_nodes, &stage);
        }
        // All nodes at this level become reachable ancestors.
        self.anc_tot += self.level_count;

        self.criterion.run_offsets();
        self.split_dispatch(&plan.split_pairs, index_nodes);

        let result: Vec<Option<SplitCand>> = (0..self.level_count)
            .map(|level_idx| self.sig.arg_max(level_idx, index_nodes[level_idx].min_info))
            .collect();

        self.window.clear_touched();
        self.criterion.level_clear();
        self.sig.level_clear();

        let stats = self.stats;
        self.logger.debug(format_args!(
            "level: {} nodes, {} split pairs, {} restage-only, {} restage nodes, {} restage pairs, {} singletons",
            self.level_count,
            stats.split_pairs,
            stats.restage_only_pairs,
            stats.restage_nodes,
            stats.restage_pairs,
            stats.singletons,
        ));
        result
    }

    /// Enumerate the level's pairs and seed restage nodes.
    ///
    /// A pair is emitted iff it is not a singleton and its (ancestor,
    /// predictor) buffer is being restaged this level. An ancestor's
    /// buffer is restaged when any reaching pair is flagged for splitting
    /// or sits at the window edge; every other non-singleton pair reaching
    /// it joins as restage-only, so no pair's data is orphaned in the
    /// superseded buffer half.
    fn pair_init(&mut self, flags: &[bool]) -> LevelPlan {
        let n_pairs = self.level_count * self.n_pred;
        let mut split_pairs = Vec::with_capacity(n_pairs);
        let mut restage_nodes = Vec::with_capacity(self.anc_tot.min(n_pairs));
        let mut safe_counts = Vec::with_capacity(self.n_pred_fac * self.level_count);
        let mut path_total = 0u32;

        if self.anc_tot == 0 {
            // Root level: no ancestors, split-only pairs.
            for (bot, &flag) in flags.iter().enumerate() {
                let rl = self.nodes[bot].run_count();
                if rl == 1 || !flag {
                    continue;
                }
                let set_idx = (rl > 1).then(|| {
                    safe_counts.push(rl);
                    safe_counts.len() as u32 - 1
                });
                split_pairs.push(SplitPair {
                    bottom_idx: bot as u32,
                    restage_idx: None,
                    set_idx,
                    splits: true,
                });
            }
        } else {
            let (bases, retained) = self.window.slot_bases();

            // Pass one: which (ancestor, predictor) buffers move.
            let mut triggered = FixedBitSet::with_capacity(retained * self.n_pred);
            for (bot, &flag) in flags.iter().enumerate() {
                if self.nodes[bot].is_singleton() {
                    continue;
                }
                let mrra = self.mrra_ref[bot];
                if flag || mrra.del as usize == PATH_MAX {
                    let (_, pred_idx) = split_coords(bot, self.level_count);
                    let flat = self.window.flat_index(mrra.del, mrra.anc, &bases);
                    triggered.insert(flat * self.n_pred + pred_idx);
                }
            }

            // Pass two: emit every pair reaching a moving buffer.
            for (bot, &flag) in flags.iter().enumerate() {
                let rl = self.nodes[bot].run_count();
                if rl == 1 {
                    continue;
                }
                let (_, pred_idx) = split_coords(bot, self.level_count);
                let mrra = self.mrra_ref[bot];
                let flat = self.window.flat_index(mrra.del, mrra.anc, &bases);
                if !triggered.contains(flat * self.n_pred + pred_idx) {
                    continue;
                }
                let restage_idx = self.window.restage_idx(
                    mrra.del,
                    mrra.anc,
                    &mut path_total,
                    &mut restage_nodes,
                );
                let set_idx = (flag && rl > 1).then(|| {
                    safe_counts.push(rl);
                    safe_counts.len() as u32 - 1
                });
                split_pairs.push(SplitPair {
                    bottom_idx: bot as u32,
                    restage_idx: Some(restage_idx),
                    set_idx,
                    splits: flag,
                });
                self.restaged_now[bot] = true;
                if !flag {
                    self.stats.restage_only_pairs += 1;
                }
            }
        }

        self.stats.split_pairs = split_pairs.iter().filter(|p| p.splits).count();
        self.stats.restage_nodes = restage_nodes.len();
        LevelPlan {
            split_pairs,
            restage_nodes,
            path_total,
            safe_counts,
        }
    }

    /// Resolve reaching paths, source bits and target bits; push the
    /// level's window entries and evict beyond the bound.
    fn restage_init(&mut self, index_nodes: &[IndexNode], plan: &LevelPlan) -> RestagePlan {
        let rs_width = plan.restage_nodes.len() * self.n_pred;
        let mut path_nodes: Vec<PathNode> = vec![None; plan.path_total as usize];
        let mut source_bits = FixedBitSet::with_capacity(rs_width);
        let mut reaching = FixedBitSet::with_capacity(rs_width);
        let mut buf_targ = BitMatrix::zeros(self.level_count, self.n_pred);
        let mut mrra_targ = vec![MrraCell::unreached(); self.level_count];

        for pair in &plan.split_pairs {
            let Some(restage_idx) = pair.restage_idx else {
                continue;
            };
            let (level_idx, pred_idx) = split_coords(pair.bottom_idx as usize, self.level_count);
            let node = &plan.restage_nodes[restage_idx as usize];
            let (start, extent, path) = index_nodes[level_idx].path_coords();

            // The node's position among the ancestor's reaching paths.
            let rel = (path & path_mask(node.del)) as usize;
            path_nodes[node.path_zero as usize + rel] = Some(PathDest {
                level_idx: level_idx as u32,
                offset: start,
            });

            let mrra = self.mrra_ref[pair.bottom_idx as usize];
            let source = self.window.source_bit(mrra.del, mrra.anc, pred_idx);
            let rs_off = restage_idx as usize * self.n_pred + pred_idx;
            source_bits.set(rs_off, source);
            reaching.insert(rs_off);

            // The restaged slice lands in the complementary buffer half.
            buf_targ.set(level_idx, pred_idx, !source);
            mrra_targ[level_idx] = MrraCell::new(start, extent);
        }

        let restage_pairs: Vec<RestagePair> = reaching
            .ones()
            .map(|off| RestagePair {
                restage_idx: (off / self.n_pred) as u32,
                pred_idx: (off % self.n_pred) as u32,
            })
            .collect();
        self.stats.restage_pairs = restage_pairs.len();

        let evicted = self.window.push(buf_targ, mrra_targ);
        self.anc_tot -= evicted;

        RestagePlan {
            path_nodes,
            restage_pairs,
            source_bits,
        }
    }

    /// Execute the level's restage tasks, then fold fresh singletons into
    /// the pair table.
    fn restage(&mut self, nodes: &[RestageNode], plan: &RestagePlan) {
        let fan_out = self.parallel && plan.restage_pairs.len() >= MIN_FORK_TASKS;
        let panes = self.staged.panes();
        let tracker = &self.tracker;
        let path_nodes = &plan.path_nodes[..];
        let n_pred = self.n_pred;

        let run = |rp: &RestagePair| -> Vec<SingletonMark> {
            let node = &nodes[rp.restage_idx as usize];
            let source_bit = plan
                .source_bits
                .contains(rp.restage_idx as usize * n_pred + rp.pred_idx as usize);
            let mut marks = Vec::new();
            // SAFETY: tasks carry distinct (restage-node, predictor) keys.
            // Active ancestors of one predictor cover disjoint index
            // ranges, and a task writes only the complementary buffer half
            // of its own ancestor's range, so writes are pairwise disjoint
            // and never alias the source half any task reads.
            unsafe {
                if node.del == 1 {
                    node.restage_two(&panes, path_nodes, tracker, rp.pred_idx, source_bit, &mut marks);
                } else {
                    node.restage(&panes, path_nodes, tracker, rp.pred_idx, source_bit, &mut marks);
                }
            }
            marks
        };

        let marks: Vec<Vec<SingletonMark>> = if fan_out {
            plan.restage_pairs.par_iter().map(run).collect()
        } else {
            plan.restage_pairs.iter().map(run).collect()
        };

        for mark in marks.into_iter().flatten() {
            self.set_singleton(mark.level_idx as usize, mark.pred_idx as usize);
            self.stats.singletons += 1;
        }
    }

    /// Evaluate the level's split pairs and publish their candidates.
    fn split_dispatch(&mut self, split_pairs: &[SplitPair], index_nodes: &[IndexNode]) {
        struct Task {
            bottom_idx: u32,
            level_idx: u32,
            pred_idx: u32,
            set_idx: Option<u32>,
            buf_idx: u8,
        }

        let tasks: Vec<Task> = split_pairs
            .iter()
            .filter(|pair| pair.splits)
            .map(|pair| {
                let (level_idx, pred_idx) = split_coords(pair.bottom_idx as usize, self.level_count);
                Task {
                    bottom_idx: pair.bottom_idx,
                    level_idx: level_idx as u32,
                    pred_idx: pred_idx as u32,
                    set_idx: pair.set_idx,
                    buf_idx: self.window.current_bit(level_idx, pred_idx) as u8,
                }
            })
            .collect();

        let fan_out = self.parallel && tasks.len() >= MIN_FORK_TASKS;
        let criterion = &self.criterion;
        let staged = &self.staged;

        let eval = |task: &Task| -> Option<SplitNux> {
            let split_task = SplitTask {
                bottom_idx: task.bottom_idx,
                level_idx: task.level_idx,
                pred_idx: task.pred_idx,
                set_idx: task.set_idx,
                buf_idx: task.buf_idx,
                node: &index_nodes[task.level_idx as usize],
                cells: staged.pred_cells(task.pred_idx as usize, task.buf_idx),
            };
            if task.set_idx.is_some() {
                criterion.split_fac(&split_task)
            } else {
                criterion.split_num(&split_task)
            }
        };

        let results: Vec<Option<SplitNux>> = if fan_out {
            tasks.par_iter().map(eval).collect()
        } else {
            tasks.iter().map(eval).collect()
        };

        for (task, nux) in tasks.iter().zip(results) {
            if let Some(nux) = nux {
                self.ss_write(task.bottom_idx as usize, task.set_idx, task.buf_idx, nux);
            }
        }
    }

    /// Publish a split candidate for a pair.
    pub fn ss_write(&mut self, bottom_idx: usize, set_idx: Option<u32>, buf_idx: u8, nux: SplitNux) {
        let (level_idx, pred_idx) = split_coords(bottom_idx, self.level_count);
        self.sig.write(level_idx, pred_idx, set_idx, buf_idx, nux);
    }

    /// Record that a pair's restaged slice is a single run. The mark is
    /// idempotent and inherited by the pair's children.
    pub fn set_singleton(&mut self, level_idx: usize, pred_idx: usize) {
        self.nodes[pair_offset(level_idx, pred_idx, self.level_count)].set_singleton();
    }

    /// Announce the next level's node count and allocate its tables.
    pub fn overlap(&mut self, split_next: usize) {
        self.level_next = split_next;
        self.pre_nodes = vec![FrontierNode::default(); split_next * self.n_pred];
        self.pre_mrra = vec![AncestorRef::default(); split_next * self.n_pred];
    }

    /// Copy a splitting node's pair state into its surviving children.
    ///
    /// A pair restaged this level hands its children itself as governing
    /// ancestor; an un-restaged pair's children age its reference by one
    /// level.
    pub fn inherit(&mut self, level_idx: usize, l_next: Option<usize>, r_next: Option<usize>) {
        for child in [l_next, r_next].into_iter().flatten() {
            for pred_idx in 0..self.n_pred {
                let src = pair_offset(level_idx, pred_idx, self.level_count);
                let dst = pair_offset(child, pred_idx, self.level_next);
                self.pre_nodes[dst] = self.nodes[src];
                self.pre_mrra[dst] = if self.restaged_now[src] {
                    AncestorRef::restaged_at(level_idx)
                } else {
                    self.mrra_ref[src].aged()
                };
            }
        }
    }

    /// Swap the next level's tables in.
    pub fn de_overlap(&mut self) {
        self.nodes = std::mem::take(&mut self.pre_nodes);
        self.mrra_ref = std::mem::take(&mut self.pre_mrra);
        self.level_count = self.level_next;
        self.level_next = 0;
    }

    /// Stamp a sample as going left at this level's split.
    #[inline]
    pub fn path_left(&mut self, s_idx: u32) {
        self.tracker.append(s_idx, false);
    }

    /// Stamp a sample as going right at this level's split.
    #[inline]
    pub fn path_right(&mut self, s_idx: u32) {
        self.tracker.append(s_idx, true);
    }

    /// Retire a sample that fell into a leaf.
    #[inline]
    pub fn path_extinct(&mut self, s_idx: u32) {
        self.tracker.set_extinct(s_idx);
    }

    /// Whether a sample is still live.
    #[inline]
    pub fn sample_live(&self, s_idx: u32) -> bool {
        self.tracker.is_live(s_idx).is_some()
    }

    /// Nodes in the current level.
    #[inline]
    pub fn level_count(&self) -> usize {
        self.level_count
    }

    /// Number of predictors.
    #[inline]
    pub fn n_pred(&self) -> usize {
        self.n_pred
    }

    /// Number of bagged samples.
    #[inline]
    pub fn bag_count(&self) -> usize {
        self.bag_count
    }

    /// Minimum-information ratio from the configuration.
    #[inline]
    pub fn min_ratio(&self) -> f64 {
        self.min_ratio
    }

    /// Reachable-ancestor total across retained levels.
    #[inline]
    pub fn ancestor_count(&self) -> usize {
        self.anc_tot
    }

    /// Retained levels in the sliding window.
    #[inline]
    pub fn window_depth(&self) -> usize {
        self.window.depth()
    }

    /// Current buffer half of a pair (valid until the next level's
    /// restage).
    #[inline]
    pub fn buffer_bit(&self, level_idx: usize, pred_idx: usize) -> u8 {
        self.window.current_bit(level_idx, pred_idx) as u8
    }

    /// Run count of a pair in the current table.
    #[inline]
    pub fn run_count(&self, level_idx: usize, pred_idx: usize) -> u32 {
        self.nodes[pair_offset(level_idx, pred_idx, self.level_count)].run_count()
    }

    /// Work counters of the most recent level.
    #[inline]
    pub fn last_stats(&self) -> LevelStats {
        self.stats
    }

    /// The staged buffer pool, for split replay by the tree builder.
    #[inline]
    pub fn staged(&self) -> &StagedSamples {
        &self.staged
    }

    /// The splitting criterion.
    #[inline]
    pub fn criterion(&self) -> &C {
        &self.criterion
    }
}
