//! Level-core integration tests.
//!
//! Drives the frontier through the mini tree builder in
//! `canopy::testing`, covering root-level splitting, restage pair
//! accounting, singleton propagation, window eviction on deep trees,
//! no-split leaves and extinction.

use approx::assert_abs_diff_eq;

use canopy::testing::{grow, random_regression, stage_values, VarianceCriterion};
use canopy::training::{Frontier, FrontierConfig, Verbosity};

fn frontier_for(
    values: &[Vec<f64>],
    y: &[f64],
    config: FrontierConfig,
) -> Frontier<VarianceCriterion> {
    let staged = stage_values(values, y);
    let fac_card = vec![0; values.len()];
    Frontier::new(staged, VarianceCriterion::new(), &fac_card, config).unwrap()
}

/// Every sample lands in exactly one leaf.
fn assert_leaves_partition(leaves: &[Vec<u32>], bag_count: usize) {
    let mut seen: Vec<u32> = leaves.iter().flatten().copied().collect();
    seen.sort_unstable();
    let expected: Vec<u32> = (0..bag_count as u32).collect();
    assert_eq!(seen, expected);
}

#[test]
fn root_split_is_split_only() {
    let values = vec![vec![0.0, 1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0, 0.0]];
    let y = vec![1.0, 2.0, 5.0, 6.0];
    let mut frontier = frontier_for(&values, &y, FrontierConfig::default());

    assert_eq!(frontier.ancestor_count(), 0);

    let trace = grow(&mut frontier, &y, 1, false);

    // No ancestors at the root: two split pairs, nothing restaged
    assert_eq!(trace.stats[0].split_pairs, 2);
    assert_eq!(trace.stats[0].restage_nodes, 0);
    assert_eq!(trace.stats[0].restage_pairs, 0);

    let cand = trace.cands[0][0].expect("root should split");
    assert_eq!(cand.pred_idx, 0);
    assert_eq!(cand.nux.lh_extent, 2);
    assert_eq!(cand.buf_idx, 0);
    assert!(cand.left_expl);
    // Gain of splitting {1,2} off {5,6}: 9/2 + 121/2 - 196/4
    assert_abs_diff_eq!(cand.nux.info, 16.0, epsilon = 1e-9);
}

#[test]
fn first_restage_flips_buffer_bits() {
    let values = vec![vec![0.0, 1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0, 0.0]];
    let y = vec![1.0, 2.0, 5.0, 6.0];
    let mut frontier = frontier_for(&values, &y, FrontierConfig::default());

    let trace = grow(&mut frontier, &y, 2, false);
    assert_eq!(trace.levels, 2);

    // The level-1 restage pulled both children from the root slice
    assert_eq!(trace.stats[1].restage_nodes, 1);
    assert_eq!(trace.stats[1].restage_pairs, 2);
    assert_eq!(trace.stats[1].split_pairs, 4);

    // Window grew to two levels; restaged pairs landed in buffer 1
    assert_eq!(frontier.window_depth(), 2);
    for level_idx in 0..2 {
        for pred_idx in 0..2 {
            assert_eq!(frontier.buffer_bit(level_idx, pred_idx), 1);
        }
    }
    assert_leaves_partition(&trace.leaves, 4);
}

/// Two nodes by three predictors at level 1, with a run collapse on one
/// pair: restage tasks dedupe per (ancestor, predictor), the collapsed
/// pair is marked singleton, and the next level skips it.
#[test]
fn singleton_detected_and_skipped_next_level() {
    let values = vec![
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
        vec![0.0, 1.0, 2.0, 3.0, 9.0, 9.0, 9.0, 9.0],
        vec![5.0, 0.0, 6.0, 1.0, 7.0, 2.0, 8.0, 3.0],
    ];
    let y = vec![1.0, 1.0, 1.0, 1.0, 5.0, 5.0, 6.0, 6.0];
    let mut frontier = frontier_for(&values, &y, FrontierConfig::default());

    let trace = grow(&mut frontier, &y, 3, false);
    assert_eq!(trace.levels, 2);

    // Level 1: one restage node (the root) reached by all three
    // predictors; all six pairs split
    assert_eq!(trace.stats[1].restage_nodes, 1);
    assert_eq!(trace.stats[1].restage_pairs, 3);
    assert_eq!(trace.stats[1].split_pairs, 6);
    // The right child's second predictor collapsed to one run
    assert_eq!(trace.stats[1].singletons, 1);

    // Level 2: both children of the splitting node inherited the
    // singleton, so predictor 1 is skipped for splitting and restaging
    assert_eq!(trace.stats[2].split_pairs, 4);
    assert_eq!(trace.stats[2].restage_pairs, 2);
    assert_eq!(frontier.run_count(0, 1), 1);
    assert_eq!(frontier.run_count(1, 1), 1);
    assert_eq!(frontier.run_count(0, 0), 0);

    // Left child of the root went flat and retired whole
    assert_eq!(trace.leaves[0], vec![0, 1, 2, 3]);
    assert_leaves_partition(&trace.leaves, 8);
}

/// A geometric response peels exactly one sample per level, growing a
/// chain deeper than the window: old levels retire, training continues.
#[test]
fn deep_chain_evicts_window_levels() {
    let bag_count = 14;
    let values = vec![(0..bag_count).map(|i| i as f64).collect::<Vec<f64>>()];
    let y: Vec<f64> = (0..bag_count).map(|i| f64::powi(3.0, i as i32)).collect();
    let mut frontier = frontier_for(&values, &y, FrontierConfig::default());

    let trace = grow(&mut frontier, &y, 20, false);

    assert_eq!(trace.levels, 13);
    assert_eq!(frontier.window_depth(), 8);
    assert_eq!(frontier.ancestor_count(), 8);
    assert_leaves_partition(&trace.leaves, bag_count);
}

/// A factor predictor routes through the run-set handshake and the factor
/// split kernel; single-category children collapse to singletons.
#[test]
fn factor_predictor_splits_through_run_sets() {
    let values = vec![vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0]];
    let y = vec![0.0, 10.0, 10.5, 0.0, 10.0, 10.5, 0.0, 10.0, 10.5];
    let staged = stage_values(&values, &y);
    let mut frontier = Frontier::new(
        staged,
        VarianceCriterion::new(),
        &[3],
        FrontierConfig::default(),
    )
    .unwrap();

    let trace = grow(&mut frontier, &y, 4, false);

    // Root split went through the factor kernel with a run-set slot
    let root = trace.cands[0][0].expect("factor root should split");
    assert_eq!(root.set_idx, Some(0));
    assert!(root.left_expl);
    assert_eq!(root.nux.lh_extent, 3);
    // Category 0 carries no response mass: 0/3 + 61.5²/6 - 61.5²/9
    assert_abs_diff_eq!(root.nux.info, 210.125, epsilon = 1e-9);

    // Category 0 peeled off; its pair collapsed to a singleton during the
    // level-1 restage and the node retired
    assert_eq!(trace.levels, 2);
    assert_eq!(trace.stats[1].singletons, 1);
    assert_eq!(trace.leaves[0], vec![0, 3, 6]);

    // The remaining categories split apart, collapsing both level-2 nodes
    assert_eq!(trace.stats[2].singletons, 2);
    assert_eq!(frontier.run_count(0, 0), 1);
    assert_eq!(frontier.run_count(1, 0), 1);
    assert_leaves_partition(&trace.leaves, 9);
}

#[test]
fn run_sets_carry_run_counts() {
    let values = vec![vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]];
    let y = vec![0.0, 5.0, 9.0, 0.0, 5.0, 9.0];
    let staged = stage_values(&values, &y);
    let mut frontier = Frontier::new(
        staged,
        VarianceCriterion::new(),
        &[3],
        FrontierConfig::default(),
    )
    .unwrap();

    let root = canopy::training::IndexNode::root(6, 6, y.iter().sum());
    let cands = frontier.level_split(&[root]);

    assert!(cands[0].is_some());
    assert_eq!(frontier.criterion().last_run_sets(), &[3]);
}

#[test]
fn flat_response_yields_single_leaf() {
    let values = vec![vec![0.0, 1.0, 2.0, 3.0, 4.0]];
    let y = vec![2.0; 5];
    let mut frontier = frontier_for(&values, &y, FrontierConfig::default());

    let trace = grow(&mut frontier, &y, 4, false);

    assert_eq!(trace.levels, 0);
    // The pair was evaluated but nothing beat the gate
    assert_eq!(trace.stats[0].split_pairs, 1);
    assert!(trace.cands[0][0].is_none());
    assert_eq!(trace.leaves, vec![vec![0, 1, 2, 3, 4]]);
    for s in 0..5 {
        assert!(!frontier.sample_live(s));
    }
}

#[test]
fn grown_tree_extinguishes_every_sample() {
    let (values, y) = random_regression(3, 40, 11);
    let mut frontier = frontier_for(&values, &y, FrontierConfig::default());

    let trace = grow(&mut frontier, &y, 10, false);

    assert_leaves_partition(&trace.leaves, 40);
    for s in 0..40 {
        assert!(!frontier.sample_live(s));
    }
}

#[test]
fn min_ratio_gates_children() {
    let (values, y) = random_regression(2, 32, 5);
    let loose = grow(
        &mut frontier_for(&values, &y, FrontierConfig::default()),
        &y,
        8,
        false,
    );
    let strict = grow(
        &mut frontier_for(
            &values,
            &y,
            FrontierConfig {
                min_ratio: 0.9,
                ..FrontierConfig::default()
            },
        ),
        &y,
        8,
        false,
    );

    let splits = |t: &canopy::testing::GrowthTrace| {
        t.cands
            .iter()
            .flatten()
            .filter(|c| c.is_some())
            .count()
    };
    assert!(splits(&strict) <= splits(&loose));
    assert_leaves_partition(&strict.leaves, 32);
}

/// Predictor sampling leaves pairs unflagged; they ride along as
/// restage-only work when their ancestor's buffer moves, and age their
/// ancestor reference when it does not.
#[test]
fn predictor_sampling_grows_consistently() {
    let (values, y) = random_regression(3, 64, 3);

    let mut restage_only_total = 0;
    for seed in 0..8 {
        let staged = stage_values(&values, &y);
        let criterion = VarianceCriterion::with_pred_prob(0.5, seed);
        let mut frontier = Frontier::new(
            staged,
            criterion,
            &[0, 0, 0],
            FrontierConfig {
                parallel: true,
                ..FrontierConfig::default()
            },
        )
        .unwrap();

        let trace = grow(&mut frontier, &y, 12, false);

        assert!(frontier.window_depth() <= 8);
        assert_leaves_partition(&trace.leaves, 64);
        restage_only_total += trace.stats.iter().map(|s| s.restage_only_pairs).sum::<usize>();
    }
    assert!(
        restage_only_total > 0,
        "sampling should leave unflagged riders"
    );
}

#[test]
fn growth_is_deterministic() {
    let (values, y) = random_regression(3, 48, 23);

    let run = || {
        let mut frontier = frontier_for(&values, &y, FrontierConfig::default());
        grow(&mut frontier, &y, 10, false)
    };
    let a = run();
    let b = run();

    assert_eq!(a.levels, b.levels);
    assert_eq!(a.leaves, b.leaves);
    let infos = |t: &canopy::testing::GrowthTrace| -> Vec<(u32, u32)> {
        t.cands
            .iter()
            .flatten()
            .flatten()
            .map(|c| (c.pred_idx, c.nux.lh_extent))
            .collect()
    };
    assert_eq!(infos(&a), infos(&b));
}

#[test]
fn parallel_matches_sequential() {
    let (values, y) = random_regression(4, 96, 41);

    let run = |parallel: bool| {
        let mut frontier = frontier_for(
            &values,
            &y,
            FrontierConfig {
                parallel,
                verbosity: Verbosity::Silent,
                ..FrontierConfig::default()
            },
        );
        grow(&mut frontier, &y, 10, false)
    };
    let seq = run(false);
    let par = run(true);

    assert_eq!(seq.levels, par.levels);
    assert_eq!(seq.leaves, par.leaves);
    for (s, p) in seq.stats.iter().zip(&par.stats) {
        assert_eq!(s, p);
    }
}
