//! Sliding window of the most recently restaged levels.
//!
//! For each retained level the window keeps, per node, the slice that a
//! restage landed there ([`MrraCell`]) and, per (node, predictor), the
//! buffer bit that restage wrote ([`BitMatrix`] row per node). Pairs look
//! their governing ancestor up `del` levels back; first touch in a level
//! assigns the ancestor a dense restage index and reserves `2^del` path
//! slots.
//!
//! Both deques are capped at [`PATH_MAX`] levels; evicting a level retires
//! its nodes from the ancestor total.

use std::collections::VecDeque;

use crate::bits::BitMatrix;

use super::path::PATH_MAX;
use super::restage::RestageNode;

/// Restaged slice of one node at one retained level.
#[derive(Clone, Copy, Debug)]
pub struct MrraCell {
    start: u32,
    extent: u32,
    restage_idx: Option<u32>,
}

impl MrraCell {
    /// Cell for a node whose slice was restaged as `[start, start+extent)`.
    #[inline]
    pub fn new(start: u32, extent: u32) -> Self {
        Self {
            start,
            extent,
            restage_idx: None,
        }
    }

    /// Placeholder for a node no restage reached; never referenced by
    /// descendants.
    #[inline]
    pub fn unreached() -> Self {
        Self::new(0, 0)
    }
}

/// Sliding deques of per-level restage metadata.
pub struct LevelWindow {
    /// Buffer bits written by each retained level's restage, one row per
    /// node of that level.
    buffer: VecDeque<BitMatrix>,
    /// Restaged slices of each retained level's nodes.
    mrra: VecDeque<Vec<MrraCell>>,
}

impl LevelWindow {
    /// Seed the window with the staging state: one root node covering the
    /// whole bag, all predictors in buffer 0.
    pub fn seed(n_pred: usize, bag_count: usize) -> Self {
        let mut buffer = VecDeque::with_capacity(PATH_MAX + 1);
        buffer.push_back(BitMatrix::zeros(1, n_pred));
        let mut mrra = VecDeque::with_capacity(PATH_MAX + 1);
        mrra.push_back(vec![MrraCell::new(0, bag_count as u32)]);
        Self { buffer, mrra }
    }

    /// Number of retained levels.
    #[inline]
    pub fn depth(&self) -> usize {
        debug_assert_eq!(self.buffer.len(), self.mrra.len());
        self.mrra.len()
    }

    /// Total node count across retained levels.
    #[inline]
    pub fn retained_nodes(&self) -> usize {
        self.mrra.iter().map(Vec::len).sum()
    }

    /// Per-level base offsets for flattening (level, node) into a dense
    /// ancestor index, front to back, plus the total.
    pub fn slot_bases(&self) -> (Vec<usize>, usize) {
        let mut bases = Vec::with_capacity(self.mrra.len());
        let mut total = 0;
        for level in &self.mrra {
            bases.push(total);
            total += level.len();
        }
        (bases, total)
    }

    /// Dense ancestor index of the node `del` levels back.
    #[inline]
    pub fn flat_index(&self, del: u8, anc: u32, bases: &[usize]) -> usize {
        bases[self.mrra.len() - del as usize] + anc as usize
    }

    /// Buffer bit holding the data the ancestor's restage wrote for a
    /// predictor.
    #[inline]
    pub fn source_bit(&self, del: u8, anc: u32, pred_idx: usize) -> bool {
        let slot = self.buffer.len() - del as usize;
        self.buffer[slot].get(anc as usize, pred_idx)
    }

    /// Buffer bit of a pair at the newest retained level.
    #[inline]
    pub fn current_bit(&self, level_idx: usize, pred_idx: usize) -> bool {
        self.buffer
            .back()
            .expect("window is never empty")
            .get(level_idx, pred_idx)
    }

    /// Dense restage index of an ancestor, assigning it on first touch.
    ///
    /// First touch appends a [`RestageNode`] carrying the ancestor's slice
    /// and reserves `2^del` path slots from `path_accum`.
    pub fn restage_idx(
        &mut self,
        del: u8,
        anc: u32,
        path_accum: &mut u32,
        nodes: &mut Vec<RestageNode>,
    ) -> u32 {
        let slot = self.mrra.len() - del as usize;
        let cell = &mut self.mrra[slot][anc as usize];
        if let Some(idx) = cell.restage_idx {
            return idx;
        }
        let idx = nodes.len() as u32;
        nodes.push(RestageNode {
            start: cell.start,
            extent: cell.extent,
            del,
            path_zero: *path_accum,
        });
        *path_accum += 1u32 << del;
        cell.restage_idx = Some(idx);
        idx
    }

    /// Append the level's restage results and evict beyond the window
    /// bound. Returns the node count of the evicted level, if any.
    pub fn push(&mut self, buf_targ: BitMatrix, mrra_targ: Vec<MrraCell>) -> usize {
        self.buffer.push_back(buf_targ);
        self.mrra.push_back(mrra_targ);
        if self.mrra.len() > PATH_MAX {
            self.buffer.pop_front();
            self.mrra
                .pop_front()
                .map(|level| level.len())
                .unwrap_or(0)
        } else {
            0
        }
    }

    /// Reset every first-touch restage index for the next level.
    pub fn clear_touched(&mut self) {
        for level in &mut self.mrra {
            for cell in level {
                cell.restage_idx = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_state() {
        let w = LevelWindow::seed(3, 100);
        assert_eq!(w.depth(), 1);
        assert_eq!(w.retained_nodes(), 1);
        for pred in 0..3 {
            assert!(!w.source_bit(1, 0, pred));
            assert!(!w.current_bit(0, pred));
        }
    }

    #[test]
    fn test_first_touch_assigns_dense_indices() {
        let mut w = LevelWindow::seed(2, 10);
        let mut accum = 0;
        let mut nodes = Vec::new();

        let a = w.restage_idx(1, 0, &mut accum, &mut nodes);
        let b = w.restage_idx(1, 0, &mut accum, &mut nodes);
        assert_eq!(a, 0);
        assert_eq!(b, 0);
        assert_eq!(nodes.len(), 1);
        assert_eq!(accum, 2);
        assert_eq!(nodes[0].start, 0);
        assert_eq!(nodes[0].extent, 10);
        assert_eq!(nodes[0].path_zero, 0);

        w.clear_touched();
        let c = w.restage_idx(1, 0, &mut accum, &mut nodes);
        assert_eq!(c, 1);
        assert_eq!(nodes[1].path_zero, 2);
    }

    #[test]
    fn test_window_bound_and_eviction() {
        let mut w = LevelWindow::seed(1, 8);
        for level in 0..12usize {
            let n_nodes = level + 2;
            let evicted = w.push(
                BitMatrix::zeros(n_nodes, 1),
                vec![MrraCell::unreached(); n_nodes],
            );
            assert!(w.depth() <= PATH_MAX);
            if w.depth() == PATH_MAX && level >= PATH_MAX - 1 {
                // Oldest level retires once the window is full
                let expected = if level == PATH_MAX - 1 { 1 } else { level + 2 - PATH_MAX };
                assert_eq!(evicted, expected);
            } else {
                assert_eq!(evicted, 0);
            }
        }
    }

    #[test]
    fn test_source_bit_addresses_by_del() {
        let mut w = LevelWindow::seed(1, 4);
        let mut targ = BitMatrix::zeros(2, 1);
        targ.set(1, 0, true);
        w.push(targ, vec![MrraCell::new(0, 2), MrraCell::new(2, 2)]);

        // del=1 reaches the pushed level, del=2 the seed
        assert!(w.source_bit(1, 1, 0));
        assert!(!w.source_bit(1, 0, 0));
        assert!(!w.source_bit(2, 0, 0));
    }
}
