//! Double-buffered per-predictor sample storage.
//!
//! The presort stage lays every predictor's bagged samples out in value
//! order. Training never re-sorts: restaging copies a parent's ordered
//! slice into contiguous per-child slices, alternating between the two
//! buffer halves of each predictor. [`StagedSamples`] owns that storage
//! and exposes the (predictor, buffer-bit) panes the level driver and the
//! splitting criterion read.
//!
//! Layout: a single cell vector of `2 * n_pred * bag_count` entries plus a
//! parallel sample-index vector. Pane `(pred, buf)` starts at
//! `(buf * n_pred + pred) * bag_count`.

use thiserror::Error;

/// One staged sample observation for a predictor.
///
/// `rank` is the dense value rank from the presort; equal ranks form a
/// *run*. `y_sum` and `s_count` carry the bagged response mass so criteria
/// can integrate over slices without touching the raw frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StagedCell {
    /// Dense value rank within the predictor.
    pub rank: u32,
    /// Number of bagged occurrences of the sample.
    pub s_count: u32,
    /// Summed response over the bagged occurrences.
    pub y_sum: f64,
}

/// Errors raised while loading the staged pool.
#[derive(Debug, Error)]
pub enum StagedError {
    #[error("predictor {pred} staged with {got} cells, bag holds {expected}")]
    LengthMismatch {
        pred: usize,
        expected: usize,
        got: usize,
    },
    #[error("predictor index {pred} out of range ({n_pred} predictors)")]
    PredOutOfRange { pred: usize, n_pred: usize },
}

/// Double-buffered ordered sample storage for all predictors.
pub struct StagedSamples {
    cells: Vec<StagedCell>,
    ids: Vec<u32>,
    n_pred: usize,
    bag_count: usize,
}

impl StagedSamples {
    /// Allocate a zeroed pool for `n_pred` predictors over `bag_count`
    /// samples. Buffer 0 of each predictor is the staging target.
    pub fn new(n_pred: usize, bag_count: usize) -> Self {
        let len = 2 * n_pred * bag_count;
        Self {
            cells: vec![StagedCell::default(); len],
            ids: vec![0; len],
            n_pred,
            bag_count,
        }
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

    #[inline]
    fn pane_start(&self, pred: usize, buf: u8) -> usize {
        debug_assert!(pred < self.n_pred && buf < 2);
        (buf as usize * self.n_pred + pred) * self.bag_count
    }

    /// Load a predictor's presorted cells into buffer 0.
    ///
    /// `cells[i]` describes the sample `ids[i]`; both must already be in
    /// ascending rank order.
    pub fn stage(
        &mut self,
        pred: usize,
        cells: &[StagedCell],
        ids: &[u32],
    ) -> Result<(), StagedError> {
        if pred >= self.n_pred {
            return Err(StagedError::PredOutOfRange {
                pred,
                n_pred: self.n_pred,
            });
        }
        if cells.len() != self.bag_count || ids.len() != self.bag_count {
            return Err(StagedError::LengthMismatch {
                pred,
                expected: self.bag_count,
                got: cells.len().min(ids.len()),
            });
        }
        let start = self.pane_start(pred, 0);
        self.cells[start..start + self.bag_count].copy_from_slice(cells);
        self.ids[start..start + self.bag_count].copy_from_slice(ids);
        Ok(())
    }

    /// Ordered cells of a predictor's buffer half.
    #[inline]
    pub fn pred_cells(&self, pred: usize, buf: u8) -> &[StagedCell] {
        let start = self.pane_start(pred, buf);
        &self.cells[start..start + self.bag_count]
    }

    /// Sample indices parallel to [`Self::pred_cells`].
    #[inline]
    pub fn pred_ids(&self, pred: usize, buf: u8) -> &[u32] {
        let start = self.pane_start(pred, buf);
        &self.ids[start..start + self.bag_count]
    }

    /// Whether the closed slice `[lo, hi]` of a pane is a single run.
    ///
    /// Slices are rank-ordered, so equal endpoint ranks imply every cell in
    /// between shares the rank.
    #[inline]
    pub fn is_run(&self, pred: usize, buf: u8, lo: usize, hi: usize) -> bool {
        let pane = self.pred_cells(pred, buf);
        pane[lo].rank == pane[hi].rank
    }

    /// Raw pane handle for the restage fork-join region.
    pub(crate) fn panes(&mut self) -> BufferPanes {
        BufferPanes {
            cells: self.cells.as_mut_ptr(),
            ids: self.ids.as_mut_ptr(),
            n_pred: self.n_pred,
            bag_count: self.bag_count,
        }
    }
}

/// Raw-pointer view over the staged pool shared by restage tasks.
///
/// # Safety
///
/// Restage tasks read each source pane immutably and write target panes at
/// offsets derived from non-overlapping path windows; the level driver
/// guarantees the written regions are pairwise disjoint and disjoint from
/// every region read during the same fork-join. See the restage dispatch
/// for the full argument.
#[derive(Clone, Copy)]
pub(crate) struct BufferPanes {
    cells: *mut StagedCell,
    ids: *mut u32,
    n_pred: usize,
    bag_count: usize,
}

impl BufferPanes {
    /// Flat offset of pane `(pred, buf)`.
    #[inline]
    pub(crate) fn pane_start(&self, pred: usize, buf: bool) -> usize {
        (buf as usize * self.n_pred + pred) * self.bag_count
    }

    /// Read the cell at flat index `idx`.
    ///
    /// # Safety
    /// `idx` must lie inside the pool and the cell must not be concurrently
    /// written.
    #[inline]
    pub(crate) unsafe fn cell(&self, idx: usize) -> StagedCell {
        *self.cells.add(idx)
    }

    /// Read the sample id at flat index `idx`.
    ///
    /// # Safety
    /// As [`Self::cell`].
    #[inline]
    pub(crate) unsafe fn id(&self, idx: usize) -> u32 {
        *self.ids.add(idx)
    }

    /// Write cell and sample id at flat index `idx`.
    ///
    /// # Safety
    /// `idx` must lie inside the pool and be written by exactly one task
    /// during the fork-join.
    #[inline]
    pub(crate) unsafe fn write(&self, idx: usize, cell: StagedCell, id: u32) {
        *self.cells.add(idx) = cell;
        *self.ids.add(idx) = id;
    }
}

// SAFETY: tasks touch pairwise-disjoint regions; see `BufferPanes` docs.
unsafe impl Send for BufferPanes {}
unsafe impl Sync for BufferPanes {}
