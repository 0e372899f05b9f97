//! Training infrastructure.
//!
//! This module provides the level-wise training core and the contracts it
//! shares with the surrounding trainer:
//!
//! - [`frontier`]: the level orchestrator, restage engine, sliding
//!   ancestor window and split-signature registry
//! - [`Criterion`], [`IndexNode`]: the splitting-family contract
//! - [`StagedSamples`]: double-buffered per-predictor sorted storage
//! - [`TrainingLogger`], [`Verbosity`]: structured logging

pub mod frontier;

mod criterion;
mod logger;
mod staged;

pub use criterion::{Criterion, IndexNode, SplitTask};
pub use frontier::{
    Frontier, FrontierConfig, FrontierError, FrontierView, LevelStats, SplitCand, SplitNux,
    PATH_MAX,
};
pub use logger::{TrainingLogger, Verbosity};
pub use staged::{StagedCell, StagedError, StagedSamples};
