//! canopy: level-wise training core for random-forest learners.
//!
//! This crate implements the breadth-first heart of a random-forest
//! trainer: for each level of a growing tree it enumerates candidate
//! (node, predictor) splitting pairs, *restages* the per-predictor sorted
//! sample buffers so every descendant node sees its own contiguous,
//! still-sorted slice, and dispatches split evaluation in parallel before
//! selecting the best split per node.
//!
//! The splitting mathematics themselves are pluggable through the
//! [`training::Criterion`] trait; the ensemble driver, presorting and
//! prediction live outside this crate and talk to the core through the
//! [`training::Frontier`] orchestrator.

pub mod bits;
pub mod testing;
pub mod training;
