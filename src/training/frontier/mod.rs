//! Level-wise training frontier.
//!
//! The frontier is the set of tree nodes still growing, together with the
//! bookkeeping that lets each level reuse the presorted predictor
//! buffers: a path stamp per live sample ([`PathTracker`]), a sliding
//! window of the most recently restaged ancestor levels ([`LevelWindow`]),
//! a per-pair state table, restage kernels, and the split-signature
//! registry ([`SplitSig`]).
//!
//! [`Frontier`] ties these together and drives one level at a time; see
//! its module docs for the per-level protocol.

mod driver;
mod pairs;
mod path;
mod restage;
mod splitsig;
mod window;

pub use driver::{Frontier, FrontierConfig, FrontierError, LevelStats};
pub use pairs::{
    pair_offset, split_coords, AncestorRef, FrontierNode, FrontierView, RestagePair, SplitPair,
};
pub use path::{path_mask, PathTracker, PATH_MAX};
pub use restage::{PathDest, PathNode, RestageNode, SingletonMark};
pub use splitsig::{SplitCand, SplitNux, SplitSig};
pub use window::{LevelWindow, MrraCell};
