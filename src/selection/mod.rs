//! Block selection.
//!
//! This module contains:
//! - RewardGrid for `n_samples × genbatch` reward bookkeeping and stable argmax
//! - BlockSearch, the advance / select / re-expand state machine

pub mod block;
pub mod grid;

pub use block::{BlockPhase, BlockSearch, SearchOutcome, SelectionEvent};
pub use grid::{stable_argmax, RewardGrid};
