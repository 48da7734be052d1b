//! Candidate pool management.
//!
//! This module contains:
//! - PoolLayout for lane-major `(lane, sample)` addressing
//! - `replicate` / `collapse` fan-out and fan-in transforms
//! - CandidatePool, the size-checked in-flight batch

pub mod candidates;
pub mod layout;

pub use candidates::{collapse, replicate, CandidatePool};
pub use layout::PoolLayout;
