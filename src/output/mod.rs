//! Output and reward persistence.
//!
//! This module contains:
//! - OutputWriter for decoding, final scoring and image writing
//! - RewardStore for the per-prompt `rewards.json`
//! - PNG conversion helpers

pub mod persist;
pub mod png;
pub mod store;

pub use persist::{OutputWriter, SENTINEL_REWARD};
pub use store::{RewardStore, REWARDS_FILE};
