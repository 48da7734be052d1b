//! Lane-major candidate layout.
//!
//! Inside a block the pool holds `n_samples` candidates for each of the
//! `genbatch` lanes. Candidates are stored lane-major, so every lane owns a
//! contiguous slice of stride `n_samples`:
//!
//! ```text
//! position:  0    1    2    3  |  4    5    6    7
//! lane:      0    0    0    0  |  1    1    1    1
//! sample:    0    1    2    3  |  0    1    2    3
//! ```
//!
//! Right after a collapse the pool holds exactly one state per lane and
//! position equals lane.

use crate::error::{Error, Result};

/// Geometry of a candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    n_samples: usize,
    genbatch: usize,
}

impl PoolLayout {
    /// Create a layout for `n_samples` candidates over `genbatch` lanes.
    pub fn new(n_samples: usize, genbatch: usize) -> Result<Self> {
        if n_samples == 0 || genbatch == 0 {
            return Err(Error::PoolShape(format!(
                "n_samples ({n_samples}) and genbatch ({genbatch}) must be positive"
            )));
        }
        Ok(Self {
            n_samples,
            genbatch,
        })
    }

    /// BoN width.
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Number of lanes.
    pub fn genbatch(&self) -> usize {
        self.genbatch
    }

    /// Pool size inside a block.
    pub fn expanded_size(&self) -> usize {
        self.n_samples * self.genbatch
    }

    /// Pool size right after a collapse.
    pub fn collapsed_size(&self) -> usize {
        self.genbatch
    }

    /// Flat position of candidate `(lane, sample)` in an expanded pool.
    pub fn position(&self, lane: usize, sample: usize) -> usize {
        debug_assert!(lane < self.genbatch && sample < self.n_samples);
        lane * self.n_samples + sample
    }

    /// Lane owning the expanded-pool position.
    pub fn lane_of(&self, position: usize) -> usize {
        position / self.n_samples
    }

    /// Sample index of the expanded-pool position within its lane.
    pub fn sample_of(&self, position: usize) -> usize {
        position % self.n_samples
    }

    /// Checks that `size` is one of the two legal pool sizes.
    pub fn check_size(&self, size: usize) -> Result<()> {
        if size == self.expanded_size() || size == self.collapsed_size() {
            Ok(())
        } else {
            Err(Error::PoolShape(format!(
                "pool size {size} is neither {} (collapsed) nor {} (expanded)",
                self.collapsed_size(),
                self.expanded_size()
            )))
        }
    }
}
