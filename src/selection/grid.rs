//! Reward grid and per-lane winner selection.
//!
//! Rewards come back from the scorer as one flat vector in pool order
//! (lane-major). The grid re-indexes them as `n_samples × genbatch`:
//!
//! ```text
//! flat (n=3, lanes=2):  [r(0,0) r(0,1) r(0,2) | r(1,0) r(1,1) r(1,2)]
//!                                 │
//!                                 ▼
//! grid:        lane 0   lane 1
//!   sample 0   r(0,0)   r(1,0)
//!   sample 1   r(0,1)   r(1,1)
//!   sample 2   r(0,2)   r(1,2)
//! ```

use crate::error::{Error, Result};
use crate::pool::PoolLayout;

/// Rewards for one selection event, indexed `[sample][lane]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardGrid {
    n_samples: usize,
    genbatch: usize,
    /// Row-major: `values[sample * genbatch + lane]`.
    values: Vec<f32>,
}

impl RewardGrid {
    /// Builds the grid from lane-major flat rewards.
    pub fn from_flat(rewards: &[f32], layout: PoolLayout) -> Result<Self> {
        let n_samples = layout.n_samples();
        let genbatch = layout.genbatch();
        if rewards.len() != layout.expanded_size() {
            return Err(Error::Scoring(format!(
                "expected {} rewards, scorer returned {}",
                layout.expanded_size(),
                rewards.len()
            )));
        }

        let mut values = vec![0.0; rewards.len()];
        for lane in 0..genbatch {
            for sample in 0..n_samples {
                values[sample * genbatch + lane] = rewards[layout.position(lane, sample)];
            }
        }

        Ok(Self {
            n_samples,
            genbatch,
            values,
        })
    }

    /// `(rows, columns)` = `(n_samples, genbatch)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.n_samples, self.genbatch)
    }

    /// Reward of candidate `sample` in `lane`, if both are in range.
    pub fn get(&self, sample: usize, lane: usize) -> Option<f32> {
        if sample < self.n_samples && lane < self.genbatch {
            Some(self.values[sample * self.genbatch + lane])
        } else {
            None
        }
    }

    /// Rewards of every candidate in one lane, by sample index.
    pub fn column(&self, lane: usize) -> Option<Vec<f32>> {
        (0..self.n_samples).map(|s| self.get(s, lane)).collect()
    }

    /// Winning sample index per lane.
    ///
    /// Ties go to the lowest sample index. NaN never beats a number; a lane
    /// with no comparable reward picks sample 0.
    pub fn winners(&self) -> Vec<usize> {
        (0..self.genbatch)
            .map(|lane| {
                let column: Vec<f32> = (0..self.n_samples)
                    .map(|s| self.values[s * self.genbatch + lane])
                    .collect();
                stable_argmax(&column)
            })
            .collect()
    }

    /// Reward of each lane's winner; NaN for a winner outside the grid.
    pub fn winning_rewards(&self, winners: &[usize]) -> Vec<f32> {
        winners
            .iter()
            .enumerate()
            .map(|(lane, &sample)| self.get(sample, lane).unwrap_or(f32::NAN))
            .collect()
    }
}

/// Index of the first maximum.
pub fn stable_argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        let current = values[best];
        if v > current || (current.is_nan() && !v.is_nan()) {
            best = i;
        }
    }
    best
}
