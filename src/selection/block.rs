//! Block-wise Best-of-N search over one outer batch.
//!
//! ## Block Flow
//!
//! ```text
//!   lanes (genbatch) ──replicate──► pool (n_samples × genbatch)
//!                                      │
//!             ┌────────────────────────┤
//!             │                        ▼
//!             │                 Advancing: one guided step
//!             │                        │
//!             │          block_size steps done, or last step?
//!             │                 no ◄───┴───► yes
//!             │                               │
//!             │                               ▼
//!             │                 Selecting: preview (or final state)
//!             │                   → decode → score → grid → argmax
//!             │                   → collapse to genbatch
//!             │                               │
//!             │        not last step ◄────────┴────────► last step
//!             │              │                               │
//!             └──replicate───┘                               ▼
//!                                            Terminal: genbatch final states
//! ```

use candle_core::Tensor;
use tracing::debug;

use super::grid::RewardGrid;
use crate::denoise::{Denoiser, GuidedDenoiser};
use crate::error::{Error, Result};
use crate::pool::{CandidatePool, PoolLayout};
use crate::reward::Rewarder;

/// Phase of the block state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    /// Stepping the full candidate pool.
    Advancing,
    /// Scoring candidates and collapsing to winners.
    Selecting,
    /// Schedule finished; the pool holds one final state per lane.
    Terminal,
}

/// One selection point.
#[derive(Debug, Clone)]
pub struct SelectionEvent {
    /// Index of the step that closed the block.
    pub step_index: usize,
    /// Whether this was the last step of the schedule.
    pub terminal: bool,
    /// Winning sample index per lane.
    pub winners: Vec<usize>,
    /// Rewards of every candidate.
    pub grid: RewardGrid,
}

impl SelectionEvent {
    /// Reward of each lane's winner.
    pub fn winning_rewards(&self) -> Vec<f32> {
        self.grid.winning_rewards(&self.winners)
    }
}

/// Result of a full search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Final states, one per lane.
    pub states: Tensor,
    /// Winning rewards of the terminal selection, one per lane.
    pub record: Vec<f32>,
    /// Every selection event in order.
    pub selections: Vec<SelectionEvent>,
}

type StepCallback<'a> = Box<dyn FnMut(usize, usize, &Tensor) + 'a>;

/// Drives one pool through the whole schedule, selecting every `block_size` steps.
pub struct BlockSearch<'a> {
    layout: PoolLayout,
    block_size: usize,
    phase: BlockPhase,
    steps_since_selection: usize,
    callback: Option<(usize, StepCallback<'a>)>,
}

impl<'a> BlockSearch<'a> {
    /// Create a search for `layout` with selection every `block_size` steps.
    pub fn new(layout: PoolLayout, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidInput("block_size must be at least 1".into()));
        }
        Ok(Self {
            layout,
            block_size,
            phase: BlockPhase::Advancing,
            steps_since_selection: 0,
            callback: None,
        })
    }

    /// Calls `f(step_index, timestep, pool)` after every `every`-th step.
    pub fn with_callback(mut self, every: usize, f: impl FnMut(usize, usize, &Tensor) + 'a) -> Self {
        self.callback = Some((every.max(1), Box::new(f)));
        self
    }

    /// Current phase.
    pub fn phase(&self) -> BlockPhase {
        self.phase
    }

    /// Whether the step just completed closes a block.
    fn reached_selection(&self, step_index: usize, num_steps: usize) -> bool {
        self.steps_since_selection >= self.block_size || step_index + 1 == num_steps
    }

    /// Runs the schedule on an expanded pool.
    ///
    /// Scoring errors inside the loop propagate and abort the search.
    pub fn run<D: Denoiser + ?Sized>(
        &mut self,
        denoiser: &mut GuidedDenoiser<'_, D>,
        rewarder: &Rewarder,
        mut pool: CandidatePool,
        prompt: &str,
    ) -> Result<SearchOutcome> {
        if pool.layout() != self.layout || !pool.is_expanded() {
            return Err(Error::PoolShape(format!(
                "search expects an expanded pool of {} candidates, got {}",
                self.layout.expanded_size(),
                pool.size()
            )));
        }

        let timesteps = denoiser.timesteps().to_vec();
        if timesteps.is_empty() {
            return Err(Error::InvalidInput("empty timestep schedule".into()));
        }
        let num_steps = timesteps.len();

        self.phase = BlockPhase::Advancing;
        self.steps_since_selection = 0;
        let mut selections = Vec::new();
        let mut record = None;

        for (step_index, &timestep) in timesteps.iter().enumerate() {
            let next = denoiser.advance(pool.states(), step_index)?;
            pool.advance_to(next)?;
            self.steps_since_selection += 1;

            if let Some((every, f)) = self.callback.as_mut() {
                if step_index % *every == 0 {
                    f(step_index, timestep, pool.states());
                }
            }

            if !self.reached_selection(step_index, num_steps) {
                continue;
            }

            let terminal = step_index + 1 == num_steps;
            self.phase = BlockPhase::Selecting;
            let event = self.select(denoiser, rewarder, &mut pool, prompt, step_index, terminal)?;
            self.steps_since_selection = 0;

            if terminal {
                record = Some(event.winning_rewards());
                self.phase = BlockPhase::Terminal;
            } else {
                pool.expand()?;
                self.phase = BlockPhase::Advancing;
            }
            selections.push(event);
        }

        let record = record.ok_or_else(|| {
            Error::PoolShape("schedule ended without a terminal selection".into())
        })?;

        Ok(SearchOutcome {
            states: pool.into_states(),
            record,
            selections,
        })
    }

    /// Scores the pool, picks one winner per lane and collapses.
    fn select<D: Denoiser + ?Sized>(
        &self,
        denoiser: &mut GuidedDenoiser<'_, D>,
        rewarder: &Rewarder,
        pool: &mut CandidatePool,
        prompt: &str,
        step_index: usize,
        terminal: bool,
    ) -> Result<SelectionEvent> {
        // The last step already yields the clean sample; earlier states are
        // too noisy to score directly.
        let estimate = if terminal {
            pool.states().clone()
        } else {
            denoiser.preview(pool.states(), step_index)?
        };

        let images = denoiser.decode(&estimate)?;
        let rewards = rewarder.score(&images, prompt)?;
        let grid = RewardGrid::from_flat(&rewards, self.layout)?;
        let winners = grid.winners();
        pool.collapse(&winners)?;

        debug!(
            step = step_index,
            terminal,
            winners = ?winners,
            rewards = ?grid.winning_rewards(&winners),
            "block selection"
        );

        Ok(SelectionEvent {
            step_index,
            terminal,
            winners,
            grid,
        })
    }
}
