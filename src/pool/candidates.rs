//! Candidate replication and collapse.
//!
//! Both transforms gather rows with `index_select`, which always
//! materializes fresh storage, so replicas never alias each other.

use candle_core::Tensor;

use super::layout::PoolLayout;
use crate::error::{Error, Result};

/// Fans `k` lane states out to `k * width` candidates, lane-major.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use bon_diffusion::pool::replicate;
///
/// let lanes = Tensor::new(&[10f32, 20.], &Device::Cpu).unwrap();
/// let pool = replicate(&lanes, 3).unwrap();
/// assert_eq!(pool.to_vec1::<f32>().unwrap(), vec![10., 10., 10., 20., 20., 20.]);
/// ```
pub fn replicate(states: &Tensor, width: usize) -> Result<Tensor> {
    if width == 0 {
        return Err(Error::PoolShape("replication width must be positive".into()));
    }
    let k = states.dim(0)?;
    let index: Vec<u32> = (0..k as u32)
        .flat_map(|lane| std::iter::repeat(lane).take(width))
        .collect();
    let index = Tensor::from_vec(index, k * width, states.device())?;
    Ok(states.index_select(&index, 0)?)
}

/// Keeps one winning candidate per lane.
///
/// `winners[lane]` is the sample index in `[0, n_samples)` chosen for that
/// lane. The result has `genbatch` rows in lane order.
pub fn collapse(
    states: &Tensor,
    winners: &[usize],
    n_samples: usize,
    genbatch: usize,
) -> Result<Tensor> {
    let layout = PoolLayout::new(n_samples, genbatch)?;
    let size = states.dim(0)?;
    if size != layout.expanded_size() {
        return Err(Error::PoolShape(format!(
            "collapse expects {} candidates, got {size}",
            layout.expanded_size()
        )));
    }
    if winners.len() != genbatch {
        return Err(Error::PoolShape(format!(
            "expected one winner per lane ({genbatch}), got {}",
            winners.len()
        )));
    }

    let mut index = Vec::with_capacity(genbatch);
    for (lane, &sample) in winners.iter().enumerate() {
        if sample >= n_samples {
            return Err(Error::PoolShape(format!(
                "winner {sample} for lane {lane} is out of range 0..{n_samples}"
            )));
        }
        index.push(layout.position(lane, sample) as u32);
    }
    let index = Tensor::from_vec(index, genbatch, states.device())?;
    Ok(states.index_select(&index, 0)?)
}

/// The in-flight batch of candidate states for one outer batch.
///
/// Holds either `genbatch` states (collapsed) or `n_samples * genbatch`
/// states (expanded); every mutation re-checks the size.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    states: Tensor,
    layout: PoolLayout,
}

impl CandidatePool {
    /// Replicates the lane states into a fresh expanded pool.
    pub fn from_lanes(lanes: &Tensor, layout: PoolLayout) -> Result<Self> {
        let lanes_in = lanes.dim(0)?;
        if lanes_in != layout.genbatch() {
            return Err(Error::PoolShape(format!(
                "expected {} lane states, got {lanes_in}",
                layout.genbatch()
            )));
        }
        let states = replicate(lanes, layout.n_samples())?;
        Ok(Self { states, layout })
    }

    /// Current states.
    pub fn states(&self) -> &Tensor {
        &self.states
    }

    /// Pool layout.
    pub fn layout(&self) -> PoolLayout {
        self.layout
    }

    /// Current number of states.
    pub fn size(&self) -> usize {
        self.states.dims().first().copied().unwrap_or(0)
    }

    /// Whether the pool currently holds every candidate of a block.
    pub fn is_expanded(&self) -> bool {
        self.size() == self.layout.expanded_size()
    }

    /// Replaces the states with the next denoised pool of the same size.
    pub fn advance_to(&mut self, next: Tensor) -> Result<()> {
        let size = next.dim(0)?;
        if size != self.size() {
            return Err(Error::PoolShape(format!(
                "denoising step changed pool size from {} to {size}",
                self.size()
            )));
        }
        self.states = next;
        Ok(())
    }

    /// Collapses an expanded pool to one winner per lane.
    pub fn collapse(&mut self, winners: &[usize]) -> Result<()> {
        self.states = collapse(
            &self.states,
            winners,
            self.layout.n_samples(),
            self.layout.genbatch(),
        )?;
        Ok(())
    }

    /// Re-expands a collapsed pool for the next block.
    pub fn expand(&mut self) -> Result<()> {
        if self.size() != self.layout.collapsed_size() {
            return Err(Error::PoolShape(format!(
                "expand requires a collapsed pool of {}, got {}",
                self.layout.collapsed_size(),
                self.size()
            )));
        }
        self.states = replicate(&self.states, self.layout.n_samples())?;
        Ok(())
    }

    /// Consumes the pool, returning its states.
    pub fn into_states(self) -> Tensor {
        self.states
    }
}
