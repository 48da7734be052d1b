//! Integration tests for the block search state machine.

mod common;

use bon_diffusion::selection::BlockPhase;
use bon_diffusion::{
    collapse, replicate, BlockSearch, CandidatePool, Guidance, GuidedDenoiser, PoolLayout,
    Rewarder,
};
use candle_core::{Device, Tensor};
use common::{latents, Constant, MeanBrightness, MockDenoiser};

fn unguided() -> Guidance {
    Guidance::unguided(Tensor::zeros((1, 2), candle_core::DType::F32, &Device::Cpu).unwrap())
}

fn search(
    steps: usize,
    n_samples: usize,
    genbatch: usize,
    block_size: usize,
    rewarder: &Rewarder,
) -> (bon_diffusion::SearchOutcome, BlockPhase, MockDenoiser) {
    let mut denoiser = MockDenoiser::new(steps);
    let guidance = unguided();
    let layout = PoolLayout::new(n_samples, genbatch).unwrap();
    let pool = CandidatePool::from_lanes(&latents(genbatch), layout).unwrap();

    let mut block = BlockSearch::new(layout, block_size).unwrap();
    let outcome = {
        let mut guided = GuidedDenoiser::new(&mut denoiser, &guidance);
        block.run(&mut guided, rewarder, pool, "prompt").unwrap()
    };
    let phase = block.phase();
    (outcome, phase, denoiser)
}

#[test]
fn test_selects_at_block_boundaries_and_last_step() {
    let rewarder = Rewarder::new(Box::new(MeanBrightness));
    let (outcome, phase, _) = search(12, 3, 2, 5, &rewarder);

    let steps: Vec<usize> = outcome.selections.iter().map(|e| e.step_index).collect();
    assert_eq!(steps, vec![4, 9, 11]);
    let terminal: Vec<bool> = outcome.selections.iter().map(|e| e.terminal).collect();
    assert_eq!(terminal, vec![false, false, true]);
    assert_eq!(phase, BlockPhase::Terminal);
}

#[test]
fn test_terminal_pool_has_one_state_per_lane() {
    let rewarder = Rewarder::new(Box::new(MeanBrightness));
    let (outcome, _, denoiser) = search(10, 4, 2, 5, &rewarder);

    assert_eq!(outcome.states.dims(), &[2, 1, common::SIDE, common::SIDE]);
    assert_eq!(outcome.record.len(), 2);
    assert_eq!(denoiser.step_batches, vec![8; 10]);
}

#[test]
fn test_each_lane_keeps_its_own_winner() {
    let (n_samples, genbatch) = (4, 2);
    let mut denoiser = MockDenoiser::new(10).lane_aware(n_samples);
    let guidance = unguided();
    let layout = PoolLayout::new(n_samples, genbatch).unwrap();
    let lanes = latents(genbatch);
    let pool = CandidatePool::from_lanes(&lanes, layout).unwrap();
    let rewarder = Rewarder::new(Box::new(MeanBrightness));

    let mut block = BlockSearch::new(layout, 5).unwrap();
    let mut guided = GuidedDenoiser::new(&mut denoiser, &guidance);
    let outcome = block.run(&mut guided, &rewarder, pool, "prompt").unwrap();

    for event in &outcome.selections {
        assert_eq!(event.grid.shape(), (4, 2));
        assert_eq!(event.winners, vec![3, 0]);
    }
    assert_eq!(outcome.record, outcome.selections[1].winning_rewards());

    // Each winner gains 0.03 per step, so lane l ends at its own start + 0.3.
    let expected: Vec<f32> = (lanes + 0.3).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    let got: Vec<f32> = outcome.states.flatten_all().unwrap().to_vec1().unwrap();
    for (g, e) in got.iter().zip(&expected) {
        assert!((g - e).abs() < 1e-4, "{g} vs {e}");
    }
}

#[test]
fn test_ties_keep_first_candidate() {
    let rewarder = Rewarder::new(Box::new(Constant(1.0)));
    let (outcome, _, _) = search(10, 4, 3, 5, &rewarder);

    for event in &outcome.selections {
        assert_eq!(event.winners, vec![0, 0, 0]);
    }
    assert_eq!(outcome.record, vec![1.0; 3]);
}

#[test]
fn test_block_longer_than_schedule_selects_once() {
    let rewarder = Rewarder::new(Box::new(MeanBrightness));
    let (outcome, _, denoiser) = search(6, 2, 1, 20, &rewarder);

    assert_eq!(outcome.selections.len(), 1);
    assert!(outcome.selections[0].terminal);
    // No preview is needed when the only selection is terminal.
    assert_eq!(denoiser.predict_calls.borrow().len(), 6);
    assert_eq!(*denoiser.decode_batches.borrow(), vec![2]);
}

#[test]
fn test_single_sample_is_plain_sampling() {
    let rewarder = Rewarder::new(Box::new(MeanBrightness));
    let (outcome, _, denoiser) = search(10, 1, 2, 5, &rewarder);

    assert_eq!(denoiser.step_batches, vec![2; 10]);
    for event in &outcome.selections {
        assert_eq!(event.winners, vec![0, 0]);
    }
}

#[test]
fn test_rejects_collapsed_pool() {
    let mut denoiser = MockDenoiser::new(4);
    let guidance = unguided();
    let layout = PoolLayout::new(2, 2).unwrap();
    let mut pool = CandidatePool::from_lanes(&latents(2), layout).unwrap();
    pool.collapse(&[0, 0]).unwrap();

    let mut guided = GuidedDenoiser::new(&mut denoiser, &guidance);
    let rewarder = Rewarder::new(Box::new(MeanBrightness));
    let mut block = BlockSearch::new(layout, 2).unwrap();
    assert!(block.run(&mut guided, &rewarder, pool, "prompt").is_err());
}

#[test]
fn test_replicate_then_collapse_first_is_identity() {
    let x = latents(3);
    let pool = replicate(&x, 4).unwrap();
    assert_eq!(pool.dim(0).unwrap(), 12);

    let back = collapse(&pool, &[0, 0, 0], 4, 3).unwrap();
    let diff = (back - &x)
        .unwrap()
        .abs()
        .unwrap()
        .sum_all()
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    assert_eq!(diff, 0.0);
}

#[test]
fn test_collapse_does_not_alias_pool() {
    let x = latents(2);
    let pool = replicate(&x, 2).unwrap();
    let winners = collapse(&pool, &[1, 0], 2, 2).unwrap();
    let shifted = (winners + 1.0).unwrap();

    let original: Vec<f32> = pool.flatten_all().unwrap().to_vec1().unwrap();
    let again: Vec<f32> = replicate(&x, 2)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    assert_eq!(original, again);
    assert_eq!(shifted.dim(0).unwrap(), 2);
}
