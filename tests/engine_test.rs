//! Integration tests for generation tasks and configuration.

use bon_diffusion::{Error, GenerationConfig, GenerationTask, PipelineConfig};

#[test]
fn test_generation_task_builder() {
    let task = GenerationTask::new("a castle on a hill")
        .negative_prompt("blurry")
        .offset(10)
        .num_try(1)
        .config(
            GenerationConfig::default()
                .size(256, 384)
                .steps(20)
                .guidance_scale(5.0)
                .n_samples(8)
                .block_size(4)
                .num_images(10)
                .eta(0.0)
                .seed(7),
        );

    assert_eq!(task.prompt, "a castle on a hill");
    assert_eq!(task.negative_prompt.as_deref(), Some("blurry"));
    assert_eq!(task.offset, 10);
    assert_eq!(task.num_try, 1);
    assert_eq!(task.config.height, 256);
    assert_eq!(task.config.width, 384);
    assert_eq!(task.config.num_inference_steps, 20);
    assert_eq!(task.config.n_samples, 8);
    assert_eq!(task.config.block_size, 4);
    assert_eq!(task.config.num_images_per_prompt, 10);
    assert_eq!(task.config.eta, 0.0);
    assert_eq!(task.config.seed, Some(7));
    assert!(task.validate(5).is_ok());
}

#[test]
fn test_generation_task_defaults() {
    let task = GenerationTask::new("Test prompt");

    assert_eq!(task.negative_prompt, None);
    assert_eq!(task.offset, 0);
    assert_eq!(task.num_try, 0);
    assert!(task.latents.is_none());
    // Default generation config values
    assert_eq!(task.config.num_inference_steps, 50);
    assert_eq!(task.config.guidance_scale, 7.5);
    assert_eq!(task.config.n_samples, 5);
    assert_eq!(task.config.block_size, 5);
    assert_eq!(task.config.num_images_per_prompt, 5);
    assert_eq!(task.config.eta, 1.0);
    assert_eq!(task.config.callback_steps, 1);
}

#[test]
fn test_prompt_must_be_a_directory_name() {
    for prompt in ["", "   ", "cats/dogs", "a\\b", ".."] {
        let task = GenerationTask::new(prompt);
        assert!(
            matches!(task.validate(5), Err(Error::InvalidInput(_))),
            "{prompt:?} should be rejected"
        );
    }
}

#[test]
fn test_images_per_prompt_must_match_genbatch() {
    let task = GenerationTask::new("ok").config(GenerationConfig::default().num_images(6));
    assert!(task.validate(5).is_err());
    assert!(task.validate(3).is_ok());
}

#[test]
fn test_pipeline_config_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(
        &path,
        r#"{"genbatch": 2, "retry_budget": 3, "project_path": "runs/exp1"}"#,
    )
    .unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.genbatch, 2);
    assert_eq!(config.retry_budget, 3);
    assert_eq!(config.project_path, std::path::PathBuf::from("runs/exp1"));
}

#[test]
fn test_pipeline_config_rejects_zero_genbatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, r#"{"genbatch": 0, "retry_budget": 0, "project_path": "out"}"#).unwrap();

    assert!(matches!(PipelineConfig::load(&path), Err(Error::Config(_))));
}
