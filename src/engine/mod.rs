//! Generation engine.
//!
//! This module contains:
//! - BonGenerator for orchestrating best-of-n generation
//! - GenerationTask and the per-batch reports it produces

pub mod generator;

pub use generator::{BatchReport, BonGenerator, GenerationReport, GenerationTask};
