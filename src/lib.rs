//! Face-pose sprite generation: build a parameter grid from one photo, generate
//! every cell through an image model with bounded concurrency and resumable
//! retries, then tile the results into a sprite sheet for the browser preview.

pub mod config;
pub mod cost;
pub mod error;
pub mod grid;
pub mod progress;
pub mod prompt_gate;
pub mod workflow;

pub use error::{GenerationError, PipelineError, PipelineResult};
