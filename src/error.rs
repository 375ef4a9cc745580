use std::path::PathBuf;

use anyhow::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Phase-level failures. Each one ends the process with a nonzero exit code.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("generation incomplete: {} images missing ({})", .failed.len(), .failed.join(", "))]
    GenerationIncomplete { failed: Vec<String> },

    #[error("sprite tool error: {0}")]
    SpriteTool(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn sprite_tool(msg: impl Into<String>) -> Self {
        Self::SpriteTool(msg.into())
    }

    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Failure of a single grid cell. Captured per task; never aborts the round.
#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("no artifact in service response for {filename}")]
    NoArtifact { filename: String },

    #[error("generation request failed for {filename}: {reason:#}")]
    Service {
        filename: String,
        reason: anyhow::Error,
    },

    #[error("failed to fetch artifact for {filename}: {reason:#}")]
    Fetch {
        filename: String,
        reason: anyhow::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn find_pipeline_error(error: &Error) -> Option<&PipelineError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
}
