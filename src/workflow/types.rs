use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::grid::Step;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest<'a> {
    pub image: &'a str,
    #[serde(flatten)]
    pub step: &'a Step,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServiceOutput {
    Single(ArtifactRef),
    Many(Vec<ArtifactRef>),
}

impl ServiceOutput {
    pub fn first_artifact(&self) -> Option<&ArtifactRef> {
        let first = match self {
            ServiceOutput::Single(artifact) => Some(artifact),
            ServiceOutput::Many(artifacts) => artifacts.first(),
        };
        first.filter(|artifact| !artifact.as_str().trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTask {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub success: bool,
    pub attempts: u32,
    pub generated: usize,
    pub skipped: usize,
    pub failed: Vec<FailedTask>,
}

impl RunReport {
    pub fn failed_filenames(&self) -> Vec<String> {
        self.failed.iter().map(|task| task.filename.clone()).collect()
    }
}

/// Sidecar read by the browser preview next to the sprite image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteMeta {
    pub grid_size: u32,
    pub sprite_picture_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteSummary {
    pub sprite_path: PathBuf,
    pub meta_path: PathBuf,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Declined,
    GenerationIncomplete { failed: Vec<String> },
    SpriteSkipped,
    SpriteBuilt(SpriteSummary),
    SpriteFailed(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Declined | RunOutcome::SpriteSkipped | RunOutcome::SpriteBuilt(_) => 0,
            RunOutcome::GenerationIncomplete { .. } | RunOutcome::SpriteFailed(_) => 1,
        }
    }
}
