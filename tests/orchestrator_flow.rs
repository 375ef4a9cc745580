use std::collections::{BTreeSet, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use facegrid::config::PipelineConfig;
use facegrid::progress::ProgressRenderer;
use facegrid::prompt_gate::Prompter;
use facegrid::workflow::assets::SourcePhoto;
use facegrid::workflow::orchestrator::Orchestrator;
use facegrid::workflow::service::GenerationService;
use facegrid::workflow::types::{ArtifactRef, GenerationRequest, RunOutcome, ServiceOutput};
use tempfile::tempdir;

#[derive(Default)]
struct FakeService {
    calls: AtomicUsize,
    failing: BTreeSet<String>,
}

#[async_trait]
impl GenerationService for FakeService {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Option<ServiceOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&request.step.filename) {
            bail!("prediction failed");
        }
        Ok(Some(ServiceOutput::Single(ArtifactRef(
            request.step.filename.clone(),
        ))))
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        Ok(artifact.as_str().as_bytes().to_vec())
    }
}

/// Answers prompts from a script and records every question asked. Each question
/// is echoed as one line, the way a terminal shows it after the answer.
struct ScriptedPrompter {
    confirms: VecDeque<bool>,
    number: Option<u32>,
    asked: Vec<String>,
}

impl ScriptedPrompter {
    fn new(confirms: &[bool], number: Option<u32>) -> Self {
        Self {
            confirms: confirms.iter().copied().collect(),
            number,
            asked: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm<W: Write>(&mut self, out: &mut ProgressRenderer<W>, message: &str) -> Result<bool> {
        self.asked.push(message.to_owned());
        writeln!(out, "{message}")?;
        match self.confirms.pop_front() {
            Some(answer) => Ok(answer),
            None => bail!("unexpected confirm: {message}"),
        }
    }

    fn prompt_number<W: Write>(
        &mut self,
        out: &mut ProgressRenderer<W>,
        message: &str,
        default: u32,
    ) -> Result<u32> {
        self.asked.push(message.to_owned());
        write!(out, "{message}")?;
        out.record_echoed_line();
        Ok(self.number.unwrap_or(default))
    }
}

fn config(output_dir: &Path, size: u32) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.grid.size = size;
    config.output_dir = output_dir.to_path_buf();
    config.concurrency = 3;
    config
}

fn photo() -> SourcePhoto {
    SourcePhoto::from_bytes(Path::new("photo.png"), "image/png", b"png")
}

fn output(orchestrator: Orchestrator<'_, FakeService, Vec<u8>>) -> String {
    let renderer = orchestrator.into_renderer();
    let counted = renderer.lines_emitted();
    let text = String::from_utf8(renderer.into_inner()).expect("utf8 output");
    // The number prompt's line break comes from the terminal echo, not the output.
    let echoed = text.matches("(default 160): ").count();
    assert_eq!(
        counted,
        text.matches('\n').count() + echoed,
        "every printed line is counted"
    );
    text
}

#[tokio::test]
async fn declining_generation_makes_no_service_calls() {
    let dir = tempdir().expect("tempdir should create");
    let output_dir = dir.path().join("output");
    let config = config(&output_dir, 5);
    let service = FakeService::default();
    let photo = photo();
    let mut prompter = ScriptedPrompter::new(&[false], None);

    let orchestrator = Orchestrator::new(&config, &service, &photo, ProgressRenderer::new(Vec::new()));
    let outcome = orchestrator.run(&mut prompter).await.expect("run");

    assert_eq!(outcome, RunOutcome::Declined);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    assert_eq!(prompter.asked, vec!["Continue with generation?"]);
    assert!(!output_dir.exists());

    let text = output(orchestrator);
    assert!(text.contains("Generating 25 photos (5x5 grid)."));
    assert!(text.contains("Estimated cost: $0.02"));
    assert!(text.ends_with("Aborted by user.\n"));
}

#[tokio::test]
async fn failed_generation_skips_the_sprite_prompt() {
    let dir = tempdir().expect("tempdir should create");
    let mut config = config(dir.path(), 3);
    config.max_attempts = 2;
    let service = FakeService {
        failing: ["avatar_004.webp".to_owned()].into_iter().collect(),
        ..FakeService::default()
    };
    let photo = photo();
    let mut prompter = ScriptedPrompter::new(&[true], None);

    let orchestrator = Orchestrator::new(&config, &service, &photo, ProgressRenderer::new(Vec::new()));
    let outcome = orchestrator.run(&mut prompter).await.expect("run");

    assert_eq!(
        outcome,
        RunOutcome::GenerationIncomplete {
            failed: vec!["avatar_004.webp".to_owned()]
        }
    );
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(prompter.asked.len(), 1, "sprite confirmation is never shown");
    assert_eq!(service.calls.load(Ordering::SeqCst), 10);
    assert!(!orchestrator.layout().sprite_path().exists());

    let text = output(orchestrator);
    assert!(text.contains("Estimated cost: $0.01"));
    assert!(text.contains("avatar_004.webp: generation request failed"));
    assert!(text.contains("Skipping sprite creation because 1 of 9 images were not generated."));
}

#[tokio::test]
async fn declining_the_sprite_keeps_the_artifacts() {
    let dir = tempdir().expect("tempdir should create");
    let config = config(dir.path(), 3);
    let service = FakeService::default();
    let photo = photo();
    let mut prompter = ScriptedPrompter::new(&[true, false], None);

    let orchestrator = Orchestrator::new(&config, &service, &photo, ProgressRenderer::new(Vec::new()));
    let outcome = orchestrator.run(&mut prompter).await.expect("run");

    assert_eq!(outcome, RunOutcome::SpriteSkipped);
    assert_eq!(
        prompter.asked,
        vec!["Continue with generation?", "Proceed to create sprite?"]
    );
    assert_eq!(orchestrator.layout().list_artifacts().expect("list").len(), 9);
    assert!(output(orchestrator).contains("Sprite creation skipped by user request."));
}

#[tokio::test]
async fn sprite_tool_failure_is_reported_not_raised() {
    let dir = tempdir().expect("tempdir should create");
    let mut config = config(dir.path(), 1);
    config.montage_bin = "false".to_owned();
    let service = FakeService::default();
    let photo = photo();
    let mut prompter = ScriptedPrompter::new(&[true, true], Some(64));

    let orchestrator = Orchestrator::new(&config, &service, &photo, ProgressRenderer::new(Vec::new()));
    let outcome = orchestrator.run(&mut prompter).await.expect("run");

    assert!(matches!(outcome, RunOutcome::SpriteFailed(_)), "{outcome:?}");
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(
        prompter.asked.last().map(String::as_str),
        Some("Sprite cell size in px, whole number (default 160): ")
    );
    assert!(orchestrator.layout().artifact_exists("avatar_000.webp"));
    assert!(!orchestrator.layout().meta_path().exists());

    let text = output(orchestrator);
    assert!(text.contains("Building 1x1 sprite with 64px cells"));
    assert!(text.contains("Failed to create sprite: sprite tool error:"));
}

#[tokio::test]
async fn invalid_grid_size_fails_before_any_prompt() {
    let dir = tempdir().expect("tempdir should create");
    let config = config(dir.path(), 4);
    let service = FakeService::default();
    let photo = photo();
    let mut prompter = ScriptedPrompter::new(&[], None);

    let orchestrator: Orchestrator<'_, FakeService, Vec<u8>> =
        Orchestrator::new(&config, &service, &photo, ProgressRenderer::new(Vec::new()));
    let error = orchestrator.run(&mut prompter).await.expect_err("even grid");

    assert!(error.to_string().contains("odd integer"));
    assert!(prompter.asked.is_empty());
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
}
