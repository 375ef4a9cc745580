use std::cell::RefCell;
use std::io::Write;

use anyhow::Result;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::cost::{estimate_cost, format_usd};
use crate::grid::{build_grid, validate_grid_size};
use crate::progress::ProgressRenderer;
use crate::prompt_gate::Prompter;
use crate::workflow::assets::{OutputLayout, SourcePhoto};
use crate::workflow::executor::GenerationExecutor;
use crate::workflow::service::GenerationService;
use crate::workflow::sprite::SpriteAssembler;
use crate::workflow::types::RunOutcome;

pub struct Orchestrator<'a, S, W: Write> {
    config: &'a PipelineConfig,
    service: &'a S,
    photo: &'a SourcePhoto,
    layout: OutputLayout,
    renderer: RefCell<ProgressRenderer<W>>,
}

impl<'a, S, W> Orchestrator<'a, S, W>
where
    S: GenerationService,
    W: Write,
{
    pub fn new(
        config: &'a PipelineConfig,
        service: &'a S,
        photo: &'a SourcePhoto,
        renderer: ProgressRenderer<W>,
    ) -> Self {
        let layout = OutputLayout::new(
            config.output_dir.clone(),
            config.grid.photo_prefix.clone(),
            config.sprite_file.clone(),
        );
        Self {
            config,
            service,
            photo,
            layout,
            renderer: RefCell::new(renderer),
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub async fn run(&self, prompter: &mut impl Prompter) -> Result<RunOutcome> {
        let size = self.config.grid.size;
        validate_grid_size(size)?;

        let grid = build_grid(&self.config.grid);
        let steps = grid.flatten();
        let cost = estimate_cost(grid.cell_count(), self.config.price_per_call);
        self.log(&format!(
            "Generating {} photos ({size}x{size} grid).",
            grid.cell_count()
        ));
        self.log(&format!("Estimated cost: {}", format_usd(cost)));

        if !self.ask(|out| prompter.confirm(out, "Continue with generation?"))? {
            self.log("Aborted by user.");
            return Ok(RunOutcome::Declined);
        }

        let executor = GenerationExecutor::new(self.service, &self.renderer, &self.layout, self.photo);
        let report = executor
            .run_all(&steps, self.config.concurrency, self.config.max_attempts)
            .await;

        if !report.success {
            for task in &report.failed {
                self.log(&format!("  {}: {}", task.filename, task.reason));
            }
            self.log(&format!(
                "Skipping sprite creation because {} of {} images were not generated.",
                report.failed.len(),
                steps.len()
            ));
            return Ok(RunOutcome::GenerationIncomplete {
                failed: report.failed_filenames(),
            });
        }

        if !self.ask(|out| prompter.confirm(out, "Proceed to create sprite?"))? {
            self.log("Sprite creation skipped by user request.");
            return Ok(RunOutcome::SpriteSkipped);
        }

        let default_cell = self.config.default_cell_size;
        let cell_size = self.ask(|out| {
            prompter.prompt_number(
                out,
                &format!("Sprite cell size in px, whole number (default {default_cell}): "),
                default_cell,
            )
        })?;

        self.log(&format!(
            "Building {size}x{size} sprite with {cell_size}px cells using {}...",
            self.config.montage_bin
        ));
        let assembler = SpriteAssembler::new(&self.layout, size, self.config.montage_bin.as_str());
        match assembler.assemble(cell_size).await {
            Ok(summary) => {
                self.log(&format!("Sprite created: {}", summary.sprite_path.display()));
                self.log(&format!("Sprite metadata: {}", summary.meta_path.display()));
                Ok(RunOutcome::SpriteBuilt(summary))
            }
            Err(error) => {
                self.log(&format!("Failed to create sprite: {error}"));
                Ok(RunOutcome::SpriteFailed(error.to_string()))
            }
        }
    }

    pub fn into_renderer(self) -> ProgressRenderer<W> {
        self.renderer.into_inner()
    }

    /// Prompts run synchronously, so the renderer borrow never spans an await.
    fn ask<T>(&self, prompt: impl FnOnce(&mut ProgressRenderer<W>) -> Result<T>) -> Result<T> {
        let mut renderer = self.renderer.borrow_mut();
        prompt(&mut renderer)
    }

    fn log(&self, message: &str) {
        if let Err(error) = self.renderer.borrow_mut().log_line(message) {
            warn!("failed to write progress output: {error}");
        }
    }
}
