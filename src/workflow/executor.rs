use std::cell::RefCell;
use std::io::Write;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::grid::Step;
use crate::progress::ProgressRenderer;
use crate::workflow::assets::{write_artifact, OutputLayout, SourcePhoto};
use crate::workflow::service::GenerationService;
use crate::workflow::types::{FailedTask, GenerationRequest, RunReport, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Generated,
    Skipped,
}

#[derive(Debug)]
struct GenerationTask<'s> {
    step: &'s Step,
    status: TaskStatus,
    last_error: Option<String>,
}

pub struct GenerationExecutor<'a, S, W: Write> {
    service: &'a S,
    renderer: &'a RefCell<ProgressRenderer<W>>,
    layout: &'a OutputLayout,
    photo: &'a SourcePhoto,
}

impl<'a, S, W> GenerationExecutor<'a, S, W>
where
    S: GenerationService,
    W: Write,
{
    pub fn new(
        service: &'a S,
        renderer: &'a RefCell<ProgressRenderer<W>>,
        layout: &'a OutputLayout,
        photo: &'a SourcePhoto,
    ) -> Self {
        Self {
            service,
            renderer,
            layout,
            photo,
        }
    }

    pub async fn run_all(&self, steps: &[Step], concurrency: usize, max_attempts: u32) -> RunReport {
        let concurrency = concurrency.max(1);
        let mut tasks = steps
            .iter()
            .map(|step| GenerationTask {
                step,
                status: TaskStatus::Pending,
                last_error: None,
            })
            .collect::<Vec<_>>();
        let mut generated = 0;
        let mut skipped = 0;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            let pending = tasks
                .iter()
                .enumerate()
                .filter(|(_, task)| task.status != TaskStatus::Done)
                .map(|(position, task)| (position, task.step))
                .collect::<Vec<_>>();
            if pending.is_empty() {
                break;
            }
            attempts = attempt;
            if attempt > 1 {
                self.log(&format!(
                    "Retrying {} missing images (attempt {attempt}/{max_attempts})...",
                    pending.len()
                ));
            }

            let results = stream::iter(pending)
                .map(|(position, step)| async move { (position, self.run_task(step).await) })
                .buffer_unordered(concurrency)
                .collect::<Vec<_>>()
                .await;

            for (position, result) in results {
                let task = &mut tasks[position];
                match result {
                    Ok(TaskOutcome::Generated) => {
                        generated += 1;
                        task.status = TaskStatus::Done;
                    }
                    Ok(TaskOutcome::Skipped) => {
                        skipped += 1;
                        task.status = TaskStatus::Done;
                    }
                    // The artifact may have landed even though a later step failed.
                    Err(_) if self.layout.artifact_exists(&task.step.filename) => {
                        task.status = TaskStatus::Done;
                    }
                    Err(error) => {
                        debug!(filename = %task.step.filename, attempt, "task failed: {error}");
                        task.status = TaskStatus::Failed;
                        task.last_error = Some(error.to_string());
                    }
                }
            }
        }

        let failed = tasks
            .iter()
            .filter(|task| task.status != TaskStatus::Done)
            .map(|task| FailedTask {
                filename: task.step.filename.clone(),
                reason: task
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "not attempted".to_owned()),
            })
            .collect::<Vec<_>>();

        if failed.is_empty() {
            self.log("All images generated successfully.");
        } else {
            let names = failed
                .iter()
                .map(|task| task.filename.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            self.log(&format!(
                "Could not generate {} images after {max_attempts} attempts: {names}",
                failed.len()
            ));
        }

        RunReport {
            success: failed.is_empty(),
            attempts,
            generated,
            skipped,
            failed,
        }
    }

    /// Generates one cell. Errors stay with the task; siblings keep running.
    pub async fn run_task(&self, step: &Step) -> Result<TaskOutcome, GenerationError> {
        let filename = step.filename.as_str();
        let start_message = format!("Generating {filename}...");
        let done_message = format!("Generated {filename} ✅");
        let skip_message = format!("Skipping {filename} (exists)");
        let fail_message = format!("Failed {filename} ❌");
        let handle = self.with_renderer(|renderer| {
            renderer.register_line(
                &start_message,
                &[
                    done_message.as_str(),
                    skip_message.as_str(),
                    fail_message.as_str(),
                ],
            )
        });

        if self.layout.artifact_exists(filename) {
            if let Some(handle) = &handle {
                self.with_renderer(|renderer| renderer.update_line(handle, &skip_message));
            }
            return Ok(TaskOutcome::Skipped);
        }

        let result = self.generate_and_store(step).await;
        if let Some(handle) = &handle {
            let message = if result.is_ok() {
                &done_message
            } else {
                &fail_message
            };
            self.with_renderer(|renderer| renderer.update_line(handle, message));
        }
        result.map(|()| TaskOutcome::Generated)
    }

    async fn generate_and_store(&self, step: &Step) -> Result<(), GenerationError> {
        let filename = &step.filename;
        let request = GenerationRequest {
            image: self.photo.data_uri(),
            step,
        };

        let output = self
            .service
            .generate(&request)
            .await
            .map_err(|reason| GenerationError::Service {
                filename: filename.clone(),
                reason,
            })?;
        let artifact = output
            .as_ref()
            .and_then(|output| output.first_artifact())
            .ok_or_else(|| GenerationError::NoArtifact {
                filename: filename.clone(),
            })?;
        let bytes = self
            .service
            .fetch_artifact(artifact)
            .await
            .map_err(|reason| GenerationError::Fetch {
                filename: filename.clone(),
                reason,
            })?;

        let path = write_artifact(self.layout, filename, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
        Ok(())
    }

    fn log(&self, message: &str) {
        self.with_renderer(|renderer| renderer.log_line(message));
    }

    /// Runs one renderer call. The borrow never spans an await point.
    fn with_renderer<T>(
        &self,
        call: impl FnOnce(&mut ProgressRenderer<W>) -> std::io::Result<T>,
    ) -> Option<T> {
        let mut renderer = self.renderer.borrow_mut();
        match call(&mut renderer) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!("failed to write progress output: {error}");
                None
            }
        }
    }
}
