use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::workflow::assets::OutputLayout;
use crate::workflow::types::{SpriteMeta, SpriteSummary};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tiles every artifact into one sprite with ImageMagick `montage` and writes the
/// preview sidecar next to it.
#[derive(Debug, Clone)]
pub struct SpriteAssembler<'a> {
    layout: &'a OutputLayout,
    grid_size: u32,
    tool: String,
    timeout: Duration,
}

impl<'a> SpriteAssembler<'a> {
    pub fn new(layout: &'a OutputLayout, grid_size: u32, tool: impl Into<String>) -> Self {
        Self {
            layout,
            grid_size,
            tool: tool.into(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command_args(&self, inputs: &[PathBuf], cell_size: u32) -> Vec<String> {
        let size = self.grid_size;
        let mut args = inputs
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>();
        args.extend([
            "-resize".to_owned(),
            format!("{cell_size}x{cell_size}"),
            "-tile".to_owned(),
            format!("{size}x{size}"),
            "-geometry".to_owned(),
            format!("{cell_size}x{cell_size}+0+0"),
            "-background".to_owned(),
            "none".to_owned(),
            self.layout.sprite_path().display().to_string(),
        ]);
        args
    }

    pub async fn assemble(&self, cell_size: u32) -> PipelineResult<SpriteSummary> {
        if cell_size == 0 {
            return Err(PipelineError::validation("sprite cell size must be positive"));
        }

        let inputs = self.layout.list_artifacts()?;
        if inputs.is_empty() {
            return Err(PipelineError::sprite_tool(format!(
                "no artifacts found in {}",
                self.layout.dir().display()
            )));
        }
        let expected = (self.grid_size as usize).pow(2);
        if inputs.len() != expected {
            warn!(
                found = inputs.len(),
                expected, "artifact count does not match the grid; the sprite tiling may be off"
            );
        }

        let args = self.command_args(&inputs, cell_size);
        let sprite_path = self.layout.sprite_path();
        debug!(tool = %self.tool, args = %args.join(" "), "running compositing tool");

        let started = Instant::now();
        let child = Command::new(&self.tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    PipelineError::sprite_tool(format!(
                        "compositing tool '{}' not found; install ImageMagick",
                        self.tool
                    ))
                } else {
                    PipelineError::sprite_tool(format!(
                        "failed to launch '{}': {error}",
                        self.tool
                    ))
                }
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PipelineError::sprite_tool(format!(
                    "'{}' timed out after {} seconds",
                    self.tool,
                    self.timeout.as_secs()
                ))
            })?
            .with_context(|| format!("failed while waiting for '{}'", self.tool))?;

        if !output.status.success() {
            return Err(PipelineError::sprite_tool(format!(
                "'{}' failed with status {}.\nstdout:\n{}\nstderr:\n{}",
                self.tool,
                output.status,
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !sprite_path.is_file() {
            return Err(PipelineError::sprite_tool(format!(
                "'{}' exited successfully, but the sprite was not found: {}",
                self.tool,
                sprite_path.display()
            )));
        }

        let meta_path = self.write_meta(cell_size).await?;
        let (width, height) = self.inspect_sprite(&sprite_path, cell_size);

        Ok(SpriteSummary {
            sprite_path,
            meta_path,
            width,
            height,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    async fn write_meta(&self, cell_size: u32) -> PipelineResult<PathBuf> {
        let meta = SpriteMeta {
            grid_size: self.grid_size,
            sprite_picture_size: cell_size,
        };
        let meta_path = self.layout.meta_path();
        let json = serde_json::to_string_pretty(&meta).context("failed to encode sprite metadata")?;
        tokio::fs::write(&meta_path, json)
            .await
            .with_context(|| format!("failed to write {}", meta_path.display()))?;
        Ok(meta_path)
    }

    fn inspect_sprite(&self, sprite_path: &Path, cell_size: u32) -> (Option<u32>, Option<u32>) {
        let expected = self.grid_size.saturating_mul(cell_size);
        match image::image_dimensions(sprite_path) {
            Ok((width, height)) => {
                if width != expected || height != expected {
                    warn!(
                        width,
                        height, expected, "sprite size differs from grid size x cell size"
                    );
                }
                (Some(width), Some(height))
            }
            Err(error) => {
                warn!(path = %sprite_path.display(), "could not read sprite dimensions: {error}");
                (None, None)
            }
        }
    }
}
