use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};

pub const CROP_FACTOR: f64 = 1.5;
pub const OUTPUT_QUALITY: u32 = 100;
pub const ARTIFACT_EXTENSION: &str = "webp";

/// Largest accepted grid: 10,201 model calls.
pub const MAX_GRID_SIZE: u32 = 101;

const VALUE_DECIMALS: i32 = 10;
const MIN_INDEX_WIDTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct GridSetup {
    pub size: u32,
    pub rotate_bound: f64,
    pub pupil_bound: f64,
    pub photo_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub x: u32,
    pub y: u32,
    pub index: u32,
    pub rotate_yaw: f64,
    pub rotate_pitch: f64,
    pub pupil_x: f64,
    pub pupil_y: f64,
    pub filename: String,
    pub crop_factor: f64,
    pub output_quality: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    size: u32,
    rows: Vec<Vec<Step>>,
}

impl Grid {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn rows(&self) -> &[Vec<Step>] {
        &self.rows
    }

    pub fn cell_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.rows.iter().flatten()
    }

    pub fn flatten(&self) -> Vec<Step> {
        self.steps().cloned().collect()
    }
}

/// Rejects anything but a positive odd grid dimension up to [`MAX_GRID_SIZE`].
pub fn validate_grid_size(size: u32) -> PipelineResult<()> {
    if size == 0 {
        return Err(PipelineError::validation(
            "grid size must be a positive integer, e.g. `facegrid 5`",
        ));
    }
    if size % 2 != 1 {
        return Err(PipelineError::validation(format!(
            "grid size must be an odd integer, e.g. `facegrid 5` (got {size})"
        )));
    }
    if size > MAX_GRID_SIZE {
        return Err(PipelineError::validation(format!(
            "grid size must be at most {MAX_GRID_SIZE} (got {size})"
        )));
    }
    Ok(())
}

/// Maps an axis position to `[-bound, bound]`, rounded to ten decimal places.
pub fn value_at(step_index: u32, total_steps: u32, bound: f64, invert: bool) -> f64 {
    if total_steps <= 1 {
        return 0.0;
    }
    let normalized = (f64::from(step_index) / f64::from(total_steps - 1)) * 2.0 - 1.0;
    let value = bound * normalized;
    let value = if invert { -value } else { value };
    // `+ 0.0` folds -0.0 into 0.0 so the neutral pose serializes as `0.0`.
    round_to(value, VALUE_DECIMALS) + 0.0
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Zero-padding width for artifact indices. Wide enough that lexicographic order
/// of the filenames equals row-major order for any grid size.
pub fn index_width(size: u32) -> usize {
    let last_index = u64::from(size) * u64::from(size);
    let digits = last_index.saturating_sub(1).to_string().len();
    digits.max(MIN_INDEX_WIDTH)
}

pub fn artifact_filename(prefix: &str, index: u32, width: usize) -> String {
    format!("{prefix}_{index:0width$}.{ARTIFACT_EXTENSION}")
}

pub fn build_grid(setup: &GridSetup) -> Grid {
    let size = setup.size;
    let width = index_width(size);
    let rows = (0..size)
        .map(|y| {
            (0..size)
                .map(|x| {
                    let index = y * size + x;
                    Step {
                        x,
                        y,
                        index,
                        rotate_yaw: value_at(x, size, setup.rotate_bound, false),
                        rotate_pitch: value_at(y, size, setup.rotate_bound, false),
                        pupil_x: value_at(x, size, setup.pupil_bound, false),
                        pupil_y: value_at(y, size, setup.pupil_bound, true),
                        filename: artifact_filename(&setup.photo_prefix, index, width),
                        crop_factor: CROP_FACTOR,
                        output_quality: OUTPUT_QUALITY,
                    }
                })
                .collect()
        })
        .collect();

    Grid { size, rows }
}
