use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};
use crate::grid::{validate_grid_size, GridSetup};

pub const DEFAULT_GRID_SIZE: u32 = 5;
pub const DEFAULT_CELL_SIZE: u32 = 160;
pub const DEFAULT_MODEL: &str =
    "fofr/expression-editor:bf913bc90e1c44ba288ba3942a538693b72e8cc7df576f3beebe56adc0a92b86";
pub const API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub grid_size: Option<u32>,
    pub rotate_bound: Option<f64>,
    pub pupil_bound: Option<f64>,
    pub photo_prefix: Option<String>,
    pub source_photo: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub sprite_file: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub price_per_call: Option<f64>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub default_cell_size: Option<u32>,
    pub montage_bin: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub prediction_timeout_seconds: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("failed to parse YAML config")
    }
}

/// Values supplied on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub grid_size: Option<u32>,
    pub source_photo: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub grid: GridSetup,
    pub source_photo: PathBuf,
    pub output_dir: PathBuf,
    pub sprite_file: String,
    pub model: String,
    pub api_base: String,
    pub price_per_call: f64,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub default_cell_size: u32,
    pub montage_bin: String,
    pub poll_interval: Duration,
    pub prediction_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grid: GridSetup {
                size: DEFAULT_GRID_SIZE,
                rotate_bound: 20.0,
                pupil_bound: 13.0,
                photo_prefix: "avatar".to_owned(),
            },
            source_photo: PathBuf::from("input/photo.jpeg"),
            output_dir: PathBuf::from("output"),
            sprite_file: "AvatarSprite.webp".to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            api_base: "https://api.replicate.com/v1".to_owned(),
            price_per_call: 0.00098,
            concurrency: 5,
            max_attempts: 2,
            default_cell_size: DEFAULT_CELL_SIZE,
            montage_bin: "montage".to_owned(),
            poll_interval: Duration::from_secs(1),
            prediction_timeout: Duration::from_secs(300),
        }
    }
}

impl PipelineConfig {
    pub fn resolve(file: ConfigFile, cli: CliOverrides) -> Self {
        let defaults = Self::default();
        Self {
            grid: GridSetup {
                size: cli
                    .grid_size
                    .or(file.grid_size)
                    .unwrap_or(defaults.grid.size),
                rotate_bound: file.rotate_bound.unwrap_or(defaults.grid.rotate_bound),
                pupil_bound: file.pupil_bound.unwrap_or(defaults.grid.pupil_bound),
                photo_prefix: file.photo_prefix.unwrap_or(defaults.grid.photo_prefix),
            },
            source_photo: cli
                .source_photo
                .or(file.source_photo)
                .unwrap_or(defaults.source_photo),
            output_dir: cli
                .output_dir
                .or(file.output_dir)
                .unwrap_or(defaults.output_dir),
            sprite_file: file.sprite_file.unwrap_or(defaults.sprite_file),
            model: file.model.unwrap_or(defaults.model),
            api_base: file.api_base.unwrap_or(defaults.api_base),
            price_per_call: file.price_per_call.unwrap_or(defaults.price_per_call),
            concurrency: cli
                .concurrency
                .or(file.concurrency)
                .unwrap_or(defaults.concurrency),
            max_attempts: cli
                .max_attempts
                .or(file.max_attempts)
                .unwrap_or(defaults.max_attempts),
            default_cell_size: file
                .default_cell_size
                .unwrap_or(defaults.default_cell_size),
            montage_bin: file.montage_bin.unwrap_or(defaults.montage_bin),
            poll_interval: file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            prediction_timeout: file
                .prediction_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.prediction_timeout),
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        validate_grid_size(self.grid.size)?;
        if !(self.grid.rotate_bound.is_finite() && self.grid.rotate_bound > 0.0) {
            return Err(PipelineError::validation("rotate_bound must be positive"));
        }
        if !(self.grid.pupil_bound.is_finite() && self.grid.pupil_bound > 0.0) {
            return Err(PipelineError::validation("pupil_bound must be positive"));
        }
        if self.grid.photo_prefix.trim().is_empty()
            || self.grid.photo_prefix.contains(['/', '\\'])
        {
            return Err(PipelineError::validation(
                "photo_prefix must be a non-empty file name prefix",
            ));
        }
        if !(self.price_per_call.is_finite() && self.price_per_call > 0.0) {
            return Err(PipelineError::validation("price_per_call must be positive"));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::validation("concurrency must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(PipelineError::validation("max_attempts must be at least 1"));
        }
        if self.default_cell_size == 0 {
            return Err(PipelineError::validation(
                "default_cell_size must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Parses the positional grid size. `None` means the default.
pub fn parse_grid_size(raw: Option<&str>) -> PipelineResult<u32> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(DEFAULT_GRID_SIZE);
    };

    let parsed = raw
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && value.fract() == 0.0 && *value > 0.0)
        .filter(|value| *value <= f64::from(u32::MAX))
        .ok_or_else(|| {
            PipelineError::validation(format!(
                "grid size must be a positive integer, e.g. `facegrid 5` (got '{raw}')"
            ))
        })?;
    let size = parsed as u32;
    validate_grid_size(size)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_size_defaults_and_parses() {
        assert_eq!(parse_grid_size(None).expect("default"), 5);
        assert_eq!(parse_grid_size(Some("")).expect("blank"), 5);
        assert_eq!(parse_grid_size(Some("7")).expect("seven"), 7);
        assert_eq!(parse_grid_size(Some("9.0")).expect("integral float"), 9);
    }

    #[test]
    fn grid_size_rejects_bad_values() {
        for bad in ["abc", "0", "-3", "2.5"] {
            let error = parse_grid_size(Some(bad)).expect_err(bad);
            assert!(error.to_string().contains("positive integer"), "{bad}");
        }
        let error = parse_grid_size(Some("4")).expect_err("even");
        assert!(error.to_string().contains("odd integer"));
        let error = parse_grid_size(Some("99999")).expect_err("too large");
        assert!(error.to_string().contains("at most"));
    }

    #[test]
    fn cli_overrides_beat_file_values() {
        let file = ConfigFile::parse(
            "grid_size: 3\nconcurrency: 2\nrotate_bound: 15\noutput_dir: renders\n",
        )
        .expect("yaml parses");
        let config = PipelineConfig::resolve(
            file,
            CliOverrides {
                grid_size: Some(7),
                ..CliOverrides::default()
            },
        );
        assert_eq!(config.grid.size, 7);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.grid.rotate_bound, 15.0);
        assert_eq!(config.output_dir, PathBuf::from("renders"));
        assert_eq!(config.max_attempts, 2);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config =
            PipelineConfig::resolve(ConfigFile::parse("").expect("empty"), CliOverrides::default());
        assert_eq!(config, PipelineConfig::default());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ConfigFile::parse("grid_sise: 3\n").is_err());
    }

    #[test]
    fn validate_catches_zero_limits() {
        let mut config = PipelineConfig::default();
        config.concurrency = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Validation(_))));

        let mut config = PipelineConfig::default();
        config.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.grid.size = 6;
        assert!(config.validate().is_err());
    }
}
