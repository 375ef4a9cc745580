use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use facegrid::config::{parse_grid_size, CliOverrides, ConfigFile, PipelineConfig, API_TOKEN_ENV};
use facegrid::error::find_pipeline_error;
use facegrid::progress::ProgressRenderer;
use facegrid::prompt_gate::TerminalPrompter;
use facegrid::workflow::assets::SourcePhoto;
use facegrid::workflow::orchestrator::Orchestrator;
use facegrid::workflow::replicate_client::ReplicateClient;
use facegrid::workflow::types::RunOutcome;
use facegrid::PipelineError;
use tracing::Level;

const LONG_VERSION: &str = match option_env!("FACEGRID_GIT_HASH") {
    Some(hash) => hash,
    None => env!("CARGO_PKG_VERSION"),
};

/// Long enough to cover the API's synchronous wait window.
const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Parser)]
#[command(name = "facegrid")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Generate a grid of face-pose variants of one photo and tile them into a sprite")]
struct Cli {
    /// Grid dimension; must be a positive odd integer (default 5).
    #[arg(allow_hyphen_values = true)]
    grid_size: Option<String>,
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[arg(long = "photo")]
    photo: Option<PathBuf>,
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,
    #[arg(long = "concurrency")]
    concurrency: Option<usize>,
    #[arg(long = "max-attempts")]
    max_attempts: Option<u32>,
    #[arg(long = "verbose", default_value_t = false)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(outcome) => outcome.exit_code(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            find_pipeline_error(&error)
                .map(PipelineError::exit_code)
                .unwrap_or(1)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    // Grid size is checked before anything else so a bad value never reaches a prompt.
    let grid_size = cli
        .grid_size
        .as_deref()
        .map(|raw| parse_grid_size(Some(raw)))
        .transpose()?;

    dotenvy::dotenv().ok();

    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let config = PipelineConfig::resolve(
        file,
        CliOverrides {
            grid_size,
            source_photo: cli.photo,
            output_dir: cli.output_dir,
            concurrency: cli.concurrency,
            max_attempts: cli.max_attempts,
        },
    );
    config.validate()?;

    let photo = SourcePhoto::load(&config.source_photo)?;
    let token = env::var(API_TOKEN_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            PipelineError::validation(format!(
                "{API_TOKEN_ENV} is required to call the generation service"
            ))
        })?;

    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to create HTTP client")?;
    let client = ReplicateClient::new(http, token, &config.model, &config.api_base)?
        .with_polling(config.poll_interval, config.prediction_timeout);

    let orchestrator = Orchestrator::new(&config, &client, &photo, ProgressRenderer::stdout());
    let mut prompter = TerminalPrompter::detect();
    orchestrator.run(&mut prompter).await
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
