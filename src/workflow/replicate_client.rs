use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::workflow::service::GenerationService;
use crate::workflow::types::{ArtifactRef, GenerationRequest, ServiceOutput};

/// Asks the API to hold the create call open until the prediction finishes (up to 60s).
const PREFER_WAIT: &str = "wait";

#[derive(Debug, Clone)]
pub struct ReplicateClient {
    http: Client,
    token: String,
    api_base: String,
    version: String,
    poll_interval: Duration,
    prediction_timeout: Duration,
}

impl ReplicateClient {
    pub fn new(http: Client, token: String, model: &str, api_base: &str) -> Result<Self> {
        let version = parse_model_version(model)?.to_owned();
        Ok(Self {
            http,
            token,
            api_base: api_base.trim_end_matches('/').to_owned(),
            version,
            poll_interval: Duration::from_secs(1),
            prediction_timeout: Duration::from_secs(300),
        })
    }

    pub fn with_polling(mut self, poll_interval: Duration, prediction_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.prediction_timeout = prediction_timeout;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    async fn create_prediction(&self, request: &GenerationRequest<'_>) -> Result<Prediction> {
        let body = CreatePrediction {
            version: &self.version,
            input: request,
        };
        debug!(
            filename = %request.step.filename,
            version = %self.version,
            "creating prediction"
        );
        self.http
            .post(format!("{}/predictions", self.api_base))
            .bearer_auth(&self.token)
            .header("Prefer", PREFER_WAIT)
            .json(&body)
            .send()
            .await
            .context("failed to call Replicate predictions API")?
            .error_for_status()
            .context("Replicate predictions API returned an error status")?
            .json()
            .await
            .context("failed to decode Replicate prediction response")
    }

    async fn get_prediction(&self, url: &str) -> Result<Prediction> {
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to poll Replicate prediction")?
            .error_for_status()
            .context("Replicate prediction poll returned an error status")?
            .json()
            .await
            .context("failed to decode Replicate prediction poll response")
    }

    async fn wait_for_completion(&self, mut prediction: Prediction) -> Result<Prediction> {
        let started = Instant::now();
        while !prediction.status.is_terminal() {
            if started.elapsed() > self.prediction_timeout {
                bail!(
                    "prediction {} did not finish within {} seconds (last status: {:?})",
                    prediction.id,
                    self.prediction_timeout.as_secs(),
                    prediction.status
                );
            }
            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|urls| urls.get.clone())
                .ok_or_else(|| {
                    anyhow!("prediction {} is still running but has no poll URL", prediction.id)
                })?;
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_prediction(&poll_url).await?;
            debug!(id = %prediction.id, status = ?prediction.status, "polled prediction");
        }
        Ok(prediction)
    }
}

#[async_trait]
impl GenerationService for ReplicateClient {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Option<ServiceOutput>> {
        let created = self.create_prediction(request).await?;
        let finished = self.wait_for_completion(created).await?;
        match finished.status {
            PredictionStatus::Succeeded => parse_output(finished.output),
            status => bail!(
                "prediction {} ended as {:?}: {}",
                finished.id,
                status,
                finished
                    .error
                    .map(|error| error_text(&error))
                    .unwrap_or_else(|| "no error detail".to_owned())
            ),
        }
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let reference = artifact.as_str();
        if reference.starts_with("data:") {
            return decode_data_uri(reference);
        }

        let url = Url::parse(reference)
            .with_context(|| format!("artifact reference is not a URL: {reference}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("unsupported artifact URL scheme '{}'", url.scheme());
        }

        let bytes = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to download artifact {url}"))?
            .error_for_status()
            .with_context(|| format!("artifact URL returned an error status: {url}"))?
            .bytes()
            .await
            .with_context(|| format!("failed to read bytes from {url}"))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct CreatePrediction<'a> {
    version: &'a str,
    input: &'a GenerationRequest<'a>,
}

#[derive(Debug, Clone, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded
                | PredictionStatus::Failed
                | PredictionStatus::Canceled
                | PredictionStatus::Aborted
        )
    }
}

/// `owner/name:version` or a bare version id.
pub fn parse_model_version(model: &str) -> Result<&str> {
    let trimmed = model.trim();
    let version = match trimmed.rsplit_once(':') {
        Some((name, version)) if !name.is_empty() => version,
        Some(_) => "",
        None if !trimmed.contains('/') => trimmed,
        None => bail!("model '{trimmed}' is missing a ':<version>' suffix"),
    };
    if version.is_empty() || !version.chars().all(|char| char.is_ascii_alphanumeric()) {
        bail!("model '{trimmed}' does not carry a valid version id");
    }
    Ok(version)
}

fn parse_output(output: Option<Value>) -> Result<Option<ServiceOutput>> {
    match output {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .context("prediction output is neither a file reference nor a list of them"),
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| anyhow!("malformed data URI artifact"))?;
    if !header.ends_with(";base64") {
        bail!("only base64 data URI artifacts are supported");
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("failed to decode base64 data URI artifact")
}
