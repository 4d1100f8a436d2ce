//! Imagen predict API client
//!
//! `POST {base_url}/v1beta/models/{model}:predict?key=...` with one prompt
//! per request and a single sample.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generation::{GenerationError, ImageGenerator};

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_MODEL: &str = "imagen-3.0-generate-002";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} is not set")]
    MissingApiKey(&'static str),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Connection settings for the Imagen API
#[derive(Clone)]
pub struct ImagenConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub aspect_ratio: String,
}

impl std::fmt::Debug for ImagenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagenConfig")
            .field("api_key", &mask_api_key(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("aspect_ratio", &self.aspect_ratio)
            .finish()
    }
}

impl ImagenConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
        }
    }

    /// Read the API key from `GOOGLE_API_KEY`
    pub fn from_env() -> Result<Self, ProviderError> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(ProviderError::MissingApiKey(API_KEY_ENV)),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = aspect_ratio.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:predict",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// Show only the edges of an API key
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars.iter().take(4).collect();
    let tail: String = chars.iter().skip(chars.len() - 4).collect();
    format!("{}...{}", head, tail)
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: [Instance<'a>; 1],
    parameters: Parameters<'a>,
}

#[derive(Debug, Serialize)]
struct Instance<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters<'a> {
    sample_count: u32,
    aspect_ratio: &'a str,
    include_rai_reason: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    rai_filtered_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// HTTP client for the Imagen predict endpoint
pub struct ImagenClient {
    client: reqwest::Client,
    config: ImagenConfig,
}

impl ImagenClient {
    pub fn new(config: ImagenConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().build()?;
        tracing::debug!(
            model = %config.model,
            base_url = %config.base_url,
            api_key = %mask_api_key(&config.api_key),
            "imagen client ready"
        );
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ImagenConfig {
        &self.config
    }
}

fn is_block_message(message: &str) -> bool {
    let message = message.to_lowercase();
    ["block", "safety", "responsible ai", "filtered"]
        .iter()
        .any(|needle| message.contains(needle))
}

fn classify_failure(status: reqwest::StatusCode, body: &str) -> GenerationError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    if status == reqwest::StatusCode::BAD_REQUEST && is_block_message(&message) {
        return GenerationError::Rejected(message);
    }
    GenerationError::Service {
        status: status.as_u16(),
        message,
    }
}

fn extract_image(body: &str) -> Result<Vec<u8>, GenerationError> {
    let response: PredictResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    if response.predictions.is_empty() {
        return Err(GenerationError::EmptyResponse(
            "no predictions returned".to_string(),
        ));
    }

    if let Some(encoded) = response
        .predictions
        .iter()
        .find_map(|p| p.bytes_base64_encoded.as_deref())
    {
        return STANDARD
            .decode(encoded)
            .map_err(|e| GenerationError::MalformedResponse(format!("invalid base64: {}", e)));
    }

    match response
        .predictions
        .into_iter()
        .find_map(|p| p.rai_filtered_reason)
    {
        Some(reason) => Err(GenerationError::Rejected(reason)),
        None => Err(GenerationError::EmptyResponse(
            "prediction carried no image data".to_string(),
        )),
    }
}

#[async_trait]
impl ImageGenerator for ImagenClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
        let request = PredictRequest {
            instances: [Instance { prompt }],
            parameters: Parameters {
                sample_count: 1,
                aspect_ratio: &self.config.aspect_ratio,
                include_rai_reason: true,
            },
        };

        // without_url: the query string carries the key
        let response = self
            .client
            .post(self.config.endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Network(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }
        extract_image(&body)
    }
}
