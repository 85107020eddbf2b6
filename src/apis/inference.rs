use std::error::Error;
use std::fmt;
use std::time::Instant;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use url::Url;

use crate::models::{Catalog, ModelDescriptor};
use crate::utilities::image_handle::GeneratedImage;
use crate::utilities::rate_limit::RateLimitExceeded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model_id: String,
}

impl GenerationRequest {
    /// Fails when the prompt is blank, mirroring the required form field.
    pub fn new(
        prompt: impl Into<String>,
        negative_prompt: Option<String>,
        model_id: impl Into<String>,
    ) -> Option<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return None;
        }

        Some(Self { prompt, negative_prompt, model_id: model_id.into() })
    }
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct InferencePayload<'a> {
    pub inputs: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters<'a>>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Parameters<'a> {
    pub negative_prompt: &'a str,
}

impl<'a> InferencePayload<'a> {
    /// Negative prompts for models that can't take one are dropped, not rejected.
    pub fn new(request: &'a GenerationRequest, model: &ModelDescriptor) -> Self {
        let parameters = request
            .negative_prompt
            .as_deref()
            .filter(|negative_prompt| !negative_prompt.is_empty())
            .filter(|_| model.supports_negative_prompt)
            .map(|negative_prompt| Parameters { negative_prompt });

        Self { inputs: &request.prompt, parameters }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionError {
    UnknownModel(String),
    HttpError { status: u16, body: String },
    NetworkFailure(String),
    RateLimitExceeded { retry_after_ms: i64 },
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModel(model_id) => write!(f, "unknown model {model_id:?}"),
            Self::HttpError { status, body } => {
                write!(f, "HTTP error! status: {status}, message: {body}")
            }
            Self::NetworkFailure(err) => write!(f, "network failure: {err}"),
            Self::RateLimitExceeded { retry_after_ms } => write!(
                f,
                "rate limit exceeded, try again in {}s",
                retry_after_ms.div_euclid(1000) + i64::from(retry_after_ms.rem_euclid(1000) > 0)
            ),
        }
    }
}

impl Error for SubmissionError {}

impl From<reqwest::Error> for SubmissionError {
    fn from(value: reqwest::Error) -> Self {
        Self::NetworkFailure(value.without_url().to_string())
    }
}

impl From<RateLimitExceeded> for SubmissionError {
    fn from(value: RateLimitExceeded) -> Self {
        Self::RateLimitExceeded { retry_after_ms: value.retry_after_ms }
    }
}

pub struct InferenceClient {
    http_client: Client,
    host: Url,
    catalog: Catalog,
}

impl InferenceClient {
    pub const fn new(http_client: Client, host: Url, catalog: Catalog) -> Self {
        Self { http_client, host, catalog }
    }

    pub const fn catalog(&self) -> Catalog {
        self.catalog
    }

    fn model_url(&self, model: &ModelDescriptor) -> String {
        format!("{}/models/{}", self.host.as_str().trim_end_matches('/'), model.id)
    }

    pub async fn submit(
        &self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<GeneratedImage, SubmissionError> {
        let model = self
            .catalog
            .get(&request.model_id)
            .ok_or_else(|| SubmissionError::UnknownModel(request.model_id.clone()))?;

        let payload = InferencePayload::new(request, model);
        if payload.parameters.is_none() && request.negative_prompt.is_some() {
            log::debug!("dropping negative prompt for {}", model.id);
        }

        log::info!("generating {:?} with {}", request.prompt, model.id);
        let start = Instant::now();
        let response = self
            .http_client
            .post(self.model_url(model))
            .bearer_auth(credential)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            log::warn!("{} responded with {status}", model.id);
            return Err(SubmissionError::HttpError { status: status.as_u16(), body });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        let bytes = response.bytes().await?;
        log::debug!(
            "{} returned {} bytes in {:.2}s",
            model.id,
            bytes.len(),
            start.elapsed().as_secs_f32()
        );

        Ok(GeneratedImage::new(bytes, content_type))
    }
}
