use std::fmt;
use std::path::Path;

use async_trait::async_trait;

#[cfg(test)]
use super::confirmation::Phase;
use super::confirmation::{FlowError, GenerationFlow, Transition};
use super::image_handle::{GeneratedImage, ImageSlot};
use super::rate_limit::{self, RateLimitExceeded, RateLimitState, RateLimiter};
use super::storage::KeyValueStore;
use crate::apis::inference::{GenerationRequest, InferenceClient, SubmissionError};
use crate::models::Catalog;

#[async_trait]
pub trait Submit {
    fn catalog(&self) -> Catalog;

    async fn submit(
        &self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<GeneratedImage, SubmissionError>;
}

#[async_trait]
impl Submit for InferenceClient {
    fn catalog(&self) -> Catalog {
        Self::catalog(self)
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<GeneratedImage, SubmissionError> {
        Self::submit(self, request, credential).await
    }
}

/// Rate limit state together with the store it is persisted to.
pub struct Quota {
    limiter: RateLimiter,
    state: RateLimitState,
    store: Box<dyn KeyValueStore + Send>,
}

impl Quota {
    pub fn load(limiter: RateLimiter, store: Box<dyn KeyValueStore + Send>) -> Self {
        let state = RateLimitState::load(store.as_ref());
        log::debug!("loaded rate limit state: {state:?}");
        Self { limiter, state, store }
    }

    pub const fn state(&self) -> RateLimitState {
        self.state
    }

    pub const fn limit(&self) -> u32 {
        self.limiter.limit()
    }

    /// Counts attempts, so the new state is stored before the request is sent.
    fn check_and_record(&mut self, now: i64) -> Result<(), RateLimitExceeded> {
        self.state = self.limiter.check_and_record(self.state, now)?;

        if let Err(err) = self.state.save(self.store.as_mut()) {
            log::warn!("failed to save rate limit state: {err}");
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    AwaitingConfirmation,
    Generated,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GenerateError {
    Flow(FlowError),
    Submission(SubmissionError),
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flow(err) => err.fmt(f),
            Self::Submission(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for GenerateError {}

impl From<FlowError> for GenerateError {
    fn from(value: FlowError) -> Self {
        Self::Flow(value)
    }
}

impl From<SubmissionError> for GenerateError {
    fn from(value: SubmissionError) -> Self {
        Self::Submission(value)
    }
}

/// Confirmation gate, then rate limit, then the inference call.
pub struct Generator<T> {
    submitter: T,
    quota: Option<Quota>,
    flow: GenerationFlow,
    slot: ImageSlot,
    clock: fn() -> i64,
}

impl<T: Submit> Generator<T> {
    pub fn new(submitter: T, quota: Option<Quota>, flow: GenerationFlow) -> Self {
        Self { submitter, quota, flow, slot: ImageSlot::default(), clock: rate_limit::now_millis }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(&self) -> Catalog {
        self.submitter.catalog()
    }

    #[cfg(test)]
    pub const fn phase(&self) -> Phase {
        self.flow.phase()
    }

    pub fn quota(&self) -> Option<&Quota> {
        self.quota.as_ref()
    }

    pub const fn image(&self) -> Option<&GeneratedImage> {
        self.slot.image()
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.slot.path()
    }

    pub async fn submit(
        &mut self,
        request: GenerationRequest,
        credential: &str,
    ) -> Result<Progress, GenerateError> {
        let model = self
            .catalog()
            .get(&request.model_id)
            .ok_or_else(|| SubmissionError::UnknownModel(request.model_id.clone()))?;

        match self.flow.submit(request, model)? {
            Transition::AwaitConfirmation => {
                log::info!("{} needs confirmation", model.id);
                Ok(Progress::AwaitingConfirmation)
            }
            Transition::Submit(request) => self.run(&request, credential).await,
        }
    }

    pub async fn confirm(&mut self, credential: &str) -> Result<Progress, GenerateError> {
        let request = self.flow.confirm()?;
        self.run(&request, credential).await
    }

    pub fn decline(&mut self) -> Result<(), FlowError> {
        self.flow.decline()?;
        log::info!("confirmation declined");
        Ok(())
    }

    async fn run(
        &mut self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<Progress, GenerateError> {
        let result = self.attempt(request, credential).await;
        self.flow.finish();

        let image = result?;
        if let Err(err) = self.slot.replace(image) {
            log::error!("failed to write generated image: {err}");
        }

        Ok(Progress::Generated)
    }

    async fn attempt(
        &mut self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<GeneratedImage, SubmissionError> {
        if let Some(quota) = &mut self.quota {
            let now = (self.clock)();
            if let Err(err) = quota.check_and_record(now) {
                log::info!("rate limited for another {}ms", err.retry_after_ms);
                return Err(err.into());
            }
        }

        self.submitter.submit(request, credential).await
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use reqwest::Client;
    use url::Url;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::models::Edition;
    use crate::utilities::test_fixtures::{BrokenStore, MemoryStore, RecordingSubmitter};

    const NOW: i64 = 1_700_000_000_000;
    const HOUR: i64 = 60 * 60 * 1000;
    const FLUX_SCHNELL: &str = "black-forest-labs/FLUX.1-schnell";
    const NSFW_MODEL: &str = "UnfilteredAI/NSFW-gen-v2";

    fn request(model_id: &str) -> GenerationRequest {
        GenerationRequest::new("a red fox", None, model_id).unwrap()
    }

    fn quota(store: &MemoryStore, limit: u32) -> Quota {
        Quota::load(RateLimiter::new(limit, HOUR), Box::new(store.clone()))
    }

    fn generator(
        submitter: &RecordingSubmitter,
        quota: Option<Quota>,
    ) -> Generator<RecordingSubmitter> {
        Generator::new(submitter.clone(), quota, GenerationFlow::default()).with_clock(|| NOW)
    }

    #[tokio::test]
    async fn test_safe_model_submits_immediately() {
        let submitter = RecordingSubmitter::image(b"image");
        let mut generator = generator(&submitter, None);

        let progress = generator.submit(request(FLUX_SCHNELL), "hf_token").await;

        assert_eq!(progress, Ok(Progress::Generated));
        assert_eq!(submitter.calls(), 1);
        assert_eq!(generator.phase(), Phase::Idle);
        assert_eq!(generator.image().unwrap().bytes(), b"image");
    }

    #[tokio::test]
    async fn test_nsfw_model_waits_for_confirmation() {
        let submitter = RecordingSubmitter::image(b"image");
        let mut generator = generator(&submitter, None);

        let progress = generator.submit(request(NSFW_MODEL), "hf_token").await;
        assert_eq!(progress, Ok(Progress::AwaitingConfirmation));
        assert_eq!(generator.phase(), Phase::AwaitingConfirmation);
        assert_eq!(submitter.calls(), 0);

        let progress = generator.submit(request(FLUX_SCHNELL), "hf_token").await;
        assert_eq!(progress, Err(GenerateError::Flow(FlowError::Busy)));
        assert_eq!(submitter.calls(), 0);

        assert_eq!(generator.confirm("hf_token").await, Ok(Progress::Generated));
        assert_eq!(submitter.calls(), 1);
        assert_eq!(submitter.requests.lock().unwrap()[0].model_id, NSFW_MODEL);
    }

    #[tokio::test]
    async fn test_declined_request_is_never_sent() {
        let submitter = RecordingSubmitter::image(b"image");
        let mut generator = generator(&submitter, None);

        generator.submit(request(NSFW_MODEL), "hf_token").await.unwrap();
        generator.decline().unwrap();

        assert_eq!(generator.phase(), Phase::Idle);
        assert_eq!(
            generator.confirm("hf_token").await,
            Err(GenerateError::Flow(FlowError::NothingToConfirm))
        );
        assert_eq!(submitter.calls(), 0);
        assert!(generator.image().is_none());
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let submitter = RecordingSubmitter::image(b"image");
        let mut generator = generator(&submitter, None);

        let request = request("stabilityai/stable-diffusion-2");
        let progress = generator.submit(request, "hf_token").await;

        assert_eq!(
            progress,
            Err(GenerateError::Submission(SubmissionError::UnknownModel(
                "stabilityai/stable-diffusion-2".into()
            )))
        );
        assert_eq!(generator.phase(), Phase::Idle);
        assert_eq!(submitter.calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits() {
        let store = MemoryStore::default();
        let full = RateLimitState { request_count: 20, window_start_timestamp: NOW - 1_000 };
        full.save(&mut store.clone()).unwrap();

        let submitter = RecordingSubmitter::image(b"image");
        let mut generator = generator(&submitter, Some(quota(&store, 20)));

        let progress = generator.submit(request(FLUX_SCHNELL), "hf_token").await;

        assert_eq!(
            progress,
            Err(GenerateError::Submission(SubmissionError::RateLimitExceeded {
                retry_after_ms: HOUR - 1_000
            }))
        );
        assert_eq!(submitter.calls(), 0);
        assert_eq!(generator.phase(), Phase::Idle);
        assert_eq!(generator.quota().unwrap().state(), full);
        assert_eq!(RateLimitState::load(&store), full);
    }

    #[tokio::test]
    async fn test_failed_attempts_are_counted() {
        let store = MemoryStore::default();
        let submitter = RecordingSubmitter::failing(SubmissionError::HttpError {
            status: 503,
            body: "overloaded".into(),
        });
        let mut generator = generator(&submitter, Some(quota(&store, 20)));

        for _ in 0..2 {
            let progress = generator.submit(request(FLUX_SCHNELL), "hf_token").await;
            assert_eq!(
                progress,
                Err(GenerateError::Submission(SubmissionError::HttpError {
                    status: 503,
                    body: "overloaded".into()
                }))
            );
        }

        assert!(generator.image().is_none());
        assert_eq!(
            RateLimitState::load(&store),
            RateLimitState { request_count: 2, window_start_timestamp: NOW }
        );
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_abort_submission() {
        let submitter = RecordingSubmitter::image(b"image");
        let quota = Quota::load(RateLimiter::new(20, HOUR), Box::new(BrokenStore));
        let mut generator = generator(&submitter, Some(quota));

        let progress = generator.submit(request(FLUX_SCHNELL), "hf_token").await;

        assert_eq!(progress, Ok(Progress::Generated));
        assert_eq!(submitter.calls(), 1);
        assert_eq!(
            generator.quota().unwrap().state(),
            RateLimitState { request_count: 1, window_start_timestamp: NOW }
        );
    }

    #[tokio::test]
    async fn test_twenty_first_request_is_rejected() {
        let store = MemoryStore::default();
        let submitter = RecordingSubmitter::image(b"image");
        let mut generator = generator(&submitter, Some(quota(&store, 20)));

        for _ in 0..20 {
            generator.submit(request(FLUX_SCHNELL), "hf_token").await.unwrap();
        }
        let progress = generator.submit(request(FLUX_SCHNELL), "hf_token").await;

        assert!(matches!(
            progress,
            Err(GenerateError::Submission(SubmissionError::RateLimitExceeded { .. }))
        ));
        assert_eq!(submitter.calls(), 20);
        assert_eq!(generator.quota().unwrap().state().request_count, 20);
    }

    #[tokio::test]
    async fn test_new_image_supersedes_previous() {
        let submitter = RecordingSubmitter::image(b"image");
        let mut generator = generator(&submitter, None);

        generator.submit(request(FLUX_SCHNELL), "hf_token").await.unwrap();
        let first = generator.image_path().unwrap().to_path_buf();
        generator.submit(request(FLUX_SCHNELL), "hf_token").await.unwrap();
        let second = generator.image_path().unwrap().to_path_buf();

        assert_ne!(first, second);
        assert!(!first.exists());
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let server = MockServer::start().await;
        let image = vec![89, 78, 71, 13, 10, 26, 10, 0];
        Mock::given(method("POST"))
            .and(path(format!("/models/{FLUX_SCHNELL}")))
            .and(body_json(serde_json::json!({ "inputs": "a red fox" })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(image.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let phases = Arc::new(Mutex::new(Vec::new()));
        let flow = GenerationFlow::with_observer(Box::new({
            let phases = phases.clone();
            move |phase| phases.lock().unwrap().push(phase)
        }));
        let client = InferenceClient::new(
            Client::new(),
            Url::parse(&server.uri()).unwrap(),
            Edition::Hosted.catalog(),
        );
        let mut generator = Generator::new(client, None, flow);

        let request = GenerationRequest::new("a red fox", None, FLUX_SCHNELL).unwrap();
        assert_eq!(generator.phase(), Phase::Idle);
        assert_eq!(generator.submit(request, "hf_token").await, Ok(Progress::Generated));

        assert_eq!(generator.image().unwrap().bytes(), image.as_slice());
        assert_eq!(std::fs::read(generator.image_path().unwrap()).unwrap(), image);
        assert_eq!(*phases.lock().unwrap(), [Phase::Submitting, Phase::Idle]);
    }

    #[tokio::test]
    async fn test_end_to_end_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(1)
            .mount(&server)
            .await;

        let client = InferenceClient::new(
            Client::new(),
            Url::parse(&server.uri()).unwrap(),
            Edition::Hosted.catalog(),
        );
        let mut generator = Generator::new(client, None, GenerationFlow::default());

        let result = generator.submit(request(FLUX_SCHNELL), "hf_token").await;

        assert_eq!(
            result,
            Err(GenerateError::Submission(SubmissionError::HttpError {
                status: 503,
                body: "overloaded".into()
            }))
        );
        assert!(generator.image().is_none());
        assert_eq!(generator.phase(), Phase::Idle);
    }
}
