use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use super::generator::Submit;
use super::image_handle::GeneratedImage;
use super::storage::KeyValueStore;
use crate::apis::inference::{GenerationRequest, SubmissionError};
use crate::models::{Catalog, Edition};

#[derive(Clone, Default)]
pub struct MemoryStore(Arc<Mutex<HashMap<String, String>>>);

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().unwrap().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> io::Result<()> {
        self.0.lock().unwrap().insert(key.into(), value);
        Ok(())
    }
}

/// Reads nothing and fails every write.
pub struct BrokenStore;

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&mut self, _key: &str, _value: String) -> io::Result<()> {
        Err(io::Error::other("disk full"))
    }
}

/// Answers every request with the same result and remembers what it was asked.
#[derive(Clone)]
pub struct RecordingSubmitter {
    pub requests: Arc<Mutex<Vec<GenerationRequest>>>,
    response: Result<GeneratedImage, SubmissionError>,
}

impl RecordingSubmitter {
    pub fn image(bytes: &'static [u8]) -> Self {
        Self {
            requests: Arc::default(),
            response: Ok(GeneratedImage::new(Bytes::from_static(bytes), None)),
        }
    }

    pub fn failing(err: SubmissionError) -> Self {
        Self { requests: Arc::default(), response: Err(err) }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Submit for RecordingSubmitter {
    fn catalog(&self) -> Catalog {
        Edition::Hosted.catalog()
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        _credential: &str,
    ) -> Result<GeneratedImage, SubmissionError> {
        self.requests.lock().unwrap().push(request.clone());
        self.response.clone()
    }
}
