use std::io::{self, Write};
use std::path::Path;

use bytes::Bytes;
use image::ImageFormat;
use tempfile::NamedTempFile;

/// Raw image bytes as returned by the inference API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    bytes: Bytes,
    content_type: Option<String>,
}

impl GeneratedImage {
    pub const fn new(bytes: Bytes, content_type: Option<String>) -> Self {
        Self { bytes, content_type }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn extension(&self) -> &'static str {
        if let Some(extension) = image::guess_format(&self.bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
        {
            return extension;
        }

        self.content_type
            .as_deref()
            .and_then(|content_type| content_type.split(';').next())
            .and_then(|mime| ImageFormat::from_mime_type(mime.trim()))
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin")
    }
}

/// Holds the image currently on display. Replacing it removes the previous
/// temporary file.
#[derive(Default)]
pub struct ImageSlot {
    image: Option<GeneratedImage>,
    file: Option<NamedTempFile>,
}

impl ImageSlot {
    pub fn replace(&mut self, image: GeneratedImage) -> io::Result<&Path> {
        if let Some(previous) = self.file.take() {
            log::debug!("discarding {}", previous.path().display());
            if let Err(err) = previous.close() {
                log::warn!("failed to remove previous image: {err}");
            }
        }

        let image = self.image.insert(image);
        let mut file = tempfile::Builder::new()
            .prefix("generated-")
            .suffix(&format!(".{}", image.extension()))
            .tempfile()?;
        file.write_all(image.bytes())?;
        file.flush()?;

        Ok(self.file.insert(file).path())
    }

    pub const fn image(&self) -> Option<&GeneratedImage> {
        self.image.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(NamedTempFile::path)
    }
}
