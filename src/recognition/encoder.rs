use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;

use crate::models::Embedding;

/// Narrow interface to the encoding engine: an image in, zero-or-more
/// fixed-length face embeddings out (empty when no face is found).
///
/// Implementations are synchronous; callers on the async runtime go through
/// `tokio::task::spawn_blocking`.
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<Embedding>>;
}

/// Encoding engine reached over HTTP: POSTs the frame as JPEG, expects a
/// JSON body of the form `{"embeddings": [[...], ...]}`.
pub struct HttpFaceEncoder {
    client: reqwest::blocking::Client,
    url: String,
}

#[derive(Deserialize)]
struct EncodeResponse {
    embeddings: Vec<Embedding>,
}

impl HttpFaceEncoder {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build encoder HTTP client")?;
        Ok(Self { client, url })
    }
}

impl FaceEncoder for HttpFaceEncoder {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<Embedding>> {
        let mut jpeg = Cursor::new(Vec::new());
        image
            .write_to(&mut jpeg, ImageFormat::Jpeg)
            .context("failed to encode frame as JPEG")?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg.into_inner())
            .send()
            .with_context(|| format!("encoding engine unreachable at {}", self.url))?
            .error_for_status()
            .context("encoding engine returned an error status")?;

        let parsed: EncodeResponse = response
            .json()
            .context("encoding engine returned malformed JSON")?;
        Ok(parsed.embeddings)
    }
}
