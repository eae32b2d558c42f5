use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use image::ImageFormat;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::frame_cache::{Frame, FrameCache};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

// Upper bound on buffered bytes while waiting for an end-of-image marker.
// A source that never terminates a frame must not grow the buffer forever.
const MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

/// Continuously ingests the camera's JPEG byte stream into the frame cache.
///
/// Runs until cancelled. Every failure mode (connect error, non-success
/// status, mid-stream read error, stream end) leads to a fixed backoff and
/// a reconnect; nothing is ever surfaced to callers, only cache freshness
/// is affected.
pub async fn stream_loop(
    url: String,
    cache: FrameCache,
    retry_backoff: Duration,
    cancel_token: CancellationToken,
) {
    let client = reqwest::Client::new();

    loop {
        tokio::select! {
            result = ingest_connection(&client, &url, &cache) => {
                match result {
                    Ok(()) => log_warn!(
                        "camera stream {url} ended; reconnecting in {}s",
                        retry_backoff.as_secs()
                    ),
                    Err(err) => log_warn!(
                        "camera stream failed: {err:#}; reconnecting in {}s",
                        retry_backoff.as_secs()
                    ),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("camera ingest shutting down");
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_backoff) => {}
            _ = cancel_token.cancelled() => {
                log_info!("camera ingest shutting down");
                break;
            }
        }
    }
}

/// Drains one connection until it drops, publishing every decodable frame.
async fn ingest_connection(
    client: &reqwest::Client,
    url: &str,
    cache: &FrameCache,
) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to connect to camera at {url}"))?
        .error_for_status()
        .context("camera returned an error status")?;

    log_info!("camera stream connected: {url}");

    let mut stream = response.bytes_stream();
    let mut assembler = JpegAssembler::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("camera stream read failed")?;
        for jpeg in assembler.push(&chunk) {
            match image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg) {
                Ok(image) => cache.publish(Frame {
                    image,
                    captured_at: Utc::now(),
                }),
                // One bad frame does not tear down the connection.
                Err(err) => log_warn!("dropping undecodable frame ({} bytes): {err}", jpeg.len()),
            }
        }
    }

    Ok(())
}

/// Reassembles discrete JPEG images out of an unframed byte stream by
/// scanning for paired start-of-image / end-of-image markers. Partial
/// trailing data is retained across `push` calls until its end marker
/// arrives or the connection drops.
pub(crate) struct JpegAssembler {
    buffer: Vec<u8>,
}

impl JpegAssembler {
    pub(crate) fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Appends a chunk and returns every complete image it closed off.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let Some(start) = find_marker(&self.buffer, &SOI) else {
                // No start marker anywhere: discard the garbage, keeping the
                // final byte in case a marker is split across chunks.
                if self.buffer.len() > 1 {
                    self.buffer = self.buffer.split_off(self.buffer.len() - 1);
                }
                break;
            };
            if start > 0 {
                self.buffer.drain(..start);
            }

            // The payload between the markers cannot contain EOI: encoders
            // byte-stuff 0xFF inside entropy-coded data.
            let Some(end) = find_marker(&self.buffer[SOI.len()..], &EOI) else {
                break;
            };
            let frame_len = SOI.len() + end + EOI.len();
            frames.push(self.buffer[..frame_len].to_vec());
            self.buffer.drain(..frame_len);
        }

        if self.buffer.len() > MAX_PENDING_BYTES {
            self.buffer.clear();
        }

        frames
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(marker.len()).position(|w| w == marker)
}
