use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;

/// Best-effort client for the classroom status display.
///
/// Failures here must never affect an attendance decision: every error is
/// logged at warn and dropped, and the short request timeout keeps a dead
/// display from delaying anything upstream.
#[derive(Clone)]
pub struct DisplaySink {
    client: reqwest::Client,
    url: String,
}

impl DisplaySink {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build display sink HTTP client")?;
        Ok(Self { client, url })
    }

    pub async fn notify(&self, text: &str) {
        match self
            .client
            .post(&self.url)
            .body(text.to_string())
            .send()
            .await
        {
            Ok(response) if !response.status().is_success() => {
                warn!("display sink returned {}", response.status());
            }
            Ok(_) => {}
            Err(err) => warn!("display sink unreachable: {err}"),
        }
    }
}
