use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::frame_cache::FrameCache;
use super::stream_worker::stream_loop;

/// Owns the background ingestion task and its shutdown signal.
///
/// The loop is expected to run for the process lifetime, but a cancellation
/// token is still threaded through so shutdown (and tests) can stop it
/// cleanly instead of leaking the task.
pub struct CameraController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CameraController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, url: String, cache: FrameCache, retry_backoff: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("camera ingest already active");
        }

        info!("starting camera ingest for {url}");

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let handle = tokio::spawn(stream_loop(url, cache, retry_backoff, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("camera ingest task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut controller = CameraController::new();
        let cache = FrameCache::new();

        controller
            .start(
                "http://127.0.0.1:9/stream".into(),
                cache.clone(),
                Duration::from_secs(60),
            )
            .expect("first start failed");
        assert!(controller
            .start("http://127.0.0.1:9/stream".into(), cache, Duration::from_secs(60))
            .is_err());

        controller.stop().await.expect("stop failed");
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let mut controller = CameraController::new();
        controller.stop().await.expect("stop failed");
    }
}
