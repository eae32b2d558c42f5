use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use rollcall::{
    AttendanceEngine, CameraController, CaptureOutcome, Database, DisplaySink, FrameCache,
    HttpFaceEncoder, SettingsStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("rollcall starting up...");

    let settings_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("rollcall.json"));
    let store = SettingsStore::new(settings_path)?;
    let settings = store.engine();

    let database = Database::new(settings.db_path.clone())?;
    let cache = FrameCache::new();

    let mut camera = CameraController::new();
    camera.start(
        settings.camera_url.clone(),
        cache.clone(),
        Duration::from_secs(settings.stream_retry_secs),
    )?;

    let encoder = Arc::new(
        HttpFaceEncoder::new(
            settings.encoder_url.clone(),
            Duration::from_millis(settings.encode_timeout_ms),
        )
        .context("failed to build face encoder client")?,
    );

    let display = match &settings.display_url {
        Some(url) => Some(
            DisplaySink::new(
                url.clone(),
                Duration::from_millis(settings.notify_timeout_ms),
            )
            .context("failed to build display sink client")?,
        ),
        None => None,
    };

    let engine = AttendanceEngine::new(
        database,
        cache,
        encoder,
        display,
        settings.match_threshold,
        settings.grace_minutes,
    );

    let cancel_token = CancellationToken::new();
    let kiosk = settings.capture_class_id.clone().map(|class_id| {
        let token = cancel_token.clone();
        let interval = Duration::from_secs(settings.capture_interval_secs);
        tokio::spawn(async move { capture_loop(engine, class_id, interval, token).await })
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    cancel_token.cancel();
    if let Some(handle) = kiosk {
        if let Err(err) = handle.await {
            warn!("capture loop did not stop cleanly: {err:#}");
        }
    }
    if let Err(err) = camera.stop().await {
        warn!("camera ingest did not stop cleanly: {err:#}");
    }

    info!("rollcall stopped");
    Ok(())
}

/// Kiosk mode: attempt attendance for one class on a fixed cadence.
async fn capture_loop(
    engine: AttendanceEngine,
    class_id: String,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.attempt_attendance(&class_id).await {
                    Ok(CaptureOutcome::Recorded { student_id, status, session_date, .. }) => {
                        info!(
                            "recorded {student_id} as {} for {class_id} on {session_date}",
                            status.as_str()
                        );
                    }
                    Ok(CaptureOutcome::NoFrame) | Ok(CaptureOutcome::NoFace) => {}
                    Ok(outcome) => info!("capture for {class_id}: {outcome:?}"),
                    Err(err) => warn!("capture for {class_id} failed: {err:#}"),
                }
            }
            _ = cancel_token.cancelled() => {
                info!("capture loop shutting down");
                break;
            }
        }
    }
}
