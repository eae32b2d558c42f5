use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    /// Camera endpoint serving the continuous JPEG byte stream.
    pub camera_url: String,
    /// Encoding engine endpoint (image in, embeddings out).
    pub encoder_url: String,
    /// Optional status display endpoint; notifications are best-effort.
    pub display_url: Option<String>,
    pub db_path: PathBuf,
    /// Acceptance threshold for face distance. Observed deployments have
    /// used 0.5 and 0.65; this is a tunable, not a fixed constant.
    pub match_threshold: f64,
    /// Minutes after class start during which arrival still counts on time.
    pub grace_minutes: i64,
    /// Backoff between camera reconnect attempts.
    pub stream_retry_secs: u64,
    pub encode_timeout_ms: u64,
    pub notify_timeout_ms: u64,
    /// When set, the binary runs as a capture kiosk for this class,
    /// attempting attendance on a fixed cadence.
    pub capture_class_id: Option<String>,
    pub capture_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            camera_url: "http://192.168.1.81:81/stream".into(),
            encoder_url: "http://127.0.0.1:8090/encode".into(),
            display_url: None,
            db_path: PathBuf::from("rollcall.sqlite3"),
            match_threshold: 0.5,
            grace_minutes: 15,
            stream_retry_secs: 3,
            encode_timeout_ms: 5_000,
            notify_timeout_ms: 1_000,
            capture_class_id: None,
            capture_interval_secs: 5,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn engine(&self) -> EngineSettings {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, settings: EngineSettings) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            *guard = settings;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
