pub mod attendance;
pub mod camera;
pub mod db;
pub mod display;
pub mod models;
pub mod recognition;
pub mod settings;
mod utils;

pub use attendance::{AttendanceEngine, CaptureOutcome};
pub use camera::{CameraController, Frame, FrameCache};
pub use db::Database;
pub use display::DisplaySink;
pub use recognition::{FaceEncoder, HttpFaceEncoder};
pub use settings::{EngineSettings, SettingsStore};
