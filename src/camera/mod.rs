mod controller;
mod frame_cache;
mod stream_worker;

pub use controller::CameraController;
pub use frame_cache::{Frame, FrameCache};
pub use stream_worker::stream_loop;
