mod calendar;
mod engine;

pub use calendar::{
    attendance_matrix, attendance_rate, nearest_session_date, session_dates, MatrixRow,
};
pub use engine::{AttendanceEngine, CaptureOutcome};
