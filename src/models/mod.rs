mod attendance;
mod schedule;
mod student;

pub use attendance::{AttendanceRecord, AttendanceStatus};
pub use schedule::ClassSchedule;
pub use student::{embedding_from_bytes, embedding_to_bytes, Embedding, Student};
