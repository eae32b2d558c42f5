use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceStatus {
    OnTime,
    Late,
    /// Never persisted; the default reading for a session date with no record.
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::OnTime => "on_time",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, AttendanceStatus::OnTime | AttendanceStatus::Late)
    }
}

/// One attendance row, keyed by (class, student, session date).
///
/// At most one record exists per key; a later capture on the same date
/// overwrites status and timestamp instead of inserting a second row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub class_id: String,
    pub student_id: String,
    pub session_date: NaiveDate,
    pub status: AttendanceStatus,
    pub recorded_at: DateTime<Utc>,
}
