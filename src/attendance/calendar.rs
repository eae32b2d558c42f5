use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::models::{AttendanceRecord, AttendanceStatus, ClassSchedule, Student};

/// Expands a recurring weekly schedule into the concrete dates the class has
/// met so far: every date in `[first_date, min(last_date, today)]` whose
/// weekday matches, ascending. This list is the ground truth for "how many
/// times has this class met".
///
/// An inverted range or a weekday that never occurs in range yields an empty
/// list, which downstream rate computation must treat as 0%, not a fault.
pub fn session_dates(schedule: &ClassSchedule, today: NaiveDate) -> Vec<NaiveDate> {
    let end = schedule.last_date.min(today);
    if schedule.first_date > end {
        return Vec::new();
    }

    schedule
        .first_date
        .iter_days()
        .take_while(|date| *date <= end)
        .filter(|date| date.weekday() == schedule.weekday)
        .collect()
}

/// Picks the session date closest to `today` from an expanded calendar.
/// Ties resolve to the earlier date.
pub fn nearest_session_date(dates: &[NaiveDate], today: NaiveDate) -> Option<NaiveDate> {
    dates
        .iter()
        .copied()
        .min_by_key(|date| (*date - today).num_days().abs())
}

/// Share of held sessions a student attended (on time or late), as a
/// percentage rounded to two decimals. Zero held sessions is 0%, not an
/// error.
pub fn attendance_rate(records: &[AttendanceRecord], dates: &[NaiveDate]) -> f64 {
    if dates.is_empty() {
        return 0.0;
    }

    let attended = records
        .iter()
        .filter(|record| record.status.is_present() && dates.contains(&record.session_date))
        .count();

    let rate = attended as f64 / dates.len() as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// One row of the dense attendance matrix: a student and one cell per
/// session date, `Absent` wherever no record exists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    pub student_id: String,
    pub name: String,
    pub statuses: Vec<AttendanceStatus>,
}

/// Builds the dense per-student attendance matrix consumed by reporting.
pub fn attendance_matrix(
    roster: &[Student],
    records: &[AttendanceRecord],
    dates: &[NaiveDate],
) -> Vec<MatrixRow> {
    let by_key: HashMap<(&str, NaiveDate), AttendanceStatus> = records
        .iter()
        .map(|record| {
            (
                (record.student_id.as_str(), record.session_date),
                record.status,
            )
        })
        .collect();

    roster
        .iter()
        .map(|student| MatrixRow {
            student_id: student.student_id.clone(),
            name: student.name.clone(),
            statuses: dates
                .iter()
                .map(|date| {
                    by_key
                        .get(&(student.student_id.as_str(), *date))
                        .copied()
                        .unwrap_or(AttendanceStatus::Absent)
                })
                .collect(),
        })
        .collect()
}
