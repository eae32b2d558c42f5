use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;

use crate::camera::FrameCache;
use crate::db::Database;
use crate::display::DisplaySink;
use crate::models::{AttendanceRecord, AttendanceStatus};
use crate::recognition::{match_face, FaceEncoder, MatchOutcome};

use super::calendar::{nearest_session_date, session_dates};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Result of one capture attempt. Expected no-data conditions and policy
/// rejections are all ordinary outcomes; only store faults surface as `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum CaptureOutcome {
    /// The camera has not published a frame yet.
    NoFrame,
    NoFace,
    NoKnownFaces,
    /// A face was found but nobody enrolled is close enough.
    Unknown { distance: f64 },
    ClassNotFound,
    /// Recognized, but not on this class's roster; nothing is written.
    NotInClass { student_id: String },
    /// The class calendar is empty up to today.
    NoScheduledSessions,
    Recorded {
        student_id: String,
        name: String,
        status: AttendanceStatus,
        session_date: NaiveDate,
        distance: f64,
    },
}

/// Ties the capture pipeline together: latest frame -> embedding ->
/// nearest-neighbor match -> schedule classification -> idempotent upsert.
pub struct AttendanceEngine {
    db: Database,
    cache: FrameCache,
    encoder: Arc<dyn FaceEncoder>,
    display: Option<DisplaySink>,
    match_threshold: f64,
    grace: Duration,
}

impl AttendanceEngine {
    pub fn new(
        db: Database,
        cache: FrameCache,
        encoder: Arc<dyn FaceEncoder>,
        display: Option<DisplaySink>,
        match_threshold: f64,
        grace_minutes: i64,
    ) -> Self {
        Self {
            db,
            cache,
            encoder,
            display,
            match_threshold,
            grace: Duration::minutes(grace_minutes),
        }
    }

    /// Attempts to mark attendance for `class_id` from the latest camera
    /// frame, using the local wall clock.
    pub async fn attempt_attendance(&self, class_id: &str) -> Result<CaptureOutcome> {
        self.attempt_attendance_at(class_id, Local::now().naive_local())
            .await
    }

    /// Same as `attempt_attendance` with an explicit capture instant
    /// (local wall-clock time; the grace rule compares time-of-day only).
    pub async fn attempt_attendance_at(
        &self,
        class_id: &str,
        now: NaiveDateTime,
    ) -> Result<CaptureOutcome> {
        let Some(frame) = self.cache.latest() else {
            return Ok(CaptureOutcome::NoFrame);
        };

        let Some(schedule) = self.db.get_class(class_id).await? else {
            return Ok(CaptureOutcome::ClassNotFound);
        };

        // The encoder is CPU/network bound; keep it off the async runtime.
        let encoder = Arc::clone(&self.encoder);
        let image = frame.image;
        let detected = tokio::task::spawn_blocking(move || encoder.encode(&image))
            .await
            .context("encoder worker join failed")??;

        let known = self.db.get_students_with_embeddings().await?;
        let (student_id, name, distance) =
            match match_face(&detected, &known, self.match_threshold) {
                MatchOutcome::NoFace => return Ok(CaptureOutcome::NoFace),
                MatchOutcome::NoKnownFaces => return Ok(CaptureOutcome::NoKnownFaces),
                MatchOutcome::Unknown { distance } => {
                    log_info!("unrecognized face at distance {distance:.3}");
                    return Ok(CaptureOutcome::Unknown { distance });
                }
                MatchOutcome::Match {
                    student_id,
                    name,
                    distance,
                } => (student_id, name, distance),
            };

        if !self.db.is_enrolled(class_id, &student_id).await? {
            log_info!("{student_id} matched at {distance:.3} but is not in class {class_id}");
            return Ok(CaptureOutcome::NotInClass { student_id });
        }

        let today = now.date();
        let dates = session_dates(&schedule, today);
        let Some(session_date) = nearest_session_date(&dates, today) else {
            return Ok(CaptureOutcome::NoScheduledSessions);
        };

        let status = classify_arrival(now.time(), schedule.start_time, self.grace);
        let record = AttendanceRecord {
            class_id: class_id.to_string(),
            student_id: student_id.clone(),
            session_date,
            status,
            recorded_at: Utc::now(),
        };
        self.db.upsert_attendance(&record).await?;

        log_info!(
            "recorded {student_id} as {} for {class_id} on {session_date} (distance {distance:.3})",
            status.as_str()
        );
        self.notify_display(format!("{name}: {}", status.as_str()));

        Ok(CaptureOutcome::Recorded {
            student_id,
            name,
            status,
            session_date,
            distance,
        })
    }

    /// Fire-and-forget status text to the physical display. Never blocks or
    /// fails the attendance write.
    fn notify_display(&self, text: String) {
        let Some(sink) = self.display.clone() else {
            return;
        };
        tokio::spawn(async move {
            sink.notify(&text).await;
        });
    }
}

/// Pure time-of-day grace rule: on time iff arrival is no later than
/// start + grace.
fn classify_arrival(arrival: NaiveTime, start: NaiveTime, grace: Duration) -> AttendanceStatus {
    let (cutoff, wrapped) = start.overflowing_add_signed(grace);
    if wrapped != 0 {
        // Grace window crosses midnight; every time-of-day is within it.
        return AttendanceStatus::OnTime;
    }
    if arrival <= cutoff {
        AttendanceStatus::OnTime
    } else {
        AttendanceStatus::Late
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Frame;
    use crate::models::{ClassSchedule, Embedding, Student};
    use anyhow::bail;
    use chrono::Weekday;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_db(name: &str) -> Database {
        let serial = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "rollcall_engine_{name}_{}_{serial}.sqlite3",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        Database::new(path).expect("failed to open test database")
    }

    struct StubEncoder {
        detected: Vec<Embedding>,
    }

    impl FaceEncoder for StubEncoder {
        fn encode(&self, _image: &DynamicImage) -> anyhow::Result<Vec<Embedding>> {
            Ok(self.detected.clone())
        }
    }

    struct FailingEncoder;

    impl FaceEncoder for FailingEncoder {
        fn encode(&self, _image: &DynamicImage) -> anyhow::Result<Vec<Embedding>> {
            bail!("encoding engine offline")
        }
    }

    fn schedule() -> ClassSchedule {
        ClassSchedule {
            class_id: "cs101".into(),
            name: "Intro CS".into(),
            weekday: Weekday::Mon,
            start_time: "09:00:00".parse().expect("bad time"),
            end_time: "10:00:00".parse().expect("bad time"),
            first_date: "2024-01-01".parse().expect("bad date"),
            last_date: "2024-01-29".parse().expect("bad date"),
        }
    }

    async fn seed(db: &Database) {
        db.upsert_class(&schedule()).await.expect("class failed");
        db.upsert_student(&Student {
            student_id: "ada".into(),
            name: "Ada".into(),
            embedding: Some(vec![0.0, 0.0, 0.0]),
        })
        .await
        .expect("student failed");
        db.enroll("cs101", "ada").await.expect("enroll failed");
    }

    fn cache_with_frame() -> FrameCache {
        let cache = FrameCache::new();
        cache.publish(Frame {
            image: DynamicImage::new_rgb8(4, 4),
            captured_at: Utc::now(),
        });
        cache
    }

    fn engine(db: Database, cache: FrameCache, detected: Vec<Embedding>) -> AttendanceEngine {
        AttendanceEngine::new(
            db,
            cache,
            Arc::new(StubEncoder { detected }),
            None,
            0.5,
            15,
        )
    }

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").expect("bad datetime")
    }

    #[tokio::test]
    async fn empty_cache_reports_no_frame() {
        let db = temp_db("noframe");
        seed(&db).await;
        let engine = engine(db, FrameCache::new(), vec![vec![0.0, 0.0, 0.0]]);

        let outcome = engine
            .attempt_attendance_at("cs101", at("2024-01-08 09:05:00"))
            .await
            .expect("attempt failed");
        assert_eq!(outcome, CaptureOutcome::NoFrame);
    }

    #[tokio::test]
    async fn unknown_class_is_a_distinct_outcome() {
        let db = temp_db("noclass");
        seed(&db).await;
        let engine = engine(db, cache_with_frame(), vec![vec![0.0, 0.0, 0.0]]);

        let outcome = engine
            .attempt_attendance_at("art200", at("2024-01-08 09:05:00"))
            .await
            .expect("attempt failed");
        assert_eq!(outcome, CaptureOutcome::ClassNotFound);
    }

    #[tokio::test]
    async fn no_detected_face_reports_no_face() {
        let db = temp_db("noface");
        seed(&db).await;
        let engine = engine(db, cache_with_frame(), vec![]);

        let outcome = engine
            .attempt_attendance_at("cs101", at("2024-01-08 09:05:00"))
            .await
            .expect("attempt failed");
        assert_eq!(outcome, CaptureOutcome::NoFace);
    }

    #[tokio::test]
    async fn far_face_reports_unknown() {
        let db = temp_db("unknown");
        seed(&db).await;
        let engine = engine(db, cache_with_frame(), vec![vec![10.0, 0.0, 0.0]]);

        let outcome = engine
            .attempt_attendance_at("cs101", at("2024-01-08 09:05:00"))
            .await
            .expect("attempt failed");
        assert!(matches!(outcome, CaptureOutcome::Unknown { .. }));
    }

    #[tokio::test]
    async fn recognized_but_unenrolled_student_is_not_recorded() {
        let db = temp_db("notinclass");
        seed(&db).await;
        db.upsert_student(&Student {
            student_id: "ben".into(),
            name: "Ben".into(),
            embedding: Some(vec![5.0, 5.0, 5.0]),
        })
        .await
        .expect("student failed");
        // Ben is not enrolled in cs101.
        let engine = engine(db.clone(), cache_with_frame(), vec![vec![5.0, 5.0, 5.0]]);

        let outcome = engine
            .attempt_attendance_at("cs101", at("2024-01-08 09:05:00"))
            .await
            .expect("attempt failed");
        assert_eq!(
            outcome,
            CaptureOutcome::NotInClass {
                student_id: "ben".into()
            }
        );
        assert!(db
            .get_attendance_for_class("cs101")
            .await
            .expect("query failed")
            .is_empty());
    }

    #[tokio::test]
    async fn on_time_capture_is_recorded() {
        let db = temp_db("ontime");
        seed(&db).await;
        let engine = engine(db.clone(), cache_with_frame(), vec![vec![0.0, 0.0, 0.0]]);

        let outcome = engine
            .attempt_attendance_at("cs101", at("2024-01-08 09:10:00"))
            .await
            .expect("attempt failed");
        match outcome {
            CaptureOutcome::Recorded {
                student_id,
                status,
                session_date,
                ..
            } => {
                assert_eq!(student_id, "ada");
                assert_eq!(status, AttendanceStatus::OnTime);
                assert_eq!(session_date, "2024-01-08".parse::<NaiveDate>().unwrap());
            }
            other => panic!("expected recorded, got {other:?}"),
        }

        let records = db
            .get_attendance_for_class("cs101")
            .await
            .expect("query failed");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn second_capture_same_date_updates_in_place() {
        let db = temp_db("idempotent");
        seed(&db).await;
        let engine = engine(db.clone(), cache_with_frame(), vec![vec![0.0, 0.0, 0.0]]);

        engine
            .attempt_attendance_at("cs101", at("2024-01-08 09:10:00"))
            .await
            .expect("first attempt failed");
        let outcome = engine
            .attempt_attendance_at("cs101", at("2024-01-08 09:40:00"))
            .await
            .expect("second attempt failed");

        assert!(matches!(
            outcome,
            CaptureOutcome::Recorded {
                status: AttendanceStatus::Late,
                ..
            }
        ));

        let records = db
            .get_attendance_for_class("cs101")
            .await
            .expect("query failed");
        assert_eq!(records.len(), 1, "same date must update, not duplicate");
        assert_eq!(records[0].status, AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn capture_on_off_day_resolves_to_nearest_session_date() {
        let db = temp_db("nearest");
        seed(&db).await;
        let engine = engine(db.clone(), cache_with_frame(), vec![vec![0.0, 0.0, 0.0]]);

        // Tuesday the 9th; nearest Monday is the 8th.
        let outcome = engine
            .attempt_attendance_at("cs101", at("2024-01-09 09:05:00"))
            .await
            .expect("attempt failed");
        match outcome {
            CaptureOutcome::Recorded { session_date, .. } => {
                assert_eq!(session_date, "2024-01-08".parse::<NaiveDate>().unwrap());
            }
            other => panic!("expected recorded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn class_with_no_held_sessions_is_rejected() {
        let db = temp_db("nosessions");
        seed(&db).await;
        let engine = engine(db, cache_with_frame(), vec![vec![0.0, 0.0, 0.0]]);

        // Before the first session date ever occurred.
        let outcome = engine
            .attempt_attendance_at("cs101", at("2023-12-20 09:05:00"))
            .await
            .expect("attempt failed");
        assert_eq!(outcome, CaptureOutcome::NoScheduledSessions);
    }

    #[tokio::test]
    async fn encoder_failure_surfaces_as_error() {
        let db = temp_db("encfail");
        seed(&db).await;
        let engine = AttendanceEngine::new(
            db,
            cache_with_frame(),
            Arc::new(FailingEncoder),
            None,
            0.5,
            15,
        );

        assert!(engine
            .attempt_attendance_at("cs101", at("2024-01-08 09:05:00"))
            .await
            .is_err());
    }

    #[test]
    fn grace_boundary_is_inclusive() {
        let start: NaiveTime = "09:00:00".parse().expect("bad time");
        let grace = Duration::minutes(15);

        assert_eq!(
            classify_arrival("09:15:00".parse().expect("bad time"), start, grace),
            AttendanceStatus::OnTime
        );
        assert_eq!(
            classify_arrival("09:15:01".parse().expect("bad time"), start, grace),
            AttendanceStatus::Late
        );
        assert_eq!(
            classify_arrival("08:00:00".parse().expect("bad time"), start, grace),
            AttendanceStatus::OnTime
        );
    }

    #[test]
    fn grace_crossing_midnight_counts_as_on_time() {
        let start: NaiveTime = "23:55:00".parse().expect("bad time");
        assert_eq!(
            classify_arrival(
                "00:05:00".parse().expect("bad time"),
                start,
                Duration::minutes(15)
            ),
            AttendanceStatus::OnTime
        );
    }
}
