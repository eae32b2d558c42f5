use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::oneshot;

mod migrations;

use crate::models::{
    embedding_from_bytes, embedding_to_bytes, AttendanceRecord, AttendanceStatus, ClassSchedule,
    Student,
};
use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| anyhow!("invalid date '{value}': {err}"))
}

fn date_to_string(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .map_err(|err| anyhow!("invalid time '{value}': {err}"))
}

fn time_to_string(value: NaiveTime) -> String {
    value.format("%H:%M:%S").to_string()
}

/// Weekdays are stored as 0 (Monday) through 6 (Sunday).
fn weekday_to_i64(weekday: Weekday) -> i64 {
    i64::from(weekday.num_days_from_monday())
}

fn weekday_from_i64(value: i64) -> Result<Weekday> {
    match value {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        _ => Err(anyhow!("invalid weekday index {value}")),
    }
}

fn status_from_str(value: &str) -> Result<AttendanceStatus> {
    match value {
        "on_time" => Ok(AttendanceStatus::OnTime),
        "late" => Ok(AttendanceStatus::Late),
        _ => Err(anyhow!("unknown attendance status '{value}'")),
    }
}

fn row_to_student(row: &Row<'_>) -> Result<Student> {
    let blob: Option<Vec<u8>> = row.get(2)?;
    Ok(Student {
        student_id: row.get(0)?,
        name: row.get(1)?,
        embedding: blob.as_deref().map(embedding_from_bytes).transpose()?,
    })
}

fn row_to_class(row: &Row<'_>) -> Result<ClassSchedule> {
    Ok(ClassSchedule {
        class_id: row.get(0)?,
        name: row.get(1)?,
        weekday: weekday_from_i64(row.get(2)?)?,
        start_time: parse_time(&row.get::<_, String>(3)?)?,
        end_time: parse_time(&row.get::<_, String>(4)?)?,
        first_date: parse_date(&row.get::<_, String>(5)?)?,
        last_date: parse_date(&row.get::<_, String>(6)?)?,
    })
}

fn row_to_attendance(row: &Row<'_>) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        class_id: row.get(0)?,
        student_id: row.get(1)?,
        session_date: parse_date(&row.get::<_, String>(2)?)?,
        status: status_from_str(&row.get::<_, String>(3)?)?,
        recorded_at: parse_datetime(&row.get::<_, String>(4)?)?,
    })
}

/// Handle to the SQLite store.
///
/// A dedicated worker thread owns the connection; callers ship closures to
/// it over a channel and await the result on a oneshot. Serializing all
/// access through one thread makes every read-modify-write atomic per call.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("rollcall-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Creates or replaces a student row; enrollment photos may arrive later,
    /// so the embedding is optional.
    pub async fn upsert_student(&self, student: &Student) -> Result<()> {
        let record = student.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO students (student_id, name, embedding)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(student_id)
                 DO UPDATE SET name = excluded.name, embedding = excluded.embedding",
                params![
                    record.student_id,
                    record.name,
                    record.embedding.as_deref().map(embedding_to_bytes),
                ],
            )
            .with_context(|| "failed to upsert student")?;
            Ok(())
        })
        .await
    }

    /// All students that can participate in matching, i.e. those with a
    /// captured embedding.
    pub async fn get_students_with_embeddings(&self) -> Result<Vec<Student>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT student_id, name, embedding FROM students
                 WHERE embedding IS NOT NULL
                 ORDER BY student_id",
            )?;

            let mut rows = stmt.query([])?;
            let mut students = Vec::new();
            while let Some(row) = rows.next()? {
                students.push(row_to_student(row)?);
            }
            Ok(students)
        })
        .await
    }

    pub async fn upsert_class(&self, schedule: &ClassSchedule) -> Result<()> {
        schedule.validate()?;
        let record = schedule.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO classes (class_id, name, weekday, start_time, end_time, first_date, last_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(class_id)
                 DO UPDATE SET name = excluded.name,
                               weekday = excluded.weekday,
                               start_time = excluded.start_time,
                               end_time = excluded.end_time,
                               first_date = excluded.first_date,
                               last_date = excluded.last_date",
                params![
                    record.class_id,
                    record.name,
                    weekday_to_i64(record.weekday),
                    time_to_string(record.start_time),
                    time_to_string(record.end_time),
                    date_to_string(record.first_date),
                    date_to_string(record.last_date),
                ],
            )
            .with_context(|| "failed to upsert class")?;
            Ok(())
        })
        .await
    }

    pub async fn get_class(&self, class_id: &str) -> Result<Option<ClassSchedule>> {
        let class_id = class_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT class_id, name, weekday, start_time, end_time, first_date, last_date
                 FROM classes
                 WHERE class_id = ?1",
            )?;

            let mut rows = stmt.query(params![class_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_class(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn enroll(&self, class_id: &str, student_id: &str) -> Result<()> {
        let class_id = class_id.to_string();
        let student_id = student_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO enrollments (class_id, student_id) VALUES (?1, ?2)",
                params![class_id, student_id],
            )
            .with_context(|| "failed to insert enrollment")?;
            Ok(())
        })
        .await
    }

    pub async fn is_enrolled(&self, class_id: &str, student_id: &str) -> Result<bool> {
        let class_id = class_id.to_string();
        let student_id = student_id.to_string();
        self.execute(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM enrollments WHERE class_id = ?1 AND student_id = ?2",
                    params![class_id, student_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    /// Students enrolled in one class, embeddings included. Read by the
    /// rate/matrix consumers; the matcher compares against the whole student
    /// body so an off-roster face can still be rejected by name.
    pub async fn get_class_roster(&self, class_id: &str) -> Result<Vec<Student>> {
        let class_id = class_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.student_id, s.name, s.embedding
                 FROM students s
                 JOIN enrollments e ON e.student_id = s.student_id
                 WHERE e.class_id = ?1
                 ORDER BY s.student_id",
            )?;

            let mut rows = stmt.query(params![class_id])?;
            let mut students = Vec::new();
            while let Some(row) = rows.next()? {
                students.push(row_to_student(row)?);
            }
            Ok(students)
        })
        .await
    }

    /// Atomic attendance upsert keyed by (class, student, session date).
    ///
    /// A second capture on the same date overwrites status and timestamp;
    /// the composite primary key guarantees a single row per key without a
    /// separate read-then-write step.
    pub async fn upsert_attendance(&self, record: &AttendanceRecord) -> Result<()> {
        if !record.status.is_present() {
            bail!("absent is implicit and never written to the store");
        }

        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO attendance (class_id, student_id, session_date, status, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(class_id, student_id, session_date)
                 DO UPDATE SET status = excluded.status, recorded_at = excluded.recorded_at",
                params![
                    record.class_id,
                    record.student_id,
                    date_to_string(record.session_date),
                    record.status.as_str(),
                    record.recorded_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert attendance record")?;
            Ok(())
        })
        .await
    }

    pub async fn get_attendance_for_class(&self, class_id: &str) -> Result<Vec<AttendanceRecord>> {
        let class_id = class_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT class_id, student_id, session_date, status, recorded_at
                 FROM attendance
                 WHERE class_id = ?1
                 ORDER BY session_date, student_id",
            )?;

            let mut rows = stmt.query(params![class_id])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_attendance(row)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn get_attendance_for_student(
        &self,
        class_id: &str,
        student_id: &str,
    ) -> Result<Vec<AttendanceRecord>> {
        let class_id = class_id.to_string();
        let student_id = student_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT class_id, student_id, session_date, status, recorded_at
                 FROM attendance
                 WHERE class_id = ?1 AND student_id = ?2
                 ORDER BY session_date",
            )?;

            let mut rows = stmt.query(params![class_id, student_id])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_attendance(row)?);
            }
            Ok(records)
        })
        .await
    }
}
