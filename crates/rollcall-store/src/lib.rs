//! rollcall-store — SQLite implementation of [`RollcallStore`].
//!
//! One connection guarded by a mutex. Daily attendance uniqueness, email
//! uniqueness and course-title uniqueness are table constraints, so
//! concurrent writers cannot both succeed.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rollcall_core::{
    AttendanceRecord, AttendanceStatus, Course, Embedding, FaceProfile, Lesson, LessonResource,
    ProfileError, ResourceKind, RollcallStore, StoreError, User,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const USER_COLUMNS: &str =
    "id, name, email, role, date_of_birth, gender, profile_image, created_at";

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid database value: {0}")]
    InvalidDbValue(String),
    #[error("integer conversion overflow for field: {0}")]
    IntegerOverflow(&'static str),
}

impl SqliteStoreError {
    fn is_uniqueness_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    }
}

impl From<SqliteStoreError> for StoreError {
    fn from(e: SqliteStoreError) -> Self {
        if e.is_uniqueness_violation() {
            StoreError::Conflict(e.to_string())
        } else {
            tracing::warn!(error = %e, "sqlite store failure");
            StoreError::Backend(e.to_string())
        }
    }
}

type Result<T> = std::result::Result<T, SqliteStoreError>;

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::init(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> std::result::Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("connection mutex poisoned".into()))?;
        f(&conn).map_err(StoreError::from)
    }
}

impl RollcallStore for SqliteStore {
    fn user(&self, id: &str) -> std::result::Result<Option<User>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                read_user,
            )
            .optional()?
            .map(RawUser::decode)
            .transpose()
        })
    }

    fn user_by_email(&self, email: &str) -> std::result::Result<Option<User>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                read_user,
            )
            .optional()?
            .map(RawUser::decode)
            .transpose()
        })
    }

    fn insert_user(&self, user: &User) -> std::result::Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    user.id,
                    user.name,
                    user.email,
                    user.role.as_str(),
                    user.date_of_birth.map(|d| d.to_string()),
                    user.gender.as_str(),
                    user.profile_image,
                    encode_timestamp(user.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn update_user(&self, user: &User) -> std::result::Result<(), StoreError> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users
                 SET name = ?2, role = ?3, date_of_birth = ?4, gender = ?5, profile_image = ?6
                 WHERE id = ?1",
                params![
                    user.id,
                    user.name,
                    user.role.as_str(),
                    user.date_of_birth.map(|d| d.to_string()),
                    user.gender.as_str(),
                    user.profile_image,
                ],
            )?;
            if updated == 0 {
                return Err(SqliteStoreError::InvalidDbValue(format!(
                    "update of missing user {}",
                    user.id
                )));
            }
            Ok(())
        })
    }

    fn face_profile(&self, user_id: &str) -> std::result::Result<FaceProfile, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT dimension, vector FROM face_embeddings
                 WHERE user_id = ?1 ORDER BY position",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            let mut embeddings = Vec::new();
            for row in rows {
                let (dimension, blob) = row?;
                let dimension = usize::try_from(dimension)
                    .map_err(|_| SqliteStoreError::IntegerOverflow("face_embeddings.dimension"))?;
                embeddings.push(Embedding::new(decode_f32_blob(&blob, dimension)?));
            }
            FaceProfile::new(embeddings).map_err(|e: ProfileError| {
                SqliteStoreError::InvalidDbValue(format!("stored face profile: {e}"))
            })
        })
    }

    fn replace_face_profile(
        &self,
        user_id: &str,
        profile: &FaceProfile,
    ) -> std::result::Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM face_embeddings WHERE user_id = ?1", params![user_id])?;
            for (position, embedding) in profile.embeddings().iter().enumerate() {
                tx.execute(
                    "INSERT INTO face_embeddings (user_id, position, dimension, vector)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        user_id,
                        to_i64(position, "face_embeddings.position")?,
                        to_i64(embedding.dimension(), "face_embeddings.dimension")?,
                        encode_f32_blob(&embedding.values),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn attendance(&self, user_id: &str) -> std::result::Result<Vec<AttendanceRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT day, marked_at, status FROM attendance
                 WHERE user_id = ?1 ORDER BY day",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (day, marked_at, status) = row?;
                records.push(AttendanceRecord {
                    day: decode_date(&day)?,
                    marked_at: decode_timestamp(&marked_at)?,
                    status: status.parse::<AttendanceStatus>().map_err(SqliteStoreError::InvalidDbValue)?,
                });
            }
            Ok(records)
        })
    }

    fn append_attendance(
        &self,
        user_id: &str,
        record: &AttendanceRecord,
    ) -> std::result::Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO attendance (user_id, day, marked_at, status) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user_id,
                    record.day.to_string(),
                    encode_timestamp(record.marked_at),
                    record.status.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    fn course(&self, id: &str) -> std::result::Result<Option<Course>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, title, description FROM courses WHERE id = ?1",
                    params![id],
                    read_course,
                )
                .optional()?;
            row.map(|c| with_lesson_ids(conn, c)).transpose()
        })
    }

    fn course_by_title(&self, title: &str) -> std::result::Result<Option<Course>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, title, description FROM courses WHERE title = ?1",
                    params![title],
                    read_course,
                )
                .optional()?;
            row.map(|c| with_lesson_ids(conn, c)).transpose()
        })
    }

    fn insert_course(&self, course: &Course) -> std::result::Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO courses (id, title, description) VALUES (?1, ?2, ?3)",
                params![course.id, course.title, course.description],
            )?;
            Ok(())
        })
    }

    fn courses(&self) -> std::result::Result<Vec<Course>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, title, description FROM courses ORDER BY title")?;
            let rows = stmt
                .query_map([], read_course)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(|c| with_lesson_ids(conn, c)).collect()
        })
    }

    fn insert_lesson(&self, lesson: &Lesson) -> std::result::Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO lessons (id, course_id, position, title, description)
                 VALUES (?1, ?2,
                         (SELECT COALESCE(MAX(position) + 1, 0) FROM lessons WHERE course_id = ?2),
                         ?3, ?4)",
                params![lesson.id, lesson.course_id, lesson.title, lesson.description],
            )?;
            for (position, resource) in lesson.resources.iter().enumerate() {
                tx.execute(
                    "INSERT INTO lesson_resources (id, lesson_id, position, kind, url)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        resource.id,
                        lesson.id,
                        to_i64(position, "lesson_resources.position")?,
                        resource.kind.as_str(),
                        resource.url,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn lessons_for(&self, course_id: &str) -> std::result::Result<Vec<Lesson>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, description FROM lessons
                 WHERE course_id = ?1 ORDER BY position",
            )?;
            let rows = stmt
                .query_map(params![course_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut lessons = Vec::with_capacity(rows.len());
            for (id, title, description) in rows {
                let resources = resources_for(conn, &id)?;
                lessons.push(Lesson {
                    id,
                    course_id: course_id.to_string(),
                    title,
                    description,
                    resources,
                });
            }
            Ok(lessons)
        })
    }
}

/// Column values of a `users` row before domain decoding.
struct RawUser {
    id: String,
    name: String,
    email: String,
    role: String,
    date_of_birth: Option<String>,
    gender: String,
    profile_image: String,
    created_at: String,
}

impl RawUser {
    fn decode(self) -> Result<User> {
        Ok(User {
            id: self.id,
            name: self.name,
            email: self.email,
            role: self.role.parse().map_err(SqliteStoreError::InvalidDbValue)?,
            date_of_birth: self.date_of_birth.as_deref().map(decode_date).transpose()?,
            gender: self.gender.parse().map_err(SqliteStoreError::InvalidDbValue)?,
            profile_image: self.profile_image,
            created_at: decode_timestamp(&self.created_at)?,
        })
    }
}

fn read_user(row: &Row<'_>) -> rusqlite::Result<RawUser> {
    Ok(RawUser {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        date_of_birth: row.get(4)?,
        gender: row.get(5)?,
        profile_image: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn read_course(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        lessons: Vec::new(),
    })
}

fn with_lesson_ids(conn: &Connection, mut course: Course) -> Result<Course> {
    let mut stmt = conn.prepare("SELECT id FROM lessons WHERE course_id = ?1 ORDER BY position")?;
    course.lessons = stmt
        .query_map(params![course.id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(course)
}

fn resources_for(conn: &Connection, lesson_id: &str) -> Result<Vec<LessonResource>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, url FROM lesson_resources WHERE lesson_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![lesson_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, kind, url)| {
            Ok(LessonResource {
                id,
                kind: kind.parse::<ResourceKind>().map_err(SqliteStoreError::InvalidDbValue)?,
                url,
            })
        })
        .collect()
}

fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SqliteStoreError::InvalidDbValue(format!("timestamp {value:?}: {e}")))
}

fn decode_date(value: &str) -> Result<NaiveDate> {
    value
        .parse::<NaiveDate>()
        .map_err(|e| SqliteStoreError::InvalidDbValue(format!("date {value:?}: {e}")))
}

fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected_len = dimension
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or(SqliteStoreError::IntegerOverflow("embedding blob length"))?;
    if blob.len() != expected_len {
        return Err(SqliteStoreError::InvalidDbValue(format!(
            "invalid embedding byte length: expected {expected_len}, got {}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn to_i64(value: usize, field: &'static str) -> Result<i64> {
    i64::try_from(value).map_err(|_| SqliteStoreError::IntegerOverflow(field))
}
