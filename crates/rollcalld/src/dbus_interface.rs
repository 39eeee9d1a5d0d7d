use std::sync::Arc;

use rollcall_core::{
    AttendanceError, CatalogError, NewLesson, NewUser, ProfileError, ProfileUpdate,
    RollcallService, StoreError,
};
use rollcall_store::SqliteStore;
use serde::Serialize;
use zbus::{interface, DBusError};

use crate::config::Config;

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

type Service = RollcallService<SqliteStore>;

/// Errors returned over D-Bus, one error name per outcome so clients can
/// tell a rejected face from a broken server.
#[derive(Debug, DBusError)]
#[zbus(prefix = "org.rollcall.Rollcall1.Error")]
pub enum RollcallError {
    #[zbus(error)]
    ZBus(zbus::Error),
    UserNotFound(String),
    NoStoredEmbeddings(String),
    MalformedInput(String),
    DimensionMismatch(String),
    NotRecognized(String),
    AlreadyMarkedToday(String),
    TooManyEmbeddings(String),
    InvalidField(String),
    EmailTaken(String),
    CourseExists(String),
    CourseNotFound(String),
    Internal(String),
}

fn storage(e: StoreError) -> RollcallError {
    match e {
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "storage failure");
            RollcallError::Internal("storage unavailable".into())
        }
        StoreError::Conflict(msg) => RollcallError::Internal(format!("unexpected conflict: {msg}")),
    }
}

impl From<AttendanceError> for RollcallError {
    fn from(e: AttendanceError) -> Self {
        let msg = e.to_string();
        match e {
            AttendanceError::UserNotFound(_) => Self::UserNotFound(msg),
            AttendanceError::NoStoredEmbeddings => Self::NoStoredEmbeddings(msg),
            AttendanceError::MalformedInput(_) => Self::MalformedInput(msg),
            AttendanceError::DimensionMismatch { .. } => Self::DimensionMismatch(msg),
            AttendanceError::NotRecognized => Self::NotRecognized(msg),
            AttendanceError::AlreadyMarkedToday => Self::AlreadyMarkedToday(msg),
            AttendanceError::Storage(e) => storage(e),
        }
    }
}

impl From<ProfileError> for RollcallError {
    fn from(e: ProfileError) -> Self {
        let msg = e.to_string();
        match e {
            ProfileError::UserNotFound(_) => Self::UserNotFound(msg),
            ProfileError::TooManyEmbeddings { .. } => Self::TooManyEmbeddings(msg),
            ProfileError::MalformedInput(_) => Self::MalformedInput(msg),
            ProfileError::InvalidField { .. } => Self::InvalidField(msg),
            ProfileError::EmailTaken(_) => Self::EmailTaken(msg),
            ProfileError::Storage(e) => storage(e),
        }
    }
}

impl From<CatalogError> for RollcallError {
    fn from(e: CatalogError) -> Self {
        let msg = e.to_string();
        match e {
            CatalogError::CourseExists(_) => Self::CourseExists(msg),
            CatalogError::CourseNotFound(_) => Self::CourseNotFound(msg),
            CatalogError::InvalidField { .. } => Self::InvalidField(msg),
            CatalogError::Storage(e) => storage(e),
        }
    }
}

/// D-Bus interface for the Rollcall daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// The `user` argument is the caller's authenticated identity; the bus
/// policy decides who may call which method.
pub struct RollcallInterface {
    service: Arc<Service>,
    config: Config,
}

impl RollcallInterface {
    pub fn new(service: Arc<Service>, config: Config) -> Self {
        Self { service, config }
    }

    /// Run a store-touching call on the blocking pool.
    async fn run_blocking<T, E, F>(&self, f: F) -> Result<T, RollcallError>
    where
        F: FnOnce(&Service) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<RollcallError> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| RollcallError::Internal(format!("worker task failed: {e}")))?
            .map_err(Into::into)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, RollcallError> {
    serde_json::to_string(value).map_err(|e| RollcallError::Internal(format!("encode reply: {e}")))
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallInterface {
    /// Register a user from a JSON registration request. Returns the new user id.
    async fn register_user(&self, user: &str) -> Result<String, RollcallError> {
        let new_user: NewUser = serde_json::from_str(user)
            .map_err(|e| RollcallError::MalformedInput(format!("registration: {e}")))?;
        let user = self.run_blocking(move |svc| svc.register_user(new_user)).await?;
        tracing::debug!(user = %user.id, "register_user served");
        Ok(user.id)
    }

    /// Fetch a user as JSON.
    async fn get_user(&self, user: &str) -> Result<String, RollcallError> {
        let user = user.to_string();
        let found = self.run_blocking(move |svc| svc.user(&user)).await?;
        to_json(&found)
    }

    /// Apply a partial profile edit given as JSON. Returns the updated user as JSON.
    async fn update_profile(&self, user: &str, update: &str) -> Result<String, RollcallError> {
        tracing::info!(user, "update_profile requested");
        let update: ProfileUpdate = serde_json::from_str(update)
            .map_err(|e| RollcallError::MalformedInput(format!("profile update: {e}")))?;
        let user = user.to_string();
        let updated = self
            .run_blocking(move |svc| svc.update_profile(&user, update))
            .await?;
        to_json(&updated)
    }

    /// Replace the stored face embeddings wholesale. Returns how many are now stored.
    async fn replace_face_profile(&self, user: &str, embeddings: &str) -> Result<u32, RollcallError> {
        tracing::info!(user, "replace_face_profile requested");
        let (user, embeddings) = (user.to_string(), embeddings.to_string());
        let profile = self
            .run_blocking(move |svc| svc.replace_face_profile(&user, &embeddings))
            .await?;
        Ok(profile.len() as u32)
    }

    /// Mark today's attendance from freshly captured embeddings.
    /// Returns the confirmation as JSON.
    async fn mark_attendance(&self, user: &str, embeddings: &str) -> Result<String, RollcallError> {
        tracing::info!(user, "mark_attendance requested");
        let (user, embeddings) = (user.to_string(), embeddings.to_string());
        let confirmation = self
            .run_blocking(move |svc| svc.try_mark_attendance(&user, &embeddings))
            .await?;
        to_json(&confirmation)
    }

    /// Attendance records for a user as a JSON array.
    async fn attendance_history(&self, user: &str) -> Result<String, RollcallError> {
        let user = user.to_string();
        let records = self.run_blocking(move |svc| svc.attendance_history(&user)).await?;
        to_json(&records)
    }

    /// Create a course. Returns it as JSON.
    async fn add_course(&self, title: &str, description: &str) -> Result<String, RollcallError> {
        tracing::info!(title, "add_course requested");
        let (title, description) = (title.to_string(), description.to_string());
        let course = self
            .run_blocking(move |svc| svc.add_course(&title, &description))
            .await?;
        to_json(&course)
    }

    /// Attach a lesson to a course. Empty URL arguments mean "no resource".
    async fn add_lesson(
        &self,
        course: &str,
        title: &str,
        description: &str,
        video_url: &str,
        pdf_url: &str,
    ) -> Result<String, RollcallError> {
        tracing::info!(course, title, "add_lesson requested");
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let new_lesson = NewLesson {
            course_id: course.to_string(),
            title: title.to_string(),
            description: non_empty(description),
            video_url: non_empty(video_url),
            pdf_url: non_empty(pdf_url),
        };
        let lesson = self.run_blocking(move |svc| svc.add_lesson(new_lesson)).await?;
        to_json(&lesson)
    }

    /// All courses as a JSON array.
    async fn list_courses(&self) -> Result<String, RollcallError> {
        let courses = self.run_blocking(|svc| svc.courses()).await?;
        to_json(&courses)
    }

    /// Lessons of one course as a JSON array.
    async fn list_lessons(&self, course: &str) -> Result<String, RollcallError> {
        let course = course.to_string();
        let lessons = self.run_blocking(move |svc| svc.lessons_for(&course)).await?;
        to_json(&lessons)
    }

    /// Return daemon status information.
    async fn status(&self) -> Result<String, RollcallError> {
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": self.config.db_path.display().to_string(),
            "match_threshold": self.service.threshold(),
            "bus": self.config.bus.as_str(),
        }))
    }
}
