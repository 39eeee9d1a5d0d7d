//! Persistence boundary.
//!
//! Implementations own uniqueness: a second attendance row for the same
//! (user, day), a duplicate email, or a duplicate course title must be
//! rejected with [`StoreError::Conflict`] even under concurrent writers.

use crate::catalog::{Course, Lesson};
use crate::profile::User;
use crate::types::{AttendanceRecord, FaceProfile};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("uniqueness conflict: {0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Backend(String),
}

pub trait RollcallStore {
    fn user(&self, id: &str) -> Result<Option<User>, StoreError>;
    fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    fn update_user(&self, user: &User) -> Result<(), StoreError>;

    fn face_profile(&self, user_id: &str) -> Result<FaceProfile, StoreError>;
    /// Atomically swap the user's whole reference set for `profile`.
    fn replace_face_profile(&self, user_id: &str, profile: &FaceProfile) -> Result<(), StoreError>;

    fn attendance(&self, user_id: &str) -> Result<Vec<AttendanceRecord>, StoreError>;
    fn append_attendance(&self, user_id: &str, record: &AttendanceRecord) -> Result<(), StoreError>;

    fn course(&self, id: &str) -> Result<Option<Course>, StoreError>;
    fn course_by_title(&self, title: &str) -> Result<Option<Course>, StoreError>;
    fn insert_course(&self, course: &Course) -> Result<(), StoreError>;
    fn courses(&self) -> Result<Vec<Course>, StoreError>;
    /// Persist `lesson` and append its id to the owning course's lesson list.
    fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StoreError>;
    fn lessons_for(&self, course_id: &str) -> Result<Vec<Lesson>, StoreError>;
}
