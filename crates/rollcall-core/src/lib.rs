//! rollcall-core — Face-embedding attendance matching and learning-platform domain.
//!
//! Embeddings arrive pre-computed from an external client. This crate only
//! normalizes and compares them, gates attendance to one record per UTC day,
//! and models the users, courses and lessons the platform serves. Persistence
//! sits behind the [`RollcallStore`] trait.

pub mod attendance;
pub mod catalog;
pub mod matcher;
pub mod payload;
pub mod profile;
pub mod service;
pub mod store;
pub mod types;

pub use attendance::{AttendanceError, Confirmation};
pub use catalog::{CatalogError, Course, Lesson, LessonResource, NewLesson, ResourceKind};
pub use matcher::{EuclideanMatcher, MatchError, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use payload::{parse_embeddings, PayloadError};
pub use profile::{Gender, NewUser, ProfileError, ProfileUpdate, Role, User};
pub use service::RollcallService;
pub use store::{RollcallStore, StoreError};
pub use types::{AttendanceRecord, AttendanceStatus, Embedding, FaceProfile, MAX_PROFILE_EMBEDDINGS};
