//! Request-level operations over a [`RollcallStore`].
//!
//! Every call is synchronous and touches one user's (or one course's) data.
//! The service holds no mutable state of its own.

use chrono::{DateTime, Utc};

use crate::attendance::{self, AttendanceError, Confirmation};
use crate::catalog::{CatalogError, Course, Lesson, NewLesson};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::payload::parse_embeddings;
use crate::profile::{NewUser, ProfileError, ProfileUpdate, User};
use crate::store::{RollcallStore, StoreError};
use crate::types::{AttendanceRecord, FaceProfile};

pub struct RollcallService<S> {
    store: S,
    threshold: f32,
}

impl<S: RollcallStore> RollcallService<S> {
    pub fn new(store: S, threshold: f32) -> Self {
        Self { store, threshold }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    // --- users ---

    pub fn register_user(&self, new_user: NewUser) -> Result<User, ProfileError> {
        let user = new_user.into_user(Utc::now())?;
        if self.store.user_by_email(&user.email)?.is_some() {
            return Err(ProfileError::EmailTaken(user.email));
        }
        match self.store.insert_user(&user) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(ProfileError::EmailTaken(user.email)),
            Err(e) => return Err(e.into()),
        }
        tracing::info!(user = %user.id, role = user.role.as_str(), "user registered");
        Ok(user)
    }

    pub fn user(&self, user_id: &str) -> Result<User, ProfileError> {
        self.store
            .user(user_id)?
            .ok_or_else(|| ProfileError::UserNotFound(user_id.to_string()))
    }

    pub fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<User, ProfileError> {
        let mut user = self.user(user_id)?;
        update.apply(&mut user);
        self.store.update_user(&user)?;
        tracing::info!(user = %user_id, "profile updated");
        Ok(user)
    }

    /// Replace the user's whole face profile with the embeddings in `payload`.
    ///
    /// An empty array clears the profile.
    pub fn replace_face_profile(&self, user_id: &str, payload: &str) -> Result<FaceProfile, ProfileError> {
        self.user(user_id)?;
        let profile = FaceProfile::new(parse_embeddings(payload)?)?;
        self.store.replace_face_profile(user_id, &profile)?;
        tracing::info!(
            user = %user_id,
            count = profile.len(),
            dimension = ?profile.dimension(),
            "face profile replaced"
        );
        Ok(profile)
    }

    // --- attendance ---

    /// Mark today's attendance if any submitted embedding matches the stored profile.
    pub fn try_mark_attendance(&self, user_id: &str, payload: &str) -> Result<Confirmation, AttendanceError> {
        self.try_mark_attendance_at(user_id, payload, Utc::now())
    }

    /// As [`try_mark_attendance`](Self::try_mark_attendance) with an explicit clock.
    pub fn try_mark_attendance_at(
        &self,
        user_id: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Confirmation, AttendanceError> {
        if self.store.user(user_id)?.is_none() {
            return Err(AttendanceError::UserNotFound(user_id.to_string()));
        }

        let profile = self.store.face_profile(user_id)?;
        if !profile.has_embeddings() {
            return Err(AttendanceError::NoStoredEmbeddings);
        }

        let candidates = parse_embeddings(payload)?;
        let result = EuclideanMatcher.compare(&candidates, profile.embeddings(), self.threshold)?;
        tracing::debug!(
            user = %user_id,
            candidates = candidates.len(),
            references = profile.len(),
            matched = result.matched,
            distance = ?result.distance,
            "match evaluated"
        );

        let history = self.store.attendance(user_id)?;
        let record = match attendance::gate(result.matched, &history, now) {
            Ok(record) => record,
            Err(e) => {
                tracing::info!(user = %user_id, reason = %e, "attendance rejected");
                return Err(e);
            }
        };

        match self.store.append_attendance(user_id, &record) {
            Ok(()) => {}
            // A concurrent submission won the race for today's row.
            Err(StoreError::Conflict(_)) => return Err(AttendanceError::AlreadyMarkedToday),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user = %user_id, day = %record.day, "attendance marked");
        Ok(Confirmation {
            user_id: user_id.to_string(),
            record,
            distance: result.distance,
        })
    }

    pub fn attendance_history(&self, user_id: &str) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        if self.store.user(user_id)?.is_none() {
            return Err(AttendanceError::UserNotFound(user_id.to_string()));
        }
        Ok(self.store.attendance(user_id)?)
    }

    // --- catalog ---

    pub fn add_course(&self, title: &str, description: &str) -> Result<Course, CatalogError> {
        let course = Course::new(title, description)?;
        if self.store.course_by_title(&course.title)?.is_some() {
            return Err(CatalogError::CourseExists(course.title));
        }
        match self.store.insert_course(&course) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(CatalogError::CourseExists(course.title)),
            Err(e) => return Err(e.into()),
        }
        tracing::info!(course = %course.id, title = %course.title, "course added");
        Ok(course)
    }

    pub fn add_lesson(&self, new_lesson: NewLesson) -> Result<Lesson, CatalogError> {
        let lesson = new_lesson.into_lesson()?;
        if self.store.course(&lesson.course_id)?.is_none() {
            return Err(CatalogError::CourseNotFound(lesson.course_id));
        }
        self.store.insert_lesson(&lesson)?;
        tracing::info!(
            course = %lesson.course_id,
            lesson = %lesson.id,
            resources = lesson.resources.len(),
            "lesson added"
        );
        Ok(lesson)
    }

    pub fn courses(&self) -> Result<Vec<Course>, CatalogError> {
        Ok(self.store.courses()?)
    }

    pub fn lessons_for(&self, course_id: &str) -> Result<Vec<Lesson>, CatalogError> {
        if self.store.course(course_id)?.is_none() {
            return Err(CatalogError::CourseNotFound(course_id.to_string()));
        }
        Ok(self.store.lessons_for(course_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::DEFAULT_MATCH_THRESHOLD;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        users: HashMap<String, User>,
        profiles: HashMap<String, FaceProfile>,
        attendance: HashMap<String, Vec<AttendanceRecord>>,
        courses: Vec<Course>,
        lessons: Vec<Lesson>,
    }

    /// In-memory store; `racing_day` simulates another writer having
    /// already inserted today's row between read and append.
    #[derive(Default)]
    struct MemoryStore {
        inner: Mutex<Inner>,
        racing_day: bool,
        down: bool,
    }

    impl MemoryStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.down {
                return Err(StoreError::Backend("database is locked".into()));
            }
            Ok(())
        }
    }

    impl RollcallStore for MemoryStore {
        fn user(&self, id: &str) -> Result<Option<User>, StoreError> {
            self.check()?;
            Ok(self.inner.lock().unwrap().users.get(id).cloned())
        }

        fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.users.values().find(|u| u.email == email).cloned())
        }

        fn insert_user(&self, user: &User) -> Result<(), StoreError> {
            self.inner.lock().unwrap().users.insert(user.id.clone(), user.clone());
            Ok(())
        }

        fn update_user(&self, user: &User) -> Result<(), StoreError> {
            self.insert_user(user)
        }

        fn face_profile(&self, user_id: &str) -> Result<FaceProfile, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.profiles.get(user_id).cloned().unwrap_or_default())
        }

        fn replace_face_profile(&self, user_id: &str, profile: &FaceProfile) -> Result<(), StoreError> {
            let mut inner = self.inner.lock().unwrap();
            inner.profiles.insert(user_id.to_string(), profile.clone());
            Ok(())
        }

        fn attendance(&self, user_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.attendance.get(user_id).cloned().unwrap_or_default())
        }

        fn append_attendance(&self, user_id: &str, record: &AttendanceRecord) -> Result<(), StoreError> {
            if self.racing_day {
                return Err(StoreError::Conflict("attendance.user_id, attendance.day".into()));
            }
            let mut inner = self.inner.lock().unwrap();
            let rows = inner.attendance.entry(user_id.to_string()).or_default();
            if rows.iter().any(|r| r.day == record.day) {
                return Err(StoreError::Conflict("attendance.user_id, attendance.day".into()));
            }
            rows.push(record.clone());
            Ok(())
        }

        fn course(&self, id: &str) -> Result<Option<Course>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.courses.iter().find(|c| c.id == id).cloned())
        }

        fn course_by_title(&self, title: &str) -> Result<Option<Course>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.courses.iter().find(|c| c.title == title).cloned())
        }

        fn insert_course(&self, course: &Course) -> Result<(), StoreError> {
            self.inner.lock().unwrap().courses.push(course.clone());
            Ok(())
        }

        fn courses(&self) -> Result<Vec<Course>, StoreError> {
            Ok(self.inner.lock().unwrap().courses.clone())
        }

        fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StoreError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(c) = inner.courses.iter_mut().find(|c| c.id == lesson.course_id) {
                c.lessons.push(lesson.id.clone());
            }
            inner.lessons.push(lesson.clone());
            Ok(())
        }

        fn lessons_for(&self, course_id: &str) -> Result<Vec<Lesson>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.lessons.iter().filter(|l| l.course_id == course_id).cloned().collect())
        }
    }

    fn service(store: MemoryStore) -> RollcallService<MemoryStore> {
        RollcallService::new(store, DEFAULT_MATCH_THRESHOLD)
    }

    fn enrolled(svc: &RollcallService<MemoryStore>, embeddings: &str) -> String {
        let user = svc
            .register_user(NewUser {
                name: "Ada".into(),
                email: "ada@example.org".into(),
                ..Default::default()
            })
            .unwrap();
        svc.replace_face_profile(&user.id, embeddings).unwrap();
        user.id
    }

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_match_marks_attendance() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0]]");

        let confirmation = svc.try_mark_attendance_at(&id, "[[0.99, 0.01]]", noon(3)).unwrap();
        assert_eq!(confirmation.user_id, id);
        assert_eq!(confirmation.record.marked_at, noon(3));
        assert_eq!(svc.attendance_history(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_second_mark_same_day_is_rejected() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0]]");

        svc.try_mark_attendance_at(&id, "[[1, 0]]", noon(3)).unwrap();
        let err = svc.try_mark_attendance_at(&id, "[[1, 0]]", noon(3)).unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyMarkedToday));
        assert_eq!(svc.attendance_history(&id).unwrap().len(), 1);

        svc.try_mark_attendance_at(&id, "[[1, 0]]", noon(4)).unwrap();
        assert_eq!(svc.attendance_history(&id).unwrap().len(), 2);
    }

    #[test]
    fn test_orthogonal_face_not_recognized() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0]]");
        let err = svc.try_mark_attendance_at(&id, "[[0, 1]]", noon(3)).unwrap_err();
        assert!(matches!(err, AttendanceError::NotRecognized));
        assert!(svc.attendance_history(&id).unwrap().is_empty());
    }

    #[test]
    fn test_empty_candidates_not_recognized() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0], [0, 1]]");
        let err = svc.try_mark_attendance_at(&id, "[]", noon(3)).unwrap_err();
        assert!(matches!(err, AttendanceError::NotRecognized));
    }

    #[test]
    fn test_no_profile_is_reported_before_parsing() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[]");
        let err = svc.try_mark_attendance_at(&id, "garbage", noon(3)).unwrap_err();
        assert!(matches!(err, AttendanceError::NoStoredEmbeddings));
    }

    #[test]
    fn test_malformed_payload() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0]]");
        let err = svc.try_mark_attendance_at(&id, "{\"embeddings\": 1}", noon(3)).unwrap_err();
        assert!(matches!(err, AttendanceError::MalformedInput(_)));
    }

    #[test]
    fn test_extreme_magnitudes_still_match() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0]]");
        svc.try_mark_attendance_at(&id, "[[1e20, 0]]", noon(3)).unwrap();
        svc.try_mark_attendance_at(&id, "[[1e-30, 0]]", noon(4)).unwrap();

        let err = svc.try_mark_attendance_at(&id, "[[1e-50, 0]]", noon(5)).unwrap_err();
        assert!(matches!(err, AttendanceError::MalformedInput(_)));
        assert_eq!(svc.attendance_history(&id).unwrap().len(), 2);
    }

    #[test]
    fn test_dimension_mismatch() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0]]");
        let err = svc.try_mark_attendance_at(&id, "[[1, 0, 0]]", noon(3)).unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::DimensionMismatch { expected: 2, actual: 3 }
        ));
    }

    #[test]
    fn test_unknown_user() {
        let svc = service(MemoryStore::default());
        let err = svc.try_mark_attendance_at("nobody", "[[1, 0]]", noon(3)).unwrap_err();
        assert!(matches!(err, AttendanceError::UserNotFound(_)));
    }

    #[test]
    fn test_store_conflict_maps_to_duplicate() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0]]");
        let svc = RollcallService::new(
            MemoryStore {
                inner: Mutex::new(std::mem::take(&mut *svc.store().inner.lock().unwrap())),
                racing_day: true,
                down: false,
            },
            DEFAULT_MATCH_THRESHOLD,
        );
        let err = svc.try_mark_attendance_at(&id, "[[1, 0]]", noon(3)).unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyMarkedToday));
    }

    #[test]
    fn test_backend_failure_is_internal() {
        let svc = service(MemoryStore {
            down: true,
            ..Default::default()
        });
        let err = svc.try_mark_attendance_at("u", "[[1, 0]]", noon(3)).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_replace_profile_is_wholesale() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[[1, 0], [0, 1]]");
        svc.replace_face_profile(&id, "[[0, 0, 1]]").unwrap();
        let profile = svc.store().face_profile(&id).unwrap();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile.dimension(), Some(3));
    }

    #[test]
    fn test_replace_profile_caps_at_ten() {
        let svc = service(MemoryStore::default());
        let id = enrolled(&svc, "[]");
        let eleven = format!("[{}]", vec!["[1, 0]"; 11].join(","));
        let err = svc.replace_face_profile(&id, &eleven).unwrap_err();
        assert!(matches!(err, ProfileError::TooManyEmbeddings { count: 11, .. }));
        assert!(!svc.store().face_profile(&id).unwrap().has_embeddings());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let svc = service(MemoryStore::default());
        enrolled(&svc, "[]");
        let err = svc
            .register_user(NewUser {
                name: "Other".into(),
                email: "ada@example.org".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ProfileError::EmailTaken(_)));
    }

    #[test]
    fn test_course_and_lessons() {
        let svc = service(MemoryStore::default());
        let course = svc.add_course("Physics", "Mechanics and waves").unwrap();
        assert!(matches!(
            svc.add_course(" Physics ", "again"),
            Err(CatalogError::CourseExists(_))
        ));

        let lesson = svc
            .add_lesson(NewLesson {
                course_id: course.id.clone(),
                title: "Kinematics".into(),
                video_url: Some("https://video.example/k".into()),
                ..Default::default()
            })
            .unwrap();

        let stored = svc.store().course(&course.id).unwrap().unwrap();
        assert_eq!(stored.lessons, vec![lesson.id.clone()]);
        assert_eq!(svc.lessons_for(&course.id).unwrap(), vec![lesson]);
    }

    #[test]
    fn test_lesson_for_unknown_course() {
        let svc = service(MemoryStore::default());
        let err = svc
            .add_lesson(NewLesson {
                course_id: "missing".into(),
                title: "Kinematics".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CatalogError::CourseNotFound(_)));
    }
}
