//! Daily attendance gating.
//!
//! Day boundaries are UTC midnight regardless of the host timezone.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::matcher::MatchError;
use crate::payload::PayloadError;
use crate::store::StoreError;
use crate::types::AttendanceRecord;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user has no registered face embeddings")]
    NoStoredEmbeddings,
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("face not recognized; attendance not marked")]
    NotRecognized,
    #[error("attendance already marked for today")]
    AlreadyMarkedToday,
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl AttendanceError {
    /// Whether this is a server-side failure rather than a caller-facing outcome.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(StoreError::Backend(_)))
    }
}

impl From<MatchError> for AttendanceError {
    fn from(e: MatchError) -> Self {
        match e {
            MatchError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
        }
    }
}

impl From<PayloadError> for AttendanceError {
    fn from(e: PayloadError) -> Self {
        Self::MalformedInput(e.0)
    }
}

/// Successful attendance mark.
#[derive(Debug, Clone, Serialize)]
pub struct Confirmation {
    pub user_id: String,
    pub record: AttendanceRecord,
    /// Closest candidate-to-reference distance seen while matching.
    pub distance: Option<f32>,
}

/// Decide whether a new record may be written.
///
/// Returns the record to append, or the reason none is written.
pub fn gate(
    matched: bool,
    history: &[AttendanceRecord],
    now: DateTime<Utc>,
) -> Result<AttendanceRecord, AttendanceError> {
    if !matched {
        return Err(AttendanceError::NotRecognized);
    }
    let today = now.date_naive();
    if history.iter().any(|r| r.day == today) {
        return Err(AttendanceError::AlreadyMarkedToday);
    }
    Ok(AttendanceRecord::present(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttendanceStatus;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_no_match_is_rejected() {
        assert!(matches!(
            gate(false, &[], at(2025, 1, 10, 9)),
            Err(AttendanceError::NotRecognized)
        ));
    }

    #[test]
    fn test_first_mark_of_day_is_present() {
        let now = at(2025, 1, 10, 9);
        let record = gate(true, &[], now).unwrap();
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.marked_at, now);
    }

    #[test]
    fn test_same_utc_day_is_duplicate() {
        let history = vec![AttendanceRecord::present(at(2025, 1, 10, 0))];
        assert!(matches!(
            gate(true, &history, at(2025, 1, 10, 23)),
            Err(AttendanceError::AlreadyMarkedToday)
        ));
    }

    #[test]
    fn test_next_utc_day_is_allowed() {
        let history = vec![AttendanceRecord::present(at(2025, 1, 10, 23))];
        assert!(gate(true, &history, at(2025, 1, 11, 0)).is_ok());
    }

    #[test]
    fn test_absent_record_still_blocks_the_day() {
        let mut absent = AttendanceRecord::present(at(2025, 1, 10, 8));
        absent.status = AttendanceStatus::Absent;
        assert!(matches!(
            gate(true, &[absent], at(2025, 1, 10, 12)),
            Err(AttendanceError::AlreadyMarkedToday)
        ));
    }

    #[test]
    fn test_only_backend_failures_are_internal() {
        assert!(AttendanceError::Storage(StoreError::Backend("down".into())).is_internal());
        assert!(!AttendanceError::NotRecognized.is_internal());
        assert!(!AttendanceError::AlreadyMarkedToday.is_internal());
    }
}
