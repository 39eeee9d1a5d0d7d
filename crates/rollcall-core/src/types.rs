use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::ProfileError;

/// Upper bound on reference embeddings stored per user.
pub const MAX_PROFILE_EMBEDDINGS: usize = 10;

/// Face embedding vector produced by an external model.
///
/// Serializes as a bare JSON array of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) norm, accumulated in `f64` so squares of very large
    /// or very small components neither overflow nor flush to zero.
    fn norm_f64(&self) -> f64 {
        self.values
            .iter()
            .map(|&x| f64::from(x).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.norm_f64() as f32
    }

    /// Rescale to unit length.
    ///
    /// A vector whose norm is exactly zero is returned unchanged.
    pub fn normalized(&self) -> Embedding {
        let norm = self.norm_f64();
        if norm == 0.0 {
            return self.clone();
        }
        Embedding {
            values: self
                .values
                .iter()
                .map(|&x| (f64::from(x) / norm) as f32)
                .collect(),
        }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers must check dimensions first; extra components on either side
    /// are ignored by the zip.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// The reference embeddings registered for one user.
///
/// Only ever replaced as a whole, never merged into. Deserialization goes
/// through [`FaceProfile::new`], so the size cap and dimension checks hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Embedding>", into = "Vec<Embedding>")]
pub struct FaceProfile {
    embeddings: Vec<Embedding>,
}

impl TryFrom<Vec<Embedding>> for FaceProfile {
    type Error = ProfileError;

    fn try_from(embeddings: Vec<Embedding>) -> Result<Self, Self::Error> {
        Self::new(embeddings)
    }
}

impl From<FaceProfile> for Vec<Embedding> {
    fn from(profile: FaceProfile) -> Self {
        profile.embeddings
    }
}

impl FaceProfile {
    /// Build a profile, enforcing the size cap and a single dimensionality.
    pub fn new(embeddings: Vec<Embedding>) -> Result<Self, ProfileError> {
        if embeddings.len() > MAX_PROFILE_EMBEDDINGS {
            return Err(ProfileError::TooManyEmbeddings {
                count: embeddings.len(),
                max: MAX_PROFILE_EMBEDDINGS,
            });
        }
        if let Some(first) = embeddings.first() {
            let expected = first.dimension();
            if let Some(bad) = embeddings.iter().find(|e| e.dimension() != expected) {
                return Err(ProfileError::MalformedInput(format!(
                    "profile mixes {expected}-dim and {}-dim embeddings",
                    bad.dimension()
                )));
            }
        }
        Ok(Self { embeddings })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Whether the user has registered a face at all.
    pub fn has_embeddings(&self) -> bool {
        !self.embeddings.is_empty()
    }

    /// Shared dimensionality, or `None` for an empty profile.
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(Embedding::dimension)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// One attendance entry. `day` is the UTC calendar date of `marked_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub day: NaiveDate,
    pub marked_at: DateTime<Utc>,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    pub fn present(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            marked_at: now,
            status: AttendanceStatus::Present,
        }
    }
}
