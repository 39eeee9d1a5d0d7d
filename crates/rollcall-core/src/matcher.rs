//! Threshold matching of candidate embeddings against a stored profile.
//!
//! Both sides are L2-normalized before comparison, so only direction
//! matters. A match is existential: the first (candidate, reference) pair
//! closer than the threshold wins.

use crate::types::Embedding;
use thiserror::Error;

/// Default cutoff in normalized Euclidean space. Unit vectors are at most
/// 2.0 apart; orthogonal ones are √2 apart.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Outcome of comparing a candidate set against a reference set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Smallest distance computed before evaluation stopped, if any pair was compared.
    pub distance: Option<f32>,
}

impl MatchResult {
    fn no_match() -> Self {
        Self {
            matched: false,
            distance: None,
        }
    }
}

/// Strategy for comparing submitted embeddings against a user's references.
pub trait Matcher {
    fn compare(
        &self,
        candidates: &[Embedding],
        references: &[Embedding],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Normalized Euclidean distance matcher with first-hit short-circuit.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        candidates: &[Embedding],
        references: &[Embedding],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let Some(first) = references.first() else {
            return Ok(MatchResult::no_match());
        };
        if candidates.is_empty() {
            return Ok(MatchResult::no_match());
        }

        // Whole-input check so the result never depends on which pair hits first.
        let expected = first.dimension();
        for e in references.iter().chain(candidates.iter()) {
            if e.dimension() != expected {
                return Err(MatchError::DimensionMismatch {
                    expected,
                    actual: e.dimension(),
                });
            }
        }

        let references: Vec<Embedding> = references.iter().map(Embedding::normalized).collect();
        let mut closest: Option<f32> = None;

        for candidate in candidates {
            let candidate = candidate.normalized();
            for reference in &references {
                let distance = candidate.euclidean_distance(reference);
                tracing::trace!(distance, "compared embedding pair");
                closest = Some(closest.map_or(distance, |c| c.min(distance)));
                if distance < threshold {
                    return Ok(MatchResult {
                        matched: true,
                        distance: closest,
                    });
                }
            }
        }

        Ok(MatchResult {
            matched: false,
            distance: closest,
        })
    }
}
