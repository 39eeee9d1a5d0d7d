//! Decoding of client-submitted embedding payloads.
//!
//! Clients send a JSON string such as `[[0.1, 0.2, ...], [0.3, 0.4, ...]]`.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed embeddings payload: {0}")]
pub struct PayloadError(pub String);

/// Parse a JSON array of numeric arrays into embeddings.
///
/// An empty outer array is valid. Every inner array must be non-empty,
/// representable as finite `f32`, and share one dimensionality. A nonzero
/// value too small for `f32` is rejected rather than flushed to zero.
pub fn parse_embeddings(json: &str) -> Result<Vec<Embedding>, PayloadError> {
    let raw: Vec<Vec<f64>> = serde_json::from_str(json)
        .map_err(|e| PayloadError(format!("expected a JSON array of numeric arrays: {e}")))?;

    let mut embeddings = Vec::with_capacity(raw.len());
    for (i, vector) in raw.into_iter().enumerate() {
        if vector.is_empty() {
            return Err(PayloadError(format!("embedding {i} is empty")));
        }
        let values: Vec<f32> = vector.iter().map(|&v| v as f32).collect();
        let lossy = vector
            .iter()
            .zip(&values)
            .any(|(&wide, &narrow)| !narrow.is_finite() || (narrow == 0.0 && wide != 0.0));
        if lossy {
            return Err(PayloadError(format!(
                "embedding {i} has values outside the f32 range"
            )));
        }
        embeddings.push(Embedding::new(values));
    }

    if let Some(first) = embeddings.first() {
        let expected = first.dimension();
        if let Some((i, e)) = embeddings
            .iter()
            .enumerate()
            .find(|(_, e)| e.dimension() != expected)
        {
            return Err(PayloadError(format!(
                "embedding {i} has {} values, expected {expected}",
                e.dimension()
            )));
        }
    }

    Ok(embeddings)
}
