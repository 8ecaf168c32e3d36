//! Type-safe wrappers and core types for vector search functionality.
//!
//! Newtypes keep positions, distances and dimensions from being mixed up
//! with plain integers and floats at the index boundaries.

use std::num::NonZeroU32;
use thiserror::Error;

/// Dimension of `text-embedding-ada-002` vectors, the corpus default.
pub const VECTOR_DIMENSION_1536: usize = 1536;

/// Dimension of the local AllMiniLML6V2 model.
pub const VECTOR_DIMENSION_384: usize = 384;

/// Type-safe wrapper for vector IDs.
///
/// A vector's ID is its insertion position plus one. The corpus metadata
/// array is parallel to insertion order, so the ID is also the lookup key
/// into that array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VectorId(NonZeroU32);

impl VectorId {
    /// Creates a new `VectorId` from a non-zero u32.
    ///
    /// Returns `None` if the provided ID is zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Creates the ID for a zero-based insertion position.
    ///
    /// Returns `None` if the position does not fit in a u32.
    #[must_use]
    pub fn from_position(position: usize) -> Option<Self> {
        u32::try_from(position)
            .ok()
            .and_then(|p| p.checked_add(1))
            .and_then(Self::new)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Zero-based insertion position this ID stands for.
    #[must_use]
    pub fn position(&self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.get().to_le_bytes()
    }

    /// Creates from little-endian bytes.
    ///
    /// Returns `None` if the bytes represent zero.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::new(u32::from_le_bytes(bytes))
    }
}

/// Squared Euclidean distance between two vectors.
///
/// Smaller is closer; 0.0 means identical. This is the metric a flat L2
/// index reports, and the one match thresholds are expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance(f32);

impl Distance {
    /// Creates a new `Distance` with validation.
    ///
    /// Returns an error if the value is NaN or negative.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidDistance {
                value,
                reason: "Distance cannot be NaN",
            });
        }
        if value < 0.0 {
            return Err(VectorError::InvalidDistance {
                value,
                reason: "Distance cannot be negative",
            });
        }
        Ok(Self(value))
    }

    /// Distance of a vector to itself.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }

    /// True when this distance is at or under the acceptance threshold.
    #[must_use]
    pub fn within(&self, threshold: f32) -> bool {
        self.0 <= threshold
    }
}

impl std::fmt::Display for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

impl Eq for Distance {}

impl PartialOrd for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Distance {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Type-safe wrapper for vector dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// The 1536-dimensional corpus default.
    #[must_use]
    pub const fn dimension_1536() -> Self {
        Self(VECTOR_DIMENSION_1536)
    }

    /// The 384-dimensional local model dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure the corpus and queries use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid distance value: {value}\nReason: {reason}")]
    InvalidDistance { value: f32, reason: &'static str },

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Check the embedding provider configuration and API key"
    )]
    EmbeddingFailed(String),

    #[error(
        "Invalid vector file: {0}\nSuggestion: Rebuild the corpus with 'stepguide build-corpus'"
    )]
    InvalidFormat(String),

    #[error("Vector index is full\nSuggestion: Split the corpus into smaller indexes")]
    IndexFull,

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the corpus with a compatible version"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_construction() {
        let id = VectorId::new(42).unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.position(), 41);

        assert!(VectorId::new(0).is_none());
    }

    #[test]
    fn test_vector_id_from_position() {
        let first = VectorId::from_position(0).unwrap();
        assert_eq!(first.get(), 1);
        assert_eq!(first.position(), 0);

        let id = VectorId::from_position(9).unwrap();
        assert_eq!(id.get(), 10);
        assert!(VectorId::from_position(u32::MAX as usize).is_none());
    }

    #[test]
    fn test_vector_id_bytes() {
        let id = VectorId::new(12345).unwrap();
        assert_eq!(VectorId::from_bytes(id.to_bytes()), Some(id));
        assert!(VectorId::from_bytes([0, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_distance_validation() {
        assert_eq!(Distance::new(0.25).unwrap().get(), 0.25);
        assert_eq!(Distance::zero().get(), 0.0);

        assert!(Distance::new(-0.1).is_err());
        assert!(Distance::new(f32::NAN).is_err());
    }

    #[test]
    fn test_distance_threshold_is_inclusive() {
        assert!(Distance::new(0.40).unwrap().within(0.40));
        assert!(Distance::new(0.20).unwrap().within(0.40));
        assert!(!Distance::new(0.41).unwrap().within(0.40));
    }

    #[test]
    fn test_distance_ordering() {
        let mut distances = vec![
            Distance::new(0.55).unwrap(),
            Distance::new(0.10).unwrap(),
            Distance::new(0.30).unwrap(),
        ];
        distances.sort();
        assert_eq!(distances[0].get(), 0.10);
        assert_eq!(distances[2].get(), 0.55);
    }

    #[test]
    fn test_vector_dimension() {
        let dim = VectorDimension::new(1536).unwrap();
        assert_eq!(dim, VectorDimension::dimension_1536());
        assert_eq!(VectorDimension::dimension_384().get(), 384);

        assert!(VectorDimension::new(0).is_err());

        assert!(dim.validate_vector(&vec![0.1; 1536]).is_ok());
        match dim.validate_vector(&vec![0.1; 100]) {
            Err(VectorError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 1536);
                assert_eq!(actual, 100);
            }
            other => panic!("Expected DimensionMismatch, got {other:?}"),
        }
    }
}
