//! Brute-force nearest neighbor search over a dense vector matrix.
//!
//! Both the task corpus and the per-session step indexes are small enough
//! that an exhaustive scan beats any approximate structure, and it gives
//! exact results, which the match thresholds depend on.

use crate::vector::{Distance, VectorDimension, VectorError, VectorId};

/// Exhaustive L2 index with vectors stored contiguously in insertion order.
///
/// Positions are zero-based insertion positions; callers keep any parallel
/// metadata in the same order.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    /// Row-major matrix, `len * dimension` values
    data: Vec<f32>,

    /// Vector dimension for validation
    dimension: VectorDimension,
}

impl FlatIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            data: Vec::new(),
            dimension,
        }
    }

    /// Builds an index from vectors, validating every dimension first.
    pub fn from_vectors<V: AsRef<[f32]>>(
        dimension: VectorDimension,
        vectors: &[V],
    ) -> Result<Self, VectorError> {
        let mut index = Self::new(dimension);
        index.data.reserve(vectors.len() * dimension.get());
        for vector in vectors {
            index.add(vector.as_ref())?;
        }
        Ok(index)
    }

    /// Appends a vector and returns its ID.
    pub fn add(&mut self, vector: &[f32]) -> Result<VectorId, VectorError> {
        self.dimension.validate_vector(vector)?;
        let id = VectorId::from_position(self.len()).ok_or(VectorError::IndexFull)?;
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    /// Searches for the `k` nearest vectors to `query`.
    ///
    /// Returns `(position, distance)` pairs, closest first. Equal distances
    /// keep insertion order.
    #[must_use = "Search results should be inspected"]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, Distance)>, VectorError> {
        self.dimension.validate_vector(query)?;

        let mut candidates = Vec::with_capacity(self.len());
        for (position, vector) in self.rows().enumerate() {
            let distance = Distance::new(squared_l2(query, vector))?;
            candidates.push((position, distance));
        }

        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.truncate(k);
        Ok(candidates)
    }

    /// The single nearest vector, or `None` for an empty index.
    pub fn nearest(&self, query: &[f32]) -> Result<Option<(usize, Distance)>, VectorError> {
        Ok(self.search(query, 1)?.into_iter().next())
    }

    /// The nearest vector, accepted only when its distance is within `threshold`.
    pub fn nearest_within(
        &self,
        query: &[f32],
        threshold: f32,
    ) -> Result<Option<(usize, Distance)>, VectorError> {
        Ok(self
            .nearest(query)?
            .filter(|(_, distance)| distance.within(threshold)))
    }

    /// Vector stored at `position`.
    #[must_use]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let dim = self.dimension.get();
        let start = position.checked_mul(dim)?;
        self.data.get(start..start + dim)
    }

    /// Gets the number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension.get()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Gets the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.get())
    }
}

/// Squared Euclidean distance. Both slices must have the same length.
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}
