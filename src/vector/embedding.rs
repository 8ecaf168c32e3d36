//! Embedding generation for queries, step texts and corpus entries.
//!
//! The matching engine only sees the [`EmbeddingGenerator`] trait. The
//! remote provider lives in [`crate::openai`]; the local fastembed model
//! here is useful offline and in development, but produces 384-dimensional
//! vectors, so a corpus built with it can only be queried with it.

use crate::vector::{VECTOR_DIMENSION_384, VectorDimension, VectorError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

/// Trait for generating embeddings from text.
///
/// Implementations must be thread-safe; one generator is shared by every
/// request the engine serves.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts.
    ///
    /// # Returns
    /// One embedding per input text, in input order, or an error
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Generate the embedding for a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.generate_embeddings(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| VectorError::EmbeddingFailed("provider returned no embedding".into()))
    }

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;
}

/// Directory where the local model files are cached.
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stepguide")
        .join("models")
}

/// FastEmbed implementation using the AllMiniLML6V2 model.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
}

impl FastEmbedGenerator {
    /// Create a new FastEmbed generator.
    ///
    /// # Errors
    /// Returns an error if the model fails to initialize or download.
    pub fn new(show_download_progress: bool) -> Result<Self, VectorError> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(models_dir())
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        Ok(Self {
            model: Mutex::new(model),
            dimension: VectorDimension::dimension_384(),
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in &embeddings {
            if embedding.len() != VECTOR_DIMENSION_384 {
                return Err(VectorError::DimensionMismatch {
                    expected: VECTOR_DIMENSION_384,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Table-driven embedding generator for tests.
///
/// Known texts map to fixed vectors so tests can place queries at exact
/// distances from tasks and steps. Unknown texts map to the fallback
/// vector, or fail when no fallback is set.
#[cfg(test)]
pub struct MockEmbeddingGenerator {
    dimension: VectorDimension,
    table: std::collections::HashMap<String, Vec<f32>>,
    fallback: Option<Vec<f32>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockEmbeddingGenerator {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).unwrap(),
            table: std::collections::HashMap::new(),
            fallback: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, vector: Vec<f32>) -> Self {
        self.fallback = Some(vector);
        self
    }

    /// Number of `generate_embeddings` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        texts
            .iter()
            .map(|text| {
                self.table
                    .get(*text)
                    .or(self.fallback.as_ref())
                    .cloned()
                    .ok_or_else(|| VectorError::EmbeddingFailed(format!("no vector for '{text}'")))
            })
            .collect()
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
