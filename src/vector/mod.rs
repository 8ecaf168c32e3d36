//! Vector primitives: typed IDs and distances, embedding providers,
//! the brute-force flat index and the on-disk vector file.
//!
//! # Architecture
//! Task and step collections are small (tens to hundreds of vectors), so
//! every search is an exact scan with squared L2 distance. Vectors for the
//! task corpus are persisted in a memory-mapped file written once by the
//! corpus builder and loaded at startup.

mod embedding;
mod engine;
mod storage;
mod types;

#[cfg(test)]
pub use embedding::MockEmbeddingGenerator;
pub use embedding::{EmbeddingGenerator, FastEmbedGenerator, models_dir};
pub use engine::{FlatIndex, squared_l2};
pub use storage::MmapVectorStorage;
pub use types::{
    Distance, VECTOR_DIMENSION_384, VECTOR_DIMENSION_1536, VectorDimension, VectorError, VectorId,
};
