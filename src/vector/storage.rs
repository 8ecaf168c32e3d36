//! Memory-mapped vector file for the task corpus artifact.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic, version, dimension, vector count
//! - Records: vector ID (u32) followed by `dimension` f32 values, little-endian
//!
//! Records are written in insertion order and IDs are positions plus one,
//! so the file order is the order of the parallel metadata array.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::vector::types::{VectorDimension, VectorError, VectorId};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify vector storage files.
const MAGIC_BYTES: &[u8; 4] = b"SGVX";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Number of bytes per vector ID (u32).
const BYTES_PER_ID: usize = 4;

/// Offset of the vector count within the header.
const COUNT_OFFSET: u64 = 12;

/// Vector file on disk.
#[derive(Debug)]
pub struct MmapVectorStorage {
    /// Path to the storage file.
    path: PathBuf,

    /// Vector dimension (all vectors must have same dimension).
    dimension: VectorDimension,

    /// Number of vectors currently stored.
    vector_count: usize,
}

impl MmapVectorStorage {
    /// Creates a fresh, empty vector file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>, dimension: VectorDimension) -> Result<Self, VectorError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&path)?;
        file.write_all(MAGIC_BYTES)?;
        file.write_all(&STORAGE_VERSION.to_le_bytes())?;
        file.write_all(&(dimension.get() as u32).to_le_bytes())?;
        file.write_all(&0u32.to_le_bytes())?;
        file.flush()?;

        Ok(Self {
            path,
            dimension,
            vector_count: 0,
        })
    }

    /// Opens an existing vector file and validates its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(VectorError::Storage(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Vector file not found: {}", path.display()),
            )));
        }

        let mmap = Self::map(&path)?;
        let (dimension, vector_count) = Self::read_header(&mmap)?;

        Ok(Self {
            path,
            dimension,
            vector_count,
        })
    }

    /// Appends a batch of vectors and updates the header count.
    ///
    /// IDs continue from the current count, so records stay in insertion order.
    pub fn write_batch<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<(), VectorError> {
        for vector in vectors {
            self.dimension.validate_vector(vector.as_ref())?;
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        for (offset, vector) in vectors.iter().enumerate() {
            let id = VectorId::from_position(self.vector_count + offset)
                .ok_or(VectorError::IndexFull)?;
            file.write_all(&id.to_bytes())?;
            for value in vector.as_ref() {
                file.write_all(&value.to_le_bytes())?;
            }
        }
        file.flush()?;

        self.vector_count += vectors.len();
        self.update_header_count()
    }

    /// Reads every vector in file order.
    ///
    /// Fails if a record's ID does not match its position, since the
    /// metadata array relies on that ordering.
    pub fn read_all_vectors(&self) -> Result<Vec<Vec<f32>>, VectorError> {
        let mmap = Self::map(&self.path)?;
        let dimension = self.dimension.get();
        let record_size = BYTES_PER_ID + dimension * BYTES_PER_F32;

        let body = &mmap[HEADER_SIZE..];
        if body.len() != record_size * self.vector_count {
            return Err(VectorError::InvalidFormat(format!(
                "expected {} records of {record_size} bytes, found {} bytes",
                self.vector_count,
                body.len()
            )));
        }

        let mut vectors = Vec::with_capacity(self.vector_count);
        for (position, record) in body.chunks_exact(record_size).enumerate() {
            let id = VectorId::from_bytes(read_u32(&record[..BYTES_PER_ID]).to_le_bytes())
                .ok_or_else(|| VectorError::InvalidFormat("zero vector ID".to_string()))?;
            if id.position() != position {
                return Err(VectorError::InvalidFormat(format!(
                    "vector ID {} stored at position {position}",
                    id.get()
                )));
            }

            let vector = record[BYTES_PER_ID..]
                .chunks_exact(BYTES_PER_F32)
                .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                .collect();
            vectors.push(vector);
        }

        Ok(vectors)
    }

    /// Returns the number of vectors stored.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.vector_count
    }

    /// Returns the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map(path: &Path) -> Result<Mmap, VectorError> {
        let file = File::open(path)?;
        // The corpus file is write-once; nothing truncates it while mapped.
        Ok(unsafe { MmapOptions::new().map(&file)? })
    }

    fn read_header(mmap: &Mmap) -> Result<(VectorDimension, usize), VectorError> {
        if mmap.len() < HEADER_SIZE {
            return Err(VectorError::InvalidFormat(
                "file too small to contain header".to_string(),
            ));
        }

        if &mmap[0..4] != MAGIC_BYTES {
            return Err(VectorError::InvalidFormat("invalid magic bytes".to_string()));
        }

        let version = read_u32(&mmap[4..8]);
        if version != STORAGE_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: version,
            });
        }

        let dimension = VectorDimension::new(read_u32(&mmap[8..12]) as usize)?;
        let vector_count = read_u32(&mmap[12..16]) as usize;

        Ok((dimension, vector_count))
    }

    fn update_header_count(&self) -> Result<(), VectorError> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&(self.vector_count as u32).to_le_bytes())?;
        file.flush()?;
        Ok(())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_vectors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corpus").join("task_index.vec");
        let dimension = VectorDimension::new(4).unwrap();

        let mut storage = MmapVectorStorage::create(&path, dimension).unwrap();
        let data = vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]];
        storage.write_batch(&data).unwrap();
        storage.write_batch(&[vec![9.0, 10.0, 11.0, 12.0]]).unwrap();
        assert_eq!(storage.vector_count(), 3);

        let reopened = MmapVectorStorage::open(&path).unwrap();
        assert_eq!(reopened.vector_count(), 3);
        assert_eq!(reopened.dimension(), dimension);

        let all = reopened.read_all_vectors().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], data[0]);
        assert_eq!(all[2], vec![9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_open_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = MmapVectorStorage::open(temp_dir.path().join("missing.vec"));
        assert!(matches!(result, Err(VectorError::Storage(_))));
    }

    #[test]
    fn test_dimension_validation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("task_index.vec");
        let mut storage =
            MmapVectorStorage::create(&path, VectorDimension::new(3).unwrap()).unwrap();

        assert!(storage.write_batch(&[vec![1.0, 2.0]]).is_err());
        assert_eq!(storage.vector_count(), 0);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("task_index.vec");
        std::fs::write(&path, b"FAISSxxxxxxxxxxxxxxxx").unwrap();

        assert!(matches!(
            MmapVectorStorage::open(&path),
            Err(VectorError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("task_index.vec");
        let mut storage =
            MmapVectorStorage::create(&path, VectorDimension::new(2).unwrap()).unwrap();
        storage.write_batch(&[vec![1.0, 2.0]]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let reopened = MmapVectorStorage::open(&path).unwrap();
        assert!(matches!(
            reopened.read_all_vectors(),
            Err(VectorError::InvalidFormat(_))
        ));
    }
}
