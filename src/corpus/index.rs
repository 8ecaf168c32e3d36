//! Startup-loaded task corpus: one vector per task plus the parallel
//! metadata array. Read-only after load.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::corpus::Task;
use crate::error::{CorpusError, CorpusResult};
use crate::vector::{Distance, FlatIndex, MmapVectorStorage, VectorDimension, VectorError};

/// File name of the task vector file inside the corpus directory.
pub const TASK_VECTORS_FILE: &str = "task_vectors.vec";

/// Nearest task accepted by the threshold.
#[derive(Debug, Clone)]
pub struct TaskHit {
    pub task: Arc<Task>,
    pub distance: Distance,
    /// Position in the corpus
    pub position: usize,
}

#[derive(Debug)]
pub struct TaskCorpusIndex {
    index: FlatIndex,
    tasks: Vec<Arc<Task>>,
    threshold: f32,
}

impl TaskCorpusIndex {
    /// Loads the vector file and metadata written by the corpus builder.
    ///
    /// The vector file dimension must equal `dimension`, and both files
    /// must hold the same number of entries.
    pub fn load(
        index_dir: &Path,
        meta_path: &Path,
        dimension: VectorDimension,
        threshold: f32,
    ) -> CorpusResult<Self> {
        let vectors_path = index_dir.join(TASK_VECTORS_FILE);
        let storage = MmapVectorStorage::open(&vectors_path).map_err(|e| match e {
            VectorError::Storage(source) => CorpusError::FileRead {
                path: vectors_path.clone(),
                source,
            },
            other => CorpusError::Vector(other),
        })?;

        if storage.dimension() != dimension {
            return Err(VectorError::DimensionMismatch {
                expected: dimension.get(),
                actual: storage.dimension().get(),
            }
            .into());
        }

        let vectors = storage.read_all_vectors()?;
        let tasks = load_metadata(meta_path)?;
        debug!(
            "Read {} vectors from {} and {} tasks from {}",
            vectors.len(),
            vectors_path.display(),
            tasks.len(),
            meta_path.display()
        );

        let corpus = Self::from_parts(dimension, &vectors, tasks, threshold)?;
        info!(
            "Loaded task corpus: {} tasks, dimension {dimension}",
            corpus.len()
        );
        Ok(corpus)
    }

    /// Builds a corpus from in-memory vectors and tasks in the same order.
    pub fn from_parts<V: AsRef<[f32]>>(
        dimension: VectorDimension,
        vectors: &[V],
        tasks: Vec<Task>,
        threshold: f32,
    ) -> CorpusResult<Self> {
        if vectors.len() != tasks.len() {
            return Err(CorpusError::LengthMismatch {
                vectors: vectors.len(),
                tasks: tasks.len(),
            });
        }

        Ok(Self {
            index: FlatIndex::from_vectors(dimension, vectors)?,
            tasks: tasks.into_iter().map(Arc::new).collect(),
            threshold,
        })
    }

    /// Nearest task to `query`, if its distance is within the threshold.
    ///
    /// Fails with `DimensionMismatch` when the query has the wrong length.
    pub fn search(&self, query: &[f32]) -> Result<Option<TaskHit>, VectorError> {
        let nearest = self.index.nearest(query)?;
        if let Some((position, distance)) = nearest {
            debug!("Nearest task at position {position}, distance {distance}");
        }

        Ok(nearest
            .filter(|(_, distance)| distance.within(self.threshold))
            .and_then(|(position, distance)| {
                self.tasks.get(position).map(|task| TaskHit {
                    task: Arc::clone(task),
                    distance,
                    position,
                })
            }))
    }

    pub fn task(&self, position: usize) -> Option<&Arc<Task>> {
        self.tasks.get(position)
    }

    pub fn dimension(&self) -> VectorDimension {
        self.index.dimension()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn load_metadata(path: &Path) -> CorpusResult<Vec<Task>> {
    let content = std::fs::read_to_string(path).map_err(|source| CorpusError::FileRead {
        path: PathBuf::from(path),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CorpusError::Parse {
        path: PathBuf::from(path),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::TaskId;
    use tempfile::TempDir;

    fn task(id: &str) -> Task {
        Task {
            id: TaskId::new(id),
            title: format!("Task {id}"),
            intro: String::new(),
            steps: Vec::new(),
        }
    }

    fn dim2() -> VectorDimension {
        VectorDimension::new(2).unwrap()
    }

    #[test]
    fn test_nearest_task_within_threshold_wins() {
        // Squared distances from the origin: A = 0.20, B = 0.50
        let a = 0.20f32.sqrt();
        let b = 0.50f32.sqrt();
        let corpus = TaskCorpusIndex::from_parts(
            dim2(),
            &[vec![b, 0.0], vec![0.0, a]],
            vec![task("B"), task("A")],
            0.40,
        )
        .unwrap();

        let hit = corpus.search(&[0.0, 0.0]).unwrap().unwrap();
        assert_eq!(hit.task.id.as_str(), "A");
        assert_eq!(hit.position, 1);
        assert!((hit.distance.get() - 0.20).abs() < 1e-6);
    }

    #[test]
    fn test_nothing_within_threshold() {
        let corpus =
            TaskCorpusIndex::from_parts(dim2(), &[vec![1.0, 0.0]], vec![task("far")], 0.40)
                .unwrap();
        assert!(corpus.search(&[0.0, 0.0]).unwrap().is_none());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let corpus =
            TaskCorpusIndex::from_parts(dim2(), &[vec![0.5, 0.0]], vec![task("edge")], 0.25)
                .unwrap();
        assert!(corpus.search(&[0.0, 0.0]).unwrap().is_some());
    }

    #[test]
    fn test_query_dimension_mismatch_is_an_error() {
        let corpus =
            TaskCorpusIndex::from_parts(dim2(), &[vec![0.0, 0.0]], vec![task("a")], 0.40)
                .unwrap();
        assert!(matches!(
            corpus.search(&[0.0, 0.0, 0.0]),
            Err(VectorError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result = TaskCorpusIndex::from_parts(
            dim2(),
            &[vec![0.0, 0.0], vec![1.0, 1.0]],
            vec![task("only")],
            0.40,
        );
        assert!(matches!(
            result,
            Err(CorpusError::LengthMismatch {
                vectors: 2,
                tasks: 1
            })
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage =
            MmapVectorStorage::create(temp_dir.path().join(TASK_VECTORS_FILE), dim2()).unwrap();
        storage.write_batch(&[vec![0.0, 0.0], vec![3.0, 3.0]]).unwrap();

        let meta_path = temp_dir.path().join("task_meta.json");
        std::fs::write(
            &meta_path,
            serde_json::to_string(&vec![task("first"), task("second")]).unwrap(),
        )
        .unwrap();

        let corpus = TaskCorpusIndex::load(temp_dir.path(), &meta_path, dim2(), 0.40).unwrap();
        assert_eq!(corpus.len(), 2);
        let hit = corpus.search(&[3.0, 3.1]).unwrap().unwrap();
        assert_eq!(hit.task.id.as_str(), "second");
    }

    #[test]
    fn test_load_rejects_other_dimension() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = MmapVectorStorage::create(
            temp_dir.path().join(TASK_VECTORS_FILE),
            VectorDimension::new(3).unwrap(),
        )
        .unwrap();
        storage.write_batch(&[vec![0.0, 0.0, 0.0]]).unwrap();
        let meta_path = temp_dir.path().join("task_meta.json");
        std::fs::write(&meta_path, "[]").unwrap();

        let result = TaskCorpusIndex::load(temp_dir.path(), &meta_path, dim2(), 0.40);
        assert!(matches!(
            result,
            Err(CorpusError::Vector(VectorError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_missing_files_report_path() {
        let temp_dir = TempDir::new().unwrap();
        let result = TaskCorpusIndex::load(
            temp_dir.path(),
            &temp_dir.path().join("task_meta.json"),
            dim2(),
            0.40,
        );
        assert!(matches!(result, Err(CorpusError::FileRead { .. })));
    }
}
