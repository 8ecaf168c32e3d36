//! Builds the task corpus artifact from a directory of task folders.
//!
//! Every immediate sub-directory holding `structured_output.json` is one
//! task. The task vector is the embedding of `title + "\n" + intro`. The
//! vector file and `task_meta.json` are written in the same order.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::corpus::{TASK_VECTORS_FILE, Task};
use crate::error::{CorpusError, CorpusResult};
use crate::vector::{EmbeddingGenerator, MmapVectorStorage, VectorDimension};

/// Task file expected in every task folder.
pub const TASK_FILE: &str = "structured_output.json";

/// Outcome of a corpus build.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Tasks written, in corpus order
    pub tasks: Vec<Task>,
    /// Folders without a task file
    pub skipped: Vec<PathBuf>,
    /// Folders whose task could not be read or embedded, with the reason
    pub failed: Vec<(PathBuf, String)>,
    pub vectors_path: PathBuf,
    pub meta_path: PathBuf,
}

pub struct CorpusBuilder<'a> {
    embedder: &'a dyn EmbeddingGenerator,
    dimension: VectorDimension,
}

impl<'a> CorpusBuilder<'a> {
    /// `dimension` is the configured corpus dimension; the embedder must
    /// produce vectors of that size.
    pub fn new(embedder: &'a dyn EmbeddingGenerator, dimension: VectorDimension) -> Self {
        Self {
            embedder,
            dimension,
        }
    }

    /// Reads `instructions_dir`, embeds each task, and writes
    /// `<index_dir>/task_vectors.vec` plus `meta_path`.
    pub fn build(
        &self,
        instructions_dir: &Path,
        index_dir: &Path,
        meta_path: &Path,
    ) -> CorpusResult<BuildReport> {
        let mut report = BuildReport::default();
        let mut vectors: Vec<Vec<f32>> = Vec::new();

        for folder in task_folders(instructions_dir)? {
            let task_file = folder.join(TASK_FILE);
            if !task_file.is_file() {
                warn!("Skipping {}: no {TASK_FILE}", folder.display());
                report.skipped.push(folder);
                continue;
            }

            match self.embed_task(&task_file) {
                Ok((task, vector)) => {
                    info!("Embedded: {}", task.title);
                    vectors.push(vector);
                    report.tasks.push(task);
                }
                Err(e) => {
                    warn!("Failed on {}: {e}", folder.display());
                    report.failed.push((folder, e.to_string()));
                }
            }
        }

        if report.tasks.is_empty() {
            return Err(CorpusError::Empty {
                dir: instructions_dir.to_path_buf(),
            });
        }

        let vectors_path = index_dir.join(TASK_VECTORS_FILE);
        let vectors_tmp = staging_path(&vectors_path);
        let meta_tmp = staging_path(meta_path);

        // Nothing is renamed into place unless both files were written.
        let staged = self
            .write_vectors(&vectors_tmp, &vectors)
            .and_then(|()| write_meta(&meta_tmp, &report.tasks));
        if let Err(e) = staged {
            let _ = std::fs::remove_file(&vectors_tmp);
            let _ = std::fs::remove_file(&meta_tmp);
            return Err(e);
        }
        commit(&meta_tmp, meta_path)?;
        commit(&vectors_tmp, &vectors_path)?;

        info!(
            "Wrote {} task vectors to {} and metadata to {}",
            report.tasks.len(),
            vectors_path.display(),
            meta_path.display()
        );
        report.vectors_path = vectors_path;
        report.meta_path = meta_path.to_path_buf();
        Ok(report)
    }

    fn write_vectors(&self, path: &Path, vectors: &[Vec<f32>]) -> CorpusResult<()> {
        let mut storage = MmapVectorStorage::create(path, self.dimension)?;
        storage.write_batch(vectors)?;
        Ok(())
    }

    fn embed_task(&self, task_file: &Path) -> CorpusResult<(Task, Vec<f32>)> {
        let content = std::fs::read_to_string(task_file).map_err(|source| {
            CorpusError::FileRead {
                path: task_file.to_path_buf(),
                source,
            }
        })?;
        let task: Task = serde_json::from_str(&content).map_err(|source| CorpusError::Parse {
            path: task_file.to_path_buf(),
            source,
        })?;

        let vector = self.embedder.embed(&task.corpus_text())?;
        self.dimension.validate_vector(&vector)?;
        Ok((task, vector))
    }
}

/// Sibling path used while a file is being written.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_meta(path: &Path, tasks: &[Task]) -> CorpusResult<()> {
    let json = serde_json::to_string_pretty(tasks).map_err(|source| CorpusError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CorpusError::FileWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, json).map_err(|source| CorpusError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn commit(staged: &Path, target: &Path) -> CorpusResult<()> {
    std::fs::rename(staged, target).map_err(|source| CorpusError::FileWrite {
        path: target.to_path_buf(),
        source,
    })
}

/// Immediate sub-directories of `dir`, sorted by name.
fn task_folders(dir: &Path) -> CorpusResult<Vec<PathBuf>> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_dir() => Some(Ok(entry.into_path())),
            Ok(_) => None,
            Err(e) => Some(Err(CorpusError::FileRead {
                path: e.path().map_or_else(|| dir.to_path_buf(), Path::to_path_buf),
                source: e.into(),
            })),
        })
        .collect()
}
