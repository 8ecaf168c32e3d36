//! Shared fixtures for integration tests: a lookup-table embedder, fixed
//! classifiers and small task builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use stepguide::corpus::{Step, TASK_FILE, Task, TaskId};
use stepguide::openai::{ChatCompletion, OpenAiError};
use stepguide::{
    ClassifierError, EmbeddingGenerator, IntentClassifier, IntentVerdict, VectorDimension,
    VectorError,
};

/// Embedder that answers from a fixed table. Unknown texts fail unless a
/// fallback vector is set.
pub struct TableEmbedder {
    dimension: VectorDimension,
    table: HashMap<String, Vec<f32>>,
    fallback: Option<Vec<f32>>,
    calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).expect("non-zero dimension"),
            table: HashMap::new(),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension.get(), "fixture vector for {text:?}");
        self.table.insert(text.to_string(), vector);
        self
    }

    pub fn with_fallback(mut self, vector: Vec<f32>) -> Self {
        self.fallback = Some(vector);
        self
    }

    /// Number of `generate_embeddings` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingGenerator for TableEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|text| {
                self.table
                    .get(*text)
                    .or(self.fallback.as_ref())
                    .cloned()
                    .ok_or_else(|| VectorError::EmbeddingFailed(format!("no vector for {text:?}")))
            })
            .collect()
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Classifier that always returns the same verdict.
pub struct FixedClassifier(pub IntentVerdict);

impl IntentClassifier for FixedClassifier {
    fn classify(&self, _context: &str) -> Result<IntentVerdict, ClassifierError> {
        Ok(self.0)
    }
}

/// Classifier whose provider is always down.
pub struct FailingClassifier;

impl IntentClassifier for FailingClassifier {
    fn classify(&self, _context: &str) -> Result<IntentVerdict, ClassifierError> {
        Err(ClassifierError::Request(OpenAiError::Status {
            endpoint: "chat/completions".to_string(),
            status: 503,
            message: "service unavailable".to_string(),
        }))
    }
}

/// Chat endpoint that always answers with the same content, `None` being a
/// completion without any message text.
pub struct CannedChat(pub Option<String>);

impl ChatCompletion for CannedChat {
    fn complete(&self, _system: &str, _user: &str) -> Result<Option<String>, OpenAiError> {
        Ok(self.0.as_deref().map(|reply| reply.trim().to_string()))
    }
}

pub fn step(num: u32, text: &str, keywords: &[&str]) -> Step {
    Step {
        step_num: num,
        summary: None,
        text: text.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        images: Vec::new(),
    }
}

pub fn task(id: &str, title: &str, intro: &str, steps: Vec<Step>) -> Task {
    Task {
        id: TaskId::new(id),
        title: title.to_string(),
        intro: intro.to_string(),
        steps,
    }
}

/// Vector on `axis` whose squared distance from the origin is `distance`.
pub fn at_distance(dimension: usize, axis: usize, distance: f32) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    vector[axis] = distance.sqrt();
    vector
}

/// Writes `<root>/<folder>/structured_output.json` for `task`.
pub fn write_task_folder(root: &Path, folder: &str, task: &Task) -> PathBuf {
    let dir = root.join(folder);
    fs::create_dir_all(&dir).expect("Failed to create task folder");
    let json = serde_json::to_string_pretty(task).expect("Failed to serialize task");
    fs::write(dir.join(TASK_FILE), json).expect("Failed to write task file");
    dir
}
