//! Error types for corpus loading, intent classification and matching.
//!
//! Vector-layer errors live in [`crate::vector::VectorError`]. Outcomes such
//! as "no task within threshold" are values of
//! [`crate::matching::MatchResult`], never errors.

use crate::openai::OpenAiError;
use crate::vector::VectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or building the task corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse task metadata '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(
        "Corpus is inconsistent: {vectors} vectors but {tasks} task records\nSuggestion: Rebuild both files with 'stepguide build-corpus'"
    )]
    LengthMismatch { vectors: usize, tasks: usize },

    #[error("No tasks found under '{dir}'\nSuggestion: Each task needs a sub-directory containing structured_output.json")]
    Empty { dir: PathBuf },

    #[error("Task '{task_id}' has no step with embeddable text")]
    NoEmbeddableSteps { task_id: String },

    #[error(transparent)]
    Vector(#[from] VectorError),
}

impl CorpusError {
    pub fn status_code(&self) -> String {
        match self {
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::Parse { .. } => "METADATA_PARSE_ERROR",
            Self::LengthMismatch { .. } => "CORPUS_LENGTH_MISMATCH",
            Self::Empty { .. } => "CORPUS_EMPTY",
            Self::NoEmbeddableSteps { .. } => "NO_EMBEDDABLE_STEPS",
            Self::Vector(_) => "VECTOR_ERROR",
        }
        .to_string()
    }

    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::FileRead { .. } => vec![
                "Check corpus.index_path and corpus.meta_path in settings.toml",
                "Run 'stepguide build-corpus <dir>' to create the corpus files",
            ],
            Self::Parse { .. } | Self::LengthMismatch { .. } => {
                vec!["Run 'stepguide build-corpus <dir>' to regenerate the corpus"]
            }
            Self::Vector(VectorError::DimensionMismatch { .. }) => vec![
                "The corpus was built with a different embedding model",
                "Set corpus.dimension to match the model or rebuild the corpus",
            ],
            _ => vec![],
        }
    }
}

/// Errors from the intent classifier.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Intent classifier request failed: {0}")]
    Request(#[from] OpenAiError),
}

/// Errors from session store writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session '{id}' does not exist or has expired")]
    UnknownSession { id: String },

    #[error("Session '{id}' has no locked task")]
    NotLocked { id: String },

    #[error("Step {step} is out of range for a task with {len} steps")]
    StepOutOfRange { step: usize, len: usize },
}

/// Errors that fail a `process` call.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error(
        "Query vector has dimension {actual}, corpus index expects {expected}\nSuggestion: Use the embedding model the corpus was built with"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Failed to embed text: {0}")]
    Embedding(VectorError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<VectorError> for MatchError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::Embedding(other),
        }
    }
}

impl MatchError {
    pub fn status_code(&self) -> String {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH".to_string(),
            Self::Embedding(_) => "EMBEDDING_ERROR".to_string(),
            Self::Corpus(e) => e.status_code(),
            Self::Session(_) => "SESSION_ERROR".to_string(),
        }
    }

    /// Only transient provider failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Embedding(VectorError::EmbeddingFailed(_)))
    }

    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::DimensionMismatch { .. } => vec![
                "Check embedding.provider and embedding.model against corpus.dimension",
            ],
            Self::Embedding(_) => vec![
                "Check network access to the embedding endpoint",
                "Verify OPENAI_API_KEY is valid",
            ],
            Self::Corpus(e) => e.recovery_suggestions(),
            Self::Session(_) => vec!["Start a new session and retry"],
        }
    }
}

pub type CorpusResult<T> = Result<T, CorpusError>;

pub type EngineResult<T> = Result<T, MatchError>;

pub type SessionResult<T> = Result<T, SessionError>;
