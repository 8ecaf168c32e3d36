//! Task/step matching for voice-guided instructions.
//!
//! A query is embedded, matched against a read-only task corpus, and then
//! against the steps of the task the session is locked to. Session state
//! (lock, step cursor, bounded history, step index) lives in a keyed store
//! with idle expiry.

pub mod config;
pub mod corpus;
pub mod error;
pub mod matching;
pub mod openai;
pub mod server;
pub mod session;
pub mod vector;

pub use config::Settings;
pub use corpus::{Step, Task, TaskCorpusIndex, TaskId};
pub use error::{
    ClassifierError, CorpusError, CorpusResult, EngineResult, MatchError, SessionError,
    SessionResult,
};
pub use matching::{
    ClassifierFailurePolicy, IntentClassifier, IntentVerdict, MatchEngine, MatchResult,
};
pub use session::{SessionId, SessionStore};
pub use vector::{EmbeddingGenerator, VectorDimension, VectorError};
