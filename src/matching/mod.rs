//! Match engine: maps a query to a task and step for a session.

mod engine;
mod intent;
mod result;

pub use engine::{MatchEngine, nearest_task};
#[cfg(test)]
pub use intent::ScriptedClassifier;
pub use intent::{
    ClassifierFailurePolicy, IntentClassifier, IntentVerdict, MISMATCH_INSTRUCTION,
    OpenAiIntentClassifier, mismatch_context,
};
pub use result::{MatchResult, MatchStatus};

/// Maximum squared L2 distance for a task match.
pub const DEFAULT_TASK_THRESHOLD: f32 = 0.40;

/// Maximum squared L2 distance for a step match.
pub const DEFAULT_STEP_THRESHOLD: f32 = 0.40;
