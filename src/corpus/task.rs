//! Task and step records as stored in the corpus metadata file.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a task in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A guided multi-step instruction. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task_id")]
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Task {
    /// Text embedded for the corpus vector: title, newline, intro.
    pub fn corpus_text(&self) -> String {
        format!("{}\n{}", self.title, self.intro)
    }

    pub fn step(&self, offset: usize) -> Option<&Step> {
        self.steps.get(offset)
    }
}

/// One actionable unit of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_num: u32,
    /// Short summary written by the document pipeline; not used for matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Image references relative to the task directory
    #[serde(default)]
    pub images: Vec<String>,
}

impl Step {
    /// Step text followed by its keywords, space-joined and trimmed.
    ///
    /// Empty when the step has neither text nor keywords.
    pub fn match_text(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.keywords.len());
        parts.push(self.text.as_str());
        parts.extend(self.keywords.iter().map(String::as_str));
        parts.join(" ").trim().to_string()
    }
}
