//! Outcome of processing one query.

use serde::Serialize;
use std::sync::Arc;

use crate::corpus::{Step, Task};

#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    /// No task within the threshold, and no lock was changed.
    NoTaskMatch,
    /// A task is locked but no step is within the threshold.
    NoStepMatch { task: Arc<Task> },
    /// Task locked and step resolved; `step_index` is the step's offset.
    Matched {
        task: Arc<Task>,
        step: Step,
        step_index: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    NoTaskMatch,
    NoStepMatch,
    Matched,
}

impl MatchResult {
    pub fn status(&self) -> MatchStatus {
        match self {
            Self::NoTaskMatch => MatchStatus::NoTaskMatch,
            Self::NoStepMatch { .. } => MatchStatus::NoStepMatch,
            Self::Matched { .. } => MatchStatus::Matched,
        }
    }

    pub fn task(&self) -> Option<&Arc<Task>> {
        match self {
            Self::NoTaskMatch => None,
            Self::NoStepMatch { task } | Self::Matched { task, .. } => Some(task),
        }
    }

    pub fn step(&self) -> Option<&Step> {
        match self {
            Self::Matched { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Reply shown to the user for this outcome.
    pub fn reply(&self) -> String {
        match self {
            Self::NoTaskMatch => "Sorry, I could not find a matching instruction.".to_string(),
            Self::NoStepMatch { task } => {
                format!("Still on \"{}\", but I could not tell which step you mean.", task.title)
            }
            Self::Matched { step, .. } => step.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::TaskId;

    #[test]
    fn test_status_and_accessors() {
        let task = Arc::new(Task {
            id: TaskId::new("t"),
            title: "Close shift".into(),
            intro: String::new(),
            steps: Vec::new(),
        });
        let step = Step {
            step_num: 2,
            summary: None,
            text: "Print the Z report".into(),
            keywords: Vec::new(),
            images: Vec::new(),
        };

        assert_eq!(MatchResult::NoTaskMatch.status(), MatchStatus::NoTaskMatch);
        assert!(MatchResult::NoTaskMatch.task().is_none());

        let no_step = MatchResult::NoStepMatch { task: task.clone() };
        assert_eq!(no_step.status(), MatchStatus::NoStepMatch);
        assert!(no_step.reply().contains("Close shift"));

        let matched = MatchResult::Matched {
            task,
            step,
            step_index: 1,
        };
        assert_eq!(matched.step().unwrap().step_num, 2);
        assert_eq!(matched.reply(), "Print the Z report");
        assert_eq!(
            serde_json::to_string(&matched.status()).unwrap(),
            "\"matched\""
        );
    }
}
