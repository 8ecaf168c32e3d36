//! Intent classification for topic-switch detection.
//!
//! While a task is locked, every query is checked against the task title
//! and the current step. Only an explicit `reject` verdict counts as a
//! switch; what a classifier failure means is set by
//! [`ClassifierFailurePolicy`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::corpus::Task;
use crate::error::ClassifierError;
use crate::openai::{ChatClient, ChatCompletion};

/// Fixed system instruction for the classifier.
pub const MISMATCH_INSTRUCTION: &str = "You check whether a user's latest message still fits \
the instruction they are following. You are given the task title, the current step and the \
message. Answer with exactly one word: confirm if the message fits the task or step, reject \
if the user has moved on to something unrelated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentVerdict {
    Confirm,
    Reject,
    /// Anything other than the two expected words.
    Unrecognized,
}

impl IntentVerdict {
    /// Case-insensitive, whitespace-trimmed parse of a classifier reply.
    pub fn parse(reply: &str) -> Self {
        match reply.trim().to_lowercase().as_str() {
            "reject" => Self::Reject,
            "confirm" => Self::Confirm,
            _ => Self::Unrecognized,
        }
    }

    pub fn is_mismatch(self) -> bool {
        self == Self::Reject
    }
}

/// What a classifier error means for mismatch detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierFailurePolicy {
    /// Treat as "no mismatch"; the current lock is kept.
    #[default]
    FailOpen,
    /// Treat as a mismatch; the task corpus is searched again.
    FailClosed,
}

impl ClassifierFailurePolicy {
    pub fn mismatch_on_failure(self) -> bool {
        self == Self::FailClosed
    }
}

pub trait IntentClassifier: Send + Sync {
    /// Classifies a context string built by [`mismatch_context`].
    fn classify(&self, context: &str) -> Result<IntentVerdict, ClassifierError>;
}

/// Context sent to the classifier: task title, current step text (when the
/// cursor is in range) and the user's message.
pub fn mismatch_context(task: &Task, current_step: usize, message: &str) -> String {
    let mut context = format!("Task: {}\n", task.title);
    if let Some(step) = task.step(current_step) {
        context.push_str(&format!("Current step: {}\n", step.text));
    }
    context.push_str(&format!("User message: {message}"));
    context
}

/// Chat-completion backed classifier.
///
/// A reply with no text is a successful, unrecognized verdict; only a
/// failed call is a classifier error.
#[derive(Debug, Clone)]
pub struct OpenAiIntentClassifier<C = ChatClient> {
    chat: C,
}

impl<C: ChatCompletion> OpenAiIntentClassifier<C> {
    pub fn new(chat: C) -> Self {
        Self { chat }
    }
}

impl<C: ChatCompletion> IntentClassifier for OpenAiIntentClassifier<C> {
    fn classify(&self, context: &str) -> Result<IntentVerdict, ClassifierError> {
        let reply = self.chat.complete(MISMATCH_INSTRUCTION, context)?;
        let verdict = reply
            .as_deref()
            .map_or(IntentVerdict::Unrecognized, IntentVerdict::parse);
        debug!("Classifier replied {reply:?} -> {verdict:?}");
        Ok(verdict)
    }
}

/// Classifier that replays queued verdicts, then repeats a default.
#[cfg(test)]
pub struct ScriptedClassifier {
    script: parking_lot::Mutex<std::collections::VecDeque<Result<IntentVerdict, ()>>>,
    default: IntentVerdict,
    contexts: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl ScriptedClassifier {
    pub fn always(verdict: IntentVerdict) -> Self {
        Self {
            script: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            default: verdict,
            contexts: parking_lot::Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn then(self, verdict: IntentVerdict) -> Self {
        self.script.lock().push_back(Ok(verdict));
        self
    }

    #[must_use]
    pub fn then_fail(self) -> Self {
        self.script.lock().push_back(Err(()));
        self
    }

    /// Contexts received so far.
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().clone()
    }
}

#[cfg(test)]
impl IntentClassifier for ScriptedClassifier {
    fn classify(&self, context: &str) -> Result<IntentVerdict, ClassifierError> {
        self.contexts.lock().push(context.to_string());
        match self.script.lock().pop_front() {
            Some(Ok(verdict)) => Ok(verdict),
            Some(Err(())) => Err(ClassifierError::Request(crate::openai::OpenAiError::Status {
                endpoint: "chat/completions".to_string(),
                status: 503,
                message: "scripted failure".to_string(),
            })),
            None => Ok(self.default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Step, TaskId};
    use crate::openai::OpenAiError;

    fn task() -> Task {
        Task {
            id: TaskId::new("t"),
            title: "Filter a report".into(),
            intro: String::new(),
            steps: vec![Step {
                step_num: 1,
                summary: None,
                text: "Click the filter button".into(),
                keywords: Vec::new(),
                images: Vec::new(),
            }],
        }
    }

    #[test]
    fn test_verdict_parsing() {
        assert_eq!(IntentVerdict::parse("reject"), IntentVerdict::Reject);
        assert_eq!(IntentVerdict::parse("  REJECT\n"), IntentVerdict::Reject);
        assert_eq!(IntentVerdict::parse("Confirm"), IntentVerdict::Confirm);
        assert_eq!(IntentVerdict::parse("reject."), IntentVerdict::Unrecognized);
        assert_eq!(IntentVerdict::parse("I would reject"), IntentVerdict::Unrecognized);
        assert!(!IntentVerdict::Unrecognized.is_mismatch());
    }

    #[test]
    fn test_context_includes_step_in_range() {
        let context = mismatch_context(&task(), 0, "what next?");
        assert!(context.contains("Task: Filter a report"));
        assert!(context.contains("Current step: Click the filter button"));
        assert!(context.ends_with("User message: what next?"));
    }

    #[test]
    fn test_context_skips_step_out_of_range() {
        let context = mismatch_context(&task(), 5, "hello");
        assert!(!context.contains("Current step"));
    }

    #[test]
    fn test_failure_policy() {
        assert_eq!(ClassifierFailurePolicy::default(), ClassifierFailurePolicy::FailOpen);
        assert!(!ClassifierFailurePolicy::FailOpen.mismatch_on_failure());
        assert!(ClassifierFailurePolicy::FailClosed.mismatch_on_failure());
        assert_eq!(
            serde_json::to_string(&ClassifierFailurePolicy::FailClosed).unwrap(),
            "\"fail_closed\""
        );
    }

    #[test]
    fn test_scripted_classifier() {
        let classifier = ScriptedClassifier::always(IntentVerdict::Confirm)
            .then(IntentVerdict::Reject)
            .then_fail();
        assert_eq!(classifier.classify("a").unwrap(), IntentVerdict::Reject);
        assert!(classifier.classify("b").is_err());
        assert_eq!(classifier.classify("c").unwrap(), IntentVerdict::Confirm);
        assert_eq!(classifier.contexts(), vec!["a", "b", "c"]);
    }

    struct CannedChat(Result<Option<&'static str>, u16>);

    impl ChatCompletion for CannedChat {
        fn complete(&self, _system: &str, _user: &str) -> Result<Option<String>, OpenAiError> {
            match &self.0 {
                Ok(reply) => Ok(reply.map(|r| r.trim().to_string())),
                Err(status) => Err(OpenAiError::Status {
                    endpoint: "chat/completions".into(),
                    status: *status,
                    message: "unavailable".into(),
                }),
            }
        }
    }

    #[test]
    fn test_blank_or_missing_reply_is_unrecognized() {
        for reply in [Some("   "), Some(""), None] {
            let classifier = OpenAiIntentClassifier::new(CannedChat(Ok(reply)));
            assert_eq!(classifier.classify("ctx").unwrap(), IntentVerdict::Unrecognized);
        }
    }

    #[test]
    fn test_reply_parsed_into_verdict() {
        let classifier = OpenAiIntentClassifier::new(CannedChat(Ok(Some(" Reject\n"))));
        assert_eq!(classifier.classify("ctx").unwrap(), IntentVerdict::Reject);
    }

    #[test]
    fn test_failed_call_is_an_error() {
        let classifier = OpenAiIntentClassifier::new(CannedChat(Err(503)));
        assert!(matches!(
            classifier.classify("ctx"),
            Err(ClassifierError::Request(OpenAiError::Status { status: 503, .. }))
        ));
    }
}
