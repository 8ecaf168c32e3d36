//! The task/step state machine.
//!
//! A session is either unlocked or locked to one task with a step cursor.
//! For each query:
//! 1. The query is embedded once.
//! 2. If unlocked, or locked and the classifier reports a topic switch,
//!    the task corpus is searched. A hit replaces the lock, cursor and step
//!    index together; a miss returns `NoTaskMatch` and keeps any old lock.
//! 3. The step index of the locked task is searched. A hit moves the cursor.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    ClassifierFailurePolicy, DEFAULT_STEP_THRESHOLD, IntentClassifier, MatchResult,
    mismatch_context,
};
use crate::corpus::{StepIndex, TaskCorpusIndex, TaskHit};
use crate::error::{CorpusError, EngineResult};
use crate::session::{LockSnapshot, SessionId, SessionLogger, SessionStore};
use crate::vector::EmbeddingGenerator;

pub struct MatchEngine {
    corpus: Arc<TaskCorpusIndex>,
    sessions: Arc<SessionStore>,
    embedder: Arc<dyn EmbeddingGenerator>,
    classifier: Arc<dyn IntentClassifier>,
    failure_policy: ClassifierFailurePolicy,
    step_threshold: f32,
}

impl MatchEngine {
    pub fn new(
        corpus: Arc<TaskCorpusIndex>,
        sessions: Arc<SessionStore>,
        embedder: Arc<dyn EmbeddingGenerator>,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Self {
        Self {
            corpus,
            sessions,
            embedder,
            classifier,
            failure_policy: ClassifierFailurePolicy::default(),
            step_threshold: DEFAULT_STEP_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: ClassifierFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_step_threshold(mut self, threshold: f32) -> Self {
        self.step_threshold = threshold;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn corpus(&self) -> &Arc<TaskCorpusIndex> {
        &self.corpus
    }

    /// Runs one query through the state machine for `session_id`.
    ///
    /// Unknown or expired sessions start unlocked. Blocks on the embedding
    /// provider and the classifier.
    pub fn process(&self, session_id: &SessionId, query: &str) -> EngineResult<MatchResult> {
        self.sessions.ensure(session_id);
        let logger = self
            .sessions
            .get_logger(session_id)
            .unwrap_or_else(|| SessionLogger::new(session_id));
        logger.start_timer();
        logger.info(&format!("Received query: {query}"));

        let query_vector = self.embed_query(query)?;
        logger.log_time("Query embedded");

        let snapshot = self.sessions.lock_snapshot(session_id);
        let needs_task_search = match &snapshot {
            None => true,
            Some(lock) => self.is_mismatch(lock, query, &logger),
        };

        let (task, step_index) = match (needs_task_search, snapshot) {
            (false, Some(lock)) => (lock.task, lock.step_index),
            _ => match self.corpus.search(&query_vector)? {
                None => {
                    logger.log_time("No task within threshold");
                    return Ok(MatchResult::NoTaskMatch);
                }
                Some(hit) => self.lock_task(session_id, hit, &logger)?,
            },
        };

        let Some(hit) = step_index.search(&query_vector, self.step_threshold)? else {
            logger.log_time("No step within threshold");
            return Ok(MatchResult::NoStepMatch { task });
        };

        let step = match task.step(hit.step_offset) {
            Some(step) => step.clone(),
            None => return Ok(MatchResult::NoStepMatch { task }),
        };
        if !self
            .sessions
            .commit_step(session_id, &task.id, hit.step_offset)?
        {
            debug!("Session {session_id} changed task while resolving the step");
        }
        logger.log_time(&format!(
            "Matched step {} of '{}' at distance {}",
            step.step_num, task.title, hit.distance
        ));

        Ok(MatchResult::Matched {
            task,
            step,
            step_index: hit.step_offset,
        })
    }

    /// Nearest task for `query` without touching any session.
    pub fn match_task(&self, query: &str) -> EngineResult<Option<TaskHit>> {
        nearest_task(&self.corpus, self.embedder.as_ref(), query)
    }

    fn embed_query(&self, query: &str) -> EngineResult<Vec<f32>> {
        embed_for(&self.corpus, self.embedder.as_ref(), query)
    }

    fn is_mismatch(&self, lock: &LockSnapshot, query: &str, logger: &SessionLogger) -> bool {
        let context = mismatch_context(&lock.task, lock.current_step, query);
        match self.classifier.classify(&context) {
            Ok(verdict) => {
                logger.log_time(&format!("Intent classified as {verdict:?}"));
                verdict.is_mismatch()
            }
            Err(e) => {
                let mismatch = self.failure_policy.mismatch_on_failure();
                warn!(
                    parent: logger.span(),
                    "Intent classifier failed ({e}), {:?} -> mismatch = {mismatch}",
                    self.failure_policy
                );
                mismatch
            }
        }
    }

    /// Builds the step index for a newly matched task and installs it
    /// together with the task. The embedding call runs without any session
    /// lock held.
    fn lock_task(
        &self,
        session_id: &SessionId,
        hit: TaskHit,
        logger: &SessionLogger,
    ) -> EngineResult<(Arc<crate::corpus::Task>, Arc<StepIndex>)> {
        logger.log_time(&format!(
            "Task matched: '{}' at distance {}",
            hit.task.title, hit.distance
        ));

        let step_index = match StepIndex::build(&hit.task, self.embedder.as_ref()) {
            Ok(index) => index,
            Err(CorpusError::NoEmbeddableSteps { task_id }) => {
                warn!(parent: logger.span(), "Task '{task_id}' has no embeddable steps");
                StepIndex::empty(self.embedder.dimension())
            }
            Err(e) => return Err(e.into()),
        };
        let step_index = Arc::new(step_index);
        logger.log_time("Step index built");

        self.sessions
            .set_matched_task(session_id, Arc::clone(&hit.task), Arc::clone(&step_index))?;
        Ok((hit.task, step_index))
    }
}

/// Embeds `query` and searches the corpus. Needs no session store and no
/// classifier.
pub fn nearest_task(
    corpus: &TaskCorpusIndex,
    embedder: &dyn EmbeddingGenerator,
    query: &str,
) -> EngineResult<Option<TaskHit>> {
    let query_vector = embed_for(corpus, embedder, query)?;
    Ok(corpus.search(&query_vector)?)
}

fn embed_for(
    corpus: &TaskCorpusIndex,
    embedder: &dyn EmbeddingGenerator,
    query: &str,
) -> EngineResult<Vec<f32>> {
    let vector = embedder.embed(query)?;
    corpus.dimension().validate_vector(&vector)?;
    Ok(vector)
}
