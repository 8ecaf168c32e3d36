//! Session state held by the store.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::SessionLogger;
use crate::corpus::{StepIndex, Task};

const GENERATED_ID_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Random alphanumeric id.
    pub fn generate() -> Self {
        let id = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One query and the reply given to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub query: String,
    pub reply: String,
}

/// The locked task together with its step cursor and step index.
///
/// Keeping the three together means a session has a step index exactly
/// when it has a locked task.
#[derive(Debug, Clone)]
pub(crate) struct TaskLock {
    pub task: Arc<Task>,
    pub current_step: usize,
    pub step_index: Arc<StepIndex>,
}

/// Consistent view of a session's lock, taken under the session lock.
#[derive(Debug, Clone)]
pub struct LockSnapshot {
    pub task: Arc<Task>,
    pub current_step: usize,
    pub step_index: Arc<StepIndex>,
}

#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) lock: Option<TaskLock>,
    pub(crate) history: VecDeque<HistoryEntry>,
    pub(crate) logger: SessionLogger,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        let logger = SessionLogger::new(&id);
        Self {
            id,
            lock: None,
            history: VecDeque::new(),
            logger,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Step cursor, 0 when unlocked.
    pub fn current_step(&self) -> usize {
        self.lock.as_ref().map_or(0, |lock| lock.current_step)
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Idle strictly longer than `ttl`.
    pub(crate) fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.updated_at)
            .to_std()
            .is_ok_and(|idle| idle > ttl)
    }

    pub(crate) fn push_history(&mut self, entry: HistoryEntry, limit: usize) {
        self.history.push_back(entry);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    pub(crate) fn snapshot(&self) -> Option<LockSnapshot> {
        self.lock.as_ref().map(|lock| LockSnapshot {
            task: Arc::clone(&lock.task),
            current_step: lock.current_step,
            step_index: Arc::clone(&lock.step_index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_eq!(a.as_str().len(), GENERATED_ID_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_history_keeps_most_recent() {
        let mut session = Session::new(SessionId::from("s"), Utc::now());
        for i in 0..5 {
            session.push_history(
                HistoryEntry {
                    query: format!("q{i}"),
                    reply: format!("r{i}"),
                },
                3,
            );
        }
        let queries: Vec<_> = session.history.iter().map(|h| h.query.as_str()).collect();
        assert_eq!(queries, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_expiry_is_strict() {
        let start = Utc::now();
        let session = Session::new(SessionId::from("s"), start);
        let ttl = Duration::from_secs(60);
        assert!(!session.is_expired(start + chrono::Duration::seconds(60), ttl));
        assert!(session.is_expired(start + chrono::Duration::seconds(61), ttl));
        // A clock that moved backwards never expires a session
        assert!(!session.is_expired(start - chrono::Duration::seconds(10), ttl));
    }

    #[test]
    fn test_unlocked_session_cursor_is_zero() {
        let session = Session::new(SessionId::from("s"), Utc::now());
        assert!(!session.is_locked());
        assert_eq!(session.current_step(), 0);
        assert!(session.snapshot().is_none());
    }
}
