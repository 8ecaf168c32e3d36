//! Keyed session store with per-session locking and idle expiry.
//!
//! The id -> session map is a sharded [`DashMap`]; each session sits behind
//! its own mutex, so operations on different sessions never contend and
//! operations on one session are serialized. The map guard is always
//! released before a session mutex is taken.
//!
//! Every operation refreshes `updated_at` of the session it touches. A
//! session idle longer than the TTL is treated as absent even before a
//! sweep removes it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{Clock, HistoryEntry, LockSnapshot, Session, SessionId, SessionLogger, SystemClock};
use crate::config::SessionConfig;
use crate::corpus::{StepIndex, Task, TaskId};
use crate::error::{SessionError, SessionResult};
use crate::session::state::TaskLock;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

type SessionHandle = Arc<Mutex<Session>>;

#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionHandle>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    history_limit: usize,
    sweep_on_access: bool,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_HISTORY_LIMIT)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration, history_limit: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            clock: Arc::new(SystemClock),
            ttl,
            history_limit,
            sweep_on_access: true,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ttl(), config.history_limit).with_sweep_on_access(config.sweep_on_access)
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_sweep_on_access(mut self, enabled: bool) -> Self {
        self.sweep_on_access = enabled;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Creates a fresh unlocked session, replacing any existing one.
    pub fn init(&self, id: &SessionId) -> SessionLogger {
        self.maybe_sweep();
        let session = Session::new(id.clone(), self.clock.now());
        let logger = session.logger.clone();
        self.sessions
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        debug!("Initialized session {id}");
        logger
    }

    /// Creates the session if it is absent or expired.
    ///
    /// Returns `true` when a new session was created.
    pub fn ensure(&self, id: &SessionId) -> bool {
        self.maybe_sweep();
        let now = self.clock.now();
        self.evict_if_expired(id, now);

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(entry) => {
                entry.get().lock().touch(now);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(Session::new(id.clone(), now))));
                debug!("Created session {id} on first use");
                true
            }
        }
    }

    pub fn get_logger(&self, id: &SessionId) -> Option<SessionLogger> {
        self.read(id, |session| session.logger.clone())
    }

    /// History in call order, oldest first. Empty for unknown sessions.
    pub fn get_history(&self, id: &SessionId) -> Vec<HistoryEntry> {
        self.read(id, |session| session.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_matched_task(&self, id: &SessionId) -> Option<Arc<Task>> {
        self.read(id, |session| {
            session.lock.as_ref().map(|lock| Arc::clone(&lock.task))
        })
        .flatten()
    }

    /// Step cursor; 0 when unlocked or unknown.
    pub fn get_current_step(&self, id: &SessionId) -> usize {
        self.read(id, Session::current_step).unwrap_or(0)
    }

    pub fn get_step_vectors(&self, id: &SessionId) -> Option<Arc<StepIndex>> {
        self.read(id, |session| {
            session
                .lock
                .as_ref()
                .map(|lock| Arc::clone(&lock.step_index))
        })
        .flatten()
    }

    /// Lock, cursor and step index read together.
    pub fn lock_snapshot(&self, id: &SessionId) -> Option<LockSnapshot> {
        self.read(id, Session::snapshot).flatten()
    }

    /// Appends an entry and keeps only the most recent `history_limit`.
    pub fn save_history(
        &self,
        id: &SessionId,
        query: impl Into<String>,
        reply: impl Into<String>,
    ) -> SessionResult<()> {
        let entry = HistoryEntry {
            query: query.into(),
            reply: reply.into(),
        };
        let limit = self.history_limit;
        self.write(id, |session| {
            session.push_history(entry, limit);
            Ok(())
        })
    }

    /// Locks `task` with its step index and resets the cursor to 0.
    ///
    /// Replaces any previous lock in one step.
    pub fn set_matched_task(
        &self,
        id: &SessionId,
        task: Arc<Task>,
        step_index: Arc<StepIndex>,
    ) -> SessionResult<()> {
        self.write(id, |session| {
            debug!("Session {id} locked task '{}'", task.id);
            session.lock = Some(TaskLock {
                task,
                current_step: 0,
                step_index,
            });
            Ok(())
        })
    }

    /// Moves the cursor of the locked task.
    pub fn set_current_step(&self, id: &SessionId, step: usize) -> SessionResult<()> {
        self.write(id, |session| {
            let lock = session.lock.as_mut().ok_or_else(|| SessionError::NotLocked {
                id: id.to_string(),
            })?;
            let len = lock.task.steps.len();
            if step >= len {
                return Err(SessionError::StepOutOfRange { step, len });
            }
            lock.current_step = step;
            Ok(())
        })
    }

    /// Replaces the step index of the locked task.
    pub fn set_step_vectors(&self, id: &SessionId, step_index: Arc<StepIndex>) -> SessionResult<()> {
        self.write(id, |session| {
            let lock = session.lock.as_mut().ok_or_else(|| SessionError::NotLocked {
                id: id.to_string(),
            })?;
            lock.step_index = step_index;
            Ok(())
        })
    }

    /// Moves the cursor only if `task_id` is still the locked task.
    ///
    /// Returns `false` when the lock changed since the caller looked.
    pub fn commit_step(&self, id: &SessionId, task_id: &TaskId, step: usize) -> SessionResult<bool> {
        self.write(id, |session| match session.lock.as_mut() {
            Some(lock) if &lock.task.id == task_id && step < lock.task.steps.len() => {
                lock.current_step = step;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    /// Drops the lock, the cursor and the step index.
    pub fn unlock(&self, id: &SessionId) -> SessionResult<()> {
        self.write(id, |session| {
            session.lock = None;
            Ok(())
        })
    }

    /// Whether the session is present after an expiry sweep.
    pub fn session_exists(&self, id: &SessionId) -> bool {
        let now = self.clock.now();
        self.sweep(now);
        match self.handle(id) {
            Some(handle) => {
                handle.lock().touch(now);
                true
            }
            None => false,
        }
    }

    /// Removes the session. Returns `false` if it did not exist.
    pub fn clear_session(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Removes every session idle longer than the TTL.
    pub fn clear_expired(&self) -> usize {
        self.sweep(self.clock.now())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn maybe_sweep(&self) {
        if self.sweep_on_access {
            self.sweep(self.clock.now());
        }
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        self.sessions.retain(|_, handle| {
            let keep = !handle.lock().is_expired(now, ttl);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!("Expired {removed} sessions");
        }
        removed
    }

    fn evict_if_expired(&self, id: &SessionId, now: DateTime<Utc>) {
        let ttl = self.ttl;
        if self
            .sessions
            .remove_if(id, |_, handle| handle.lock().is_expired(now, ttl))
            .is_some()
        {
            debug!("Session {id} expired");
        }
    }

    /// Live handle for `id`, with the map guard already released.
    fn handle(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Accessors only evict their own entry; full sweeps happen at the
    /// entry points (`init`, `ensure`, `session_exists`) and in
    /// `clear_expired`.
    fn live_handle(&self, id: &SessionId, now: DateTime<Utc>) -> Option<SessionHandle> {
        self.evict_if_expired(id, now);
        self.handle(id)
    }

    fn read<T>(&self, id: &SessionId, f: impl FnOnce(&Session) -> T) -> Option<T> {
        let now = self.clock.now();
        let handle = self.live_handle(id, now)?;
        let mut session = handle.lock();
        session.touch(now);
        Some(f(&session))
    }

    fn write<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session) -> SessionResult<T>,
    ) -> SessionResult<T> {
        let now = self.clock.now();
        let handle = self
            .live_handle(id, now)
            .ok_or_else(|| SessionError::UnknownSession { id: id.to_string() })?;
        let mut session = handle.lock();
        session.touch(now);
        f(&mut session)
    }
}
