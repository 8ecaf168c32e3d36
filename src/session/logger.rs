//! Per-session logging: a span tagged with the session id plus a lap timer.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Span, info, info_span};

use super::SessionId;

/// Cloneable handle; clones share the same span and lap timer.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    span: Span,
    lap: Arc<Mutex<Option<Instant>>>,
}

impl SessionLogger {
    pub fn new(session_id: &SessionId) -> Self {
        Self {
            span: info_span!("session", id = %session_id),
            lap: Arc::new(Mutex::new(None)),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Starts (or restarts) the lap timer.
    pub fn start_timer(&self) {
        *self.lap.lock() = Some(Instant::now());
    }

    /// Logs `label` with the time since the previous lap, then starts a new lap.
    ///
    /// Returns the elapsed time; zero if the timer was never started.
    pub fn log_time(&self, label: &str) -> Duration {
        let now = Instant::now();
        let elapsed = self
            .lap
            .lock()
            .replace(now)
            .map(|started| now.duration_since(started))
            .unwrap_or_default();
        info!(parent: &self.span, "{label}: {:.2}s", elapsed.as_secs_f64());
        elapsed
    }

    pub fn info(&self, message: &str) {
        info!(parent: &self.span, "{message}");
    }
}
