//! Session state store: per-session task lock, step cursor, bounded
//! history and step index, with idle expiry.

mod clock;
mod logger;
mod state;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logger::SessionLogger;
pub use state::{HistoryEntry, LockSnapshot, Session, SessionId};
pub use store::{DEFAULT_HISTORY_LIMIT, DEFAULT_TTL, SessionStore};
pub use sweeper::SessionSweeper;
