//! Task corpus: task records, the startup-loaded task index, per-session
//! step indexes, and the offline corpus builder.

mod builder;
mod index;
mod step_index;
mod task;

pub use builder::{BuildReport, CorpusBuilder, TASK_FILE};
pub use index::{TASK_VECTORS_FILE, TaskCorpusIndex, TaskHit};
pub use step_index::{StepHit, StepIndex};
pub use task::{Step, Task, TaskId};
