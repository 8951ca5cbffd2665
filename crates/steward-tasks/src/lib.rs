//! The autonomous plane: a persistent FIFO task queue and the background
//! runner that decomposes goals into subtasks, executes them under
//! least-privilege tool hints with retries and re-delegation, scores the
//! result with a critic, and delivers chunked reports.

pub mod critic;
pub mod decompose;
pub mod error;
pub mod queue;
pub mod runner;
pub mod templates;
pub mod tool;
pub mod types;

pub use error::TaskError;
pub use queue::TaskQueue;
pub use runner::{SubtaskExecutor, TaskRunner, TaskRunnerConfig};
pub use types::{Task, TaskStatus};
