//! Dependency-aware build scheduling for tidemark.
//!
//! Takes the packages selected by change detection, dispatches them to a
//! [`Builder`](tidemark_core::Builder) with bounded concurrency, gates
//! unlocked packages on their dependencies and cascades failures.

pub mod error;
pub mod report;
pub mod scheduler;
pub mod sink;
pub mod state;

pub use error::{SchedulerError, SchedulerResult};
pub use report::{FailedPackage, RunReport, SucceededPackage};
pub use scheduler::{DEFAULT_CONCURRENCY, DEFAULT_WAIT_BUDGET, DependencyScheduler};
pub use sink::ChannelSink;
pub use state::{Completion, RunState};
