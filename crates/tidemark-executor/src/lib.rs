//! Package build backends for tidemark.
//!
//! Provides builder implementations:
//! - Shell (runs a configured command per package)

pub mod shell;

pub use shell::ShellBuilder;
pub use tidemark_core::{BuildRequest, BuildResult, Builder};
