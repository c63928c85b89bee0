//! KDL configuration parsing for tidemark.
//!
//! This crate handles parsing of:
//! - Project files (tidemark.kdl): packages, dependencies, externals
//! - Orchestrator settings and external endpoints
//! - Variable interpolation for build commands

pub mod error;
mod nodes;
pub mod project;
pub mod settings;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use project::{Project, load_project, parse_project};
pub use settings::{Endpoint, LedgerSource, Settings};
pub use variables::{GitContext, PackageContext, RunContext, VariableContext};
