//! Core domain types and collaborator traits for tidemark.
//!
//! This crate contains:
//! - Package descriptors, per-run package nodes and their lifecycle states
//! - The Builder trait and build results
//! - The RevisionOracle trait and source-control markers
//! - Ledger records and the LedgerReader/JobMonitor traits
//! - Status events and progress sinks

pub mod builder;
pub mod error;
pub mod id;
pub mod ledger;
pub mod package;
pub mod progress;
pub mod revision;

pub use builder::{BuildRequest, BuildResult, Builder};
pub use error::{Error, Result};
pub use id::RunId;
pub use ledger::{JobMonitor, LedgerReader, LedgerRecord, OutcomeKind};
pub use package::{NodeStatus, PackageDescriptor, PackageKind, PackageNode};
pub use progress::{FanoutSink, NullSink, ProgressSink, ProgressStatus, StatusEvent};
pub use revision::{Marker, MarkerKind, RevisionOracle};
