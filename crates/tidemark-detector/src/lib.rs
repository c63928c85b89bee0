//! Change detection for tidemark.
//!
//! The [`ChangeDetector`] combines a revision oracle, the build ledger and an
//! optional job monitor to decide, per package, whether a run must build it.

mod detector;
mod reason;

pub use detector::{ChangeDetector, DetectionMode, Evaluation};
pub use reason::{BuildReason, Decision, SkipReason};
