//! Package definitions and per-run package state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;
use crate::builder::BuildResult;
use crate::ledger::LedgerRecord;
use crate::revision::Marker;

/// How a package is built.
///
/// Only `Unlocked` packages wait for their in-set dependencies; the other
/// kinds are built independently as soon as they are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Source,
    Data,
    Diff,
    Unlocked,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Source => "source",
            PackageKind::Data => "data",
            PackageKind::Diff => "diff",
            PackageKind::Unlocked => "unlocked",
        }
    }

    /// Whether dispatch of this kind waits on predecessor completion.
    pub fn is_gated(&self) -> bool {
        matches!(self, PackageKind::Unlocked)
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(PackageKind::Source),
            "data" => Ok(PackageKind::Data),
            "diff" => Ok(PackageKind::Diff),
            "unlocked" => Ok(PackageKind::Unlocked),
            other => Err(Error::InvalidInput(format!("unknown package kind: {other}"))),
        }
    }
}

/// A package as declared in the project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Unique package name.
    pub name: String,
    /// Build semantics.
    pub kind: PackageKind,
    /// Directory of the package, relative to the repository root.
    pub path: String,
    /// Declared version number.
    pub version: String,
    /// In-project prerequisites, transitively resolved, in declaration order.
    pub dependencies: Vec<String>,
    /// Externally managed artifacts; never part of build ordering.
    pub managed_dependencies: Vec<String>,
    /// Pipeline stages this package is excluded from.
    pub ignore_on_stage: Vec<String>,
    /// Package-specific build command.
    pub build: Option<String>,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>, kind: PackageKind) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            kind,
            version: "0.0.0".to_string(),
            dependencies: Vec::new(),
            managed_dependencies: Vec::new(),
            ignore_on_stage: Vec::new(),
            build: None,
        }
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Whether the package is excluded for `stage` (case-insensitive).
    pub fn is_ignored_on(&self, stage: &str) -> bool {
        self.ignore_on_stage
            .iter()
            .any(|s| s.eq_ignore_ascii_case(stage))
    }
}

/// Lifecycle state of a package within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    /// Selected for build, not yet handed to the scheduler.
    Pending,
    /// Has unresolved dependencies.
    Waiting,
    /// Can be dispatched.
    Ready,
    /// Dispatched to the builder.
    Building,
    Succeeded,
    Failed,
    /// No completion arrived within the wait budget.
    TimedOut,
    /// Not rebuilt; nothing to do.
    Skipped,
    /// Not rebuilt; a previous error must be fixed first.
    SkippedDueToError,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded
                | NodeStatus::Failed
                | NodeStatus::TimedOut
                | NodeStatus::Skipped
                | NodeStatus::SkippedDueToError
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, NodeStatus::Failed | NodeStatus::TimedOut)
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, NodeStatus::Skipped | NodeStatus::SkippedDueToError)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Waiting => "waiting",
            NodeStatus::Ready => "ready",
            NodeStatus::Building => "building",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::TimedOut => "timed-out",
            NodeStatus::Skipped => "skipped",
            NodeStatus::SkippedDueToError => "skipped-due-to-error",
        };
        f.write_str(s)
    }
}

/// One package under consideration in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageNode {
    pub descriptor: PackageDescriptor,
    /// Declaration index in the project file; breaks scheduling ties.
    pub order: usize,
    /// Why the package was selected (diagnostic only).
    pub build_reason: String,
    /// Diff baseline used by change detection.
    pub marker: Option<Marker>,
    /// The dependency manifest changed since the marker.
    pub dependencies_changed: bool,
    /// Last ledger record for this package on the branch.
    pub prior_outcome: Option<LedgerRecord>,
    pub status: NodeStatus,
    pub error_message: Option<String>,
    pub result_artifact: Option<BuildResult>,
}

impl PackageNode {
    pub fn new(descriptor: PackageDescriptor, order: usize) -> Self {
        Self {
            descriptor,
            order,
            build_reason: String::new(),
            marker: None,
            dependencies_changed: false,
            prior_outcome: None,
            status: NodeStatus::Pending,
            error_message: None,
            result_artifact: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> PackageKind {
        self.descriptor.kind
    }

    pub fn dependency_names(&self) -> &[String] {
        &self.descriptor.dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Unlocked".parse::<PackageKind>().unwrap(), PackageKind::Unlocked);
        assert_eq!("data".parse::<PackageKind>().unwrap(), PackageKind::Data);
        assert!("managed".parse::<PackageKind>().is_err());
    }

    #[test]
    fn test_only_unlocked_is_gated() {
        assert!(PackageKind::Unlocked.is_gated());
        assert!(!PackageKind::Source.is_gated());
        assert!(!PackageKind::Data.is_gated());
        assert!(!PackageKind::Diff.is_gated());
    }

    #[test]
    fn test_terminal_states() {
        assert!(NodeStatus::TimedOut.is_terminal());
        assert!(NodeStatus::TimedOut.is_failure());
        assert!(NodeStatus::SkippedDueToError.is_skip());
        assert!(!NodeStatus::Waiting.is_terminal());
    }

    #[test]
    fn test_stage_exclusion_is_case_insensitive() {
        let mut pkg = PackageDescriptor::new("core", PackageKind::Source);
        pkg.ignore_on_stage = vec!["Prepare".to_string()];
        assert!(pkg.is_ignored_on("prepare"));
        assert!(!pkg.is_ignored_on("build"));
    }
}
