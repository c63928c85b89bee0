//! Builder trait and build result types.
//!
//! A builder performs the actual build of one package. It may take minutes
//! and may be serviced by a remote job; the scheduler only sees the settled
//! result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::package::{PackageDescriptor, PackageKind};
use crate::{Result, RunId};

/// Everything a builder needs to build one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Run this build belongs to.
    pub run_id: RunId,
    /// Branch being built.
    pub branch: String,
    /// Package definition.
    pub package: PackageDescriptor,
    /// The package's dependency manifest changed since its marker.
    pub dependencies_changed: bool,
}

impl BuildRequest {
    pub fn name(&self) -> &str {
        &self.package.name
    }

    pub fn kind(&self) -> PackageKind {
        self.package.kind
    }
}

/// Outcome of a build that settled without error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Opaque handle to the produced artifact. Absent when the build was
    /// accepted but never completed.
    pub artifact_handle: Option<String>,
    /// Version identifier assigned by a remote versioning service.
    pub version_id: Option<String>,
    /// Code coverage gate outcome, reported for `Unlocked` packages.
    pub coverage_passed: Option<bool>,
    /// When the builder settled.
    pub timestamp: DateTime<Utc>,
}

impl BuildResult {
    pub fn with_artifact(handle: impl Into<String>) -> Self {
        Self {
            artifact_handle: Some(handle.into()),
            version_id: None,
            coverage_passed: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn coverage(mut self, passed: bool) -> Self {
        self.coverage_passed = Some(passed);
        self
    }

    #[must_use]
    pub fn version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }
}

/// Trait for package builders.
///
/// Implementations must be idempotent or side-effect isolated: the scheduler
/// may stop waiting on a call without stopping it.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Name of this builder.
    fn name(&self) -> &'static str;

    /// Build one package. An `Err` is a build failure whose message becomes
    /// the package's failure reason.
    async fn build(&self, request: BuildRequest) -> Result<BuildResult>;
}
