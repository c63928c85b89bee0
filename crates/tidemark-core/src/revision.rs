//! Source-control markers and the revision oracle trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;
use crate::package::PackageDescriptor;

/// What kind of reference a marker is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    /// A version tag cut for the package.
    Tag,
    /// The commit of the last ledger-recorded build attempt.
    Commit,
}

/// A source-control reference point used as the diff baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub kind: MarkerKind,
    /// Anything `git` accepts as a revision (tag name or commit id).
    pub reference: String,
    /// When the marker was created, if known.
    pub created_at: Option<DateTime<Utc>>,
}

impl Marker {
    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::Tag,
            reference: name.into(),
            created_at: None,
        }
    }

    pub fn commit(id: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::Commit,
            reference: id.into(),
            created_at: None,
        }
    }

    #[must_use]
    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Pick the most recent of several candidates. Undated markers lose to
    /// dated ones; among equals the first candidate wins.
    pub fn most_recent(candidates: impl IntoIterator<Item = Marker>) -> Option<Marker> {
        candidates.into_iter().fold(None, |best, m| match best {
            None => Some(m),
            Some(b) if m.created_at > b.created_at => Some(m),
            Some(b) => Some(b),
        })
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MarkerKind::Tag => write!(f, "tag:{}", self.reference),
            MarkerKind::Commit => write!(f, "commit:{}", self.reference),
        }
    }
}

/// Answers change questions about packages against source control.
#[async_trait]
pub trait RevisionOracle: Send + Sync {
    /// Latest version marker for the package reachable from HEAD.
    async fn latest_marker(&self, package: &PackageDescriptor) -> Result<Option<Marker>>;

    /// Whether any file under `path` changed between `marker` and HEAD.
    async fn changed_since(&self, marker: &Marker, path: &str) -> Result<bool>;

    /// Whether the package's dependency declarations changed between
    /// `marker` and HEAD.
    async fn dependency_manifest_changed_since(
        &self,
        marker: &Marker,
        package: &PackageDescriptor,
    ) -> Result<bool>;
}
