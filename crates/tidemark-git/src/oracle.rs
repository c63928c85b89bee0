//! Revision oracle backed by the `git` CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tidemark_core::{Marker, PackageDescriptor, RevisionOracle};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("invalid tag date '{0}'")]
    InvalidDate(String),
}

impl From<GitError> for tidemark_core::Error {
    fn from(e: GitError) -> Self {
        tidemark_core::Error::Revision(e.to_string())
    }
}

/// Answers change questions about packages in a local repository.
pub struct GitOracle {
    repo_root: PathBuf,
    /// Project file path relative to the repository root.
    project_file: String,
}

impl GitOracle {
    pub fn new(repo_root: impl Into<PathBuf>, project_file: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            project_file: project_file.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        debug!(args = ?args, "Running git");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Version tags `<name>_v*` reachable from HEAD, newest first.
    pub async fn version_tags(&self, package: &str) -> Result<Vec<Marker>, GitError> {
        let pattern = format!("refs/tags/{}_v*", package);
        let stdout = self
            .git(&[
                "for-each-ref",
                "--merged",
                "HEAD",
                "--sort=-creatordate",
                "--format=%(refname:short)%09%(creatordate:iso-strict)",
                &pattern,
            ])
            .await?;

        stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_tag_line)
            .collect()
    }

    /// Dependency-relevant fields of `package` as declared at `reference`.
    /// `None` when the project file or the package did not exist there.
    async fn manifest_at(
        &self,
        reference: &str,
        package: &str,
    ) -> Result<Option<PackageDescriptor>, GitError> {
        let object = format!("{}:{}", reference, self.project_file);
        let content = match self.git(&["show", &object]).await {
            Ok(content) => content,
            Err(GitError::CommandFailed { stderr, .. }) => {
                debug!(reference = %reference, error = %stderr, "Project file not readable at marker");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match tidemark_config::parse_project(&content) {
            Ok(project) => Ok(project.package(package).cloned()),
            Err(e) => {
                warn!(reference = %reference, error = %e, "Project file at marker does not parse");
                Ok(None)
            }
        }
    }
}

fn parse_tag_line(line: &str) -> Result<Marker, GitError> {
    let (name, date) = line.split_once('\t').unwrap_or((line, ""));
    let marker = Marker::tag(name.trim());
    let date = date.trim();
    if date.is_empty() {
        return Ok(marker);
    }
    let created = DateTime::parse_from_rfc3339(date)
        .map_err(|_| GitError::InvalidDate(date.to_string()))?
        .with_timezone(&Utc);
    Ok(marker.created(created))
}

fn same_manifest(before: &PackageDescriptor, now: &PackageDescriptor) -> bool {
    let set = |v: &[String]| v.iter().cloned().collect::<BTreeSet<_>>();
    before.kind == now.kind
        && set(&before.dependencies) == set(&now.dependencies)
        && set(&before.managed_dependencies) == set(&now.managed_dependencies)
}

#[async_trait]
impl RevisionOracle for GitOracle {
    async fn latest_marker(
        &self,
        package: &PackageDescriptor,
    ) -> tidemark_core::Result<Option<Marker>> {
        let tags = self.version_tags(&package.name).await?;
        Ok(Marker::most_recent(tags))
    }

    async fn changed_since(&self, marker: &Marker, path: &str) -> tidemark_core::Result<bool> {
        let stdout = self
            .git(&["diff", "--name-only", &marker.reference, "HEAD", "--", path])
            .await?;
        Ok(stdout.lines().any(|l| !l.trim().is_empty()))
    }

    async fn dependency_manifest_changed_since(
        &self,
        marker: &Marker,
        package: &PackageDescriptor,
    ) -> tidemark_core::Result<bool> {
        let changed = match self.manifest_at(&marker.reference, &package.name).await? {
            Some(before) => !same_manifest(&before, package),
            None => true,
        };
        Ok(changed)
    }
}
