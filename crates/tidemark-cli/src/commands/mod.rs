//! CLI command implementations.

pub mod build;
pub mod output;
pub mod plan;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidemark_config::{LedgerSource, Project, VariableContext, load_project};
use tidemark_detector::{ChangeDetector, DetectionMode};
use tidemark_git::GitOracle;
use tidemark_ledger::{FileLedger, HttpJobMonitor, HttpLedger};

use crate::SelectionArgs;

/// A loaded project and the repository it lives in.
pub struct Workspace {
    pub project: Project,
    pub root: PathBuf,
    /// Project file name relative to `root`.
    pub project_file: String,
    pub variables: VariableContext,
    pub branch: String,
}

impl Workspace {
    pub fn load(project_path: &Path, branch: Option<String>) -> Result<Self> {
        let project = load_project(project_path)
            .with_context(|| format!("Failed to load project file: {}", project_path.display()))?;

        let root = project_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .canonicalize()
            .context("Failed to resolve repository root")?;

        let project_file = project_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .context("Project path has no file name")?;

        let mut variables = VariableContext::new();
        variables.populate_env();
        variables.populate_git_from_repo(&root.to_string_lossy());

        let branch = match branch {
            Some(branch) => branch,
            None if !variables.git.branch.is_empty() => variables.git.branch.clone(),
            None => anyhow::bail!("Could not determine the branch; pass --branch"),
        };
        variables.git.branch = branch.clone();

        Ok(Self {
            project,
            root,
            project_file,
            variables,
            branch,
        })
    }

    /// Change detector wired to git and to the configured ledger and job service.
    pub fn detector(&self, selection: &SelectionArgs) -> Result<ChangeDetector> {
        let settings = &self.project.settings;
        let oracle = Arc::new(GitOracle::new(&self.root, self.project_file.clone()));

        let mut detector = ChangeDetector::new(oracle)
            .with_infra_patterns(settings.infra_error_matchers()?);

        detector = match &settings.ledger {
            Some(LedgerSource::Http(endpoint)) => {
                detector.with_ledger(Arc::new(HttpLedger::from_endpoint(endpoint)))
            }
            Some(LedgerSource::File(path)) => {
                detector.with_ledger(Arc::new(FileLedger::new(self.root.join(path))))
            }
            None => detector,
        };

        if let Some(jobs) = &settings.jobs {
            detector = detector.with_job_monitor(Arc::new(HttpJobMonitor::from_endpoint(jobs)));
        }
        if selection.all {
            detector = detector.with_mode(DetectionMode::Full);
        }
        if let Some(stage) = &selection.stage {
            detector = detector.for_stage(stage.clone());
        }
        if !selection.include.is_empty() {
            let unknown: Vec<_> = selection
                .include
                .iter()
                .filter(|n| self.project.package(n).is_none())
                .collect();
            if !unknown.is_empty() {
                anyhow::bail!("Unknown packages in --include: {:?}", unknown);
            }
            detector = detector.include(selection.include.iter().cloned());
        }

        Ok(detector)
    }
}

pub fn validate(path: &Path) -> Result<()> {
    let project = load_project(path)
        .with_context(|| format!("Configuration error in {}", path.display()))?;

    println!("Configuration is valid");
    println!("Project: {}", project.name);
    for package in &project.packages {
        let deps = if package.dependencies.is_empty() {
            "-".to_string()
        } else {
            package.dependencies.join(", ")
        };
        println!("  {:<30} {:<9} {}", package.name, package.kind.as_str(), deps);
    }
    if !project.externals.is_empty() {
        println!("External: {}", project.externals.join(", "));
    }
    Ok(())
}
