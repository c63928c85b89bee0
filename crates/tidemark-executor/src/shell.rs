//! Shell builder - runs a package's build command through `sh -c`.
//!
//! The command reports its result by printing directives on stdout:
//!
//! ```text
//! ::artifact::<handle>
//! ::version-id::<id>
//! ::coverage::passed|failed
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use tidemark_config::VariableContext;
use tidemark_core::{BuildRequest, BuildResult, Builder, Error, PackageKind, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Number of stderr lines kept in a failure reason.
const STDERR_TAIL_LINES: usize = 20;

/// Runs build commands in the repository root.
pub struct ShellBuilder {
    repo_root: PathBuf,
    default_command: Option<String>,
    variables: VariableContext,
}

impl ShellBuilder {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            default_command: None,
            variables: VariableContext::default(),
        }
    }

    /// Command used for packages that declare no `build` of their own.
    #[must_use]
    pub fn with_default_command(mut self, command: impl Into<String>) -> Self {
        self.default_command = Some(command.into());
        self
    }

    /// Base variables (git, env, custom) shared by every build.
    #[must_use]
    pub fn with_variables(mut self, variables: VariableContext) -> Self {
        self.variables = variables;
        self
    }

    fn command_for<'a>(&'a self, request: &'a BuildRequest) -> Result<&'a str> {
        request
            .package
            .build
            .as_deref()
            .or(self.default_command.as_deref())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "no build command configured for package '{}'",
                    request.name()
                ))
            })
    }
}

#[async_trait]
impl Builder for ShellBuilder {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn build(&self, request: BuildRequest) -> Result<BuildResult> {
        let ctx = self.variables.for_request(&request);
        let script = ctx.interpolate(self.command_for(&request)?);

        info!(package = %request.name(), command = %script, "Running build command");

        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(&script)
            .current_dir(&self.repo_root)
            .envs(ctx.exported_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::BuildFailed(format!("failed to start build command: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            warn!(package = %request.name(), exit_code = %code, "Build command failed");
            return Err(Error::BuildFailed(format!(
                "exit code {}: {}",
                code,
                tail(&stderr, STDERR_TAIL_LINES)
            )));
        }

        let mut result = parse_directives(&stdout);
        if result.artifact_handle.is_none() && request.kind() != PackageKind::Unlocked {
            result.artifact_handle = Some(format!(
                "{}@{}",
                request.package.name, request.package.version
            ));
        }

        debug!(
            package = %request.name(),
            artifact = ?result.artifact_handle,
            version_id = ?result.version_id,
            coverage = ?result.coverage_passed,
            "Build command finished"
        );

        Ok(result)
    }
}

fn parse_directives(stdout: &str) -> BuildResult {
    let mut result = BuildResult {
        artifact_handle: None,
        version_id: None,
        coverage_passed: None,
        timestamp: Utc::now(),
    };

    for line in stdout.lines().map(str::trim) {
        if let Some(handle) = line.strip_prefix("::artifact::") {
            result.artifact_handle = Some(handle.trim().to_string());
        } else if let Some(id) = line.strip_prefix("::version-id::") {
            result.version_id = Some(id.trim().to_string());
        } else if let Some(coverage) = line.strip_prefix("::coverage::") {
            result.coverage_passed = match coverage.trim() {
                "passed" => Some(true),
                "failed" => Some(false),
                _ => None,
            };
        }
    }

    result
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
