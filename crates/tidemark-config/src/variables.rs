//! Variable interpolation for package build commands.
//!
//! Supports variables like:
//! - `${git.sha}` - Full commit SHA of HEAD
//! - `${git.short_sha}` - Short (7 char) commit SHA
//! - `${git.branch}` - Branch being built
//! - `${package.name}` - Package name
//! - `${package.kind}` - Package kind (`source`, `data`, `diff`, `unlocked`)
//! - `${package.path}` - Package directory
//! - `${package.version}` - Declared version number
//! - `${package.dependencies_changed}` - `true` when the dependency manifest changed
//! - `${run.id}` - Run ID
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tidemark_core::{BuildRequest, PackageDescriptor};

/// Variables available to a build command.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub git: GitContext,
    pub package: PackageContext,
    pub run: RunContext,
    pub env: HashMap<String, String>,
    /// Free-form variables addressed by a single name.
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default)]
pub struct PackageContext {
    pub name: String,
    pub kind: String,
    pub path: String,
    pub version: String,
    pub dependencies_changed: bool,
}

impl From<&PackageDescriptor> for PackageContext {
    fn from(package: &PackageDescriptor) -> Self {
        Self {
            name: package.name.clone(),
            kind: package.kind.to_string(),
            path: package.path.clone(),
            version: package.version.clone(),
            dependencies_changed: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub id: String,
}

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate git context by running git commands in a repo path.
    pub fn populate_git_from_repo(&mut self, repo_path: &str) {
        use std::process::Command;

        let run_git = |args: &[&str]| -> Option<String> {
            Command::new("git")
                .args(args)
                .current_dir(repo_path)
                .output()
                .ok()
                .filter(|o| o.status.success())
                .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        };

        if let Some(sha) = run_git(&["rev-parse", "HEAD"]) {
            self.git.short_sha = sha.chars().take(7).collect();
            self.git.sha = sha;
        }

        if self.git.branch.is_empty() {
            if let Some(branch) = run_git(&["rev-parse", "--abbrev-ref", "HEAD"]) {
                if branch != "HEAD" {
                    self.git.branch = branch;
                }
            }
        }
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        self.env.extend(std::env::vars());
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Derive the context for one build request.
    pub fn for_request(&self, request: &BuildRequest) -> Self {
        let mut ctx = self.clone();
        ctx.package = PackageContext::from(&request.package);
        ctx.package.dependencies_changed = request.dependencies_changed;
        ctx.run.id = request.run_id.to_string();
        ctx.git.branch = request.branch.clone();
        ctx
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["git", "sha"] => Some(self.git.sha.clone()),
            ["git", "short_sha"] => Some(self.git.short_sha.clone()),
            ["git", "branch"] => Some(self.git.branch.clone()),

            ["package", "name"] => Some(self.package.name.clone()),
            ["package", "kind"] => Some(self.package.kind.clone()),
            ["package", "path"] => Some(self.package.path.clone()),
            ["package", "version"] => Some(self.package.version.clone()),
            ["package", "dependencies_changed"] => {
                Some(self.package.dependencies_changed.to_string())
            }

            ["run", "id"] => Some(self.run.id.clone()),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),

            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all `${...}` variables in a string. Unknown variables are
    /// left untouched.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Environment variables exported to build commands.
    pub fn exported_env(&self) -> HashMap<String, String> {
        HashMap::from([
            ("TIDEMARK_PACKAGE".to_string(), self.package.name.clone()),
            ("TIDEMARK_PACKAGE_KIND".to_string(), self.package.kind.clone()),
            ("TIDEMARK_PACKAGE_PATH".to_string(), self.package.path.clone()),
            (
                "TIDEMARK_PACKAGE_VERSION".to_string(),
                self.package.version.clone(),
            ),
            (
                "TIDEMARK_DEPENDENCIES_CHANGED".to_string(),
                self.package.dependencies_changed.to_string(),
            ),
            ("TIDEMARK_BRANCH".to_string(), self.git.branch.clone()),
            ("TIDEMARK_RUN_ID".to_string(), self.run.id.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::{PackageKind, RunId};

    fn request() -> BuildRequest {
        let mut package = PackageDescriptor::new("core", PackageKind::Unlocked).with_path("pkgs/core");
        package.version = "1.4.0".to_string();
        BuildRequest {
            run_id: RunId::new(),
            branch: "main".to_string(),
            package,
            dependencies_changed: true,
        }
    }

    #[test]
    fn test_package_interpolation() {
        let ctx = VariableContext::new().for_request(&request());

        let result = ctx.interpolate("build ${package.name}@${package.version} in ${package.path}");
        assert_eq!(result, "build core@1.4.0 in pkgs/core");
        assert_eq!(ctx.interpolate("${package.kind}"), "unlocked");
        assert_eq!(ctx.interpolate("${package.dependencies_changed}"), "true");
    }

    #[test]
    fn test_branch_comes_from_request() {
        let mut base = VariableContext::new();
        base.git.branch = "develop".to_string();

        let ctx = base.for_request(&request());
        assert_eq!(ctx.interpolate("${git.branch}"), "main");
    }

    #[test]
    fn test_env_variables() {
        let mut ctx = VariableContext::new();
        ctx.env.insert("TOKEN".to_string(), "abc".to_string());

        assert_eq!(ctx.interpolate("t=${env.TOKEN}"), "t=abc");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::new();
        let result = ctx.interpolate("Unknown: ${unknown.var}");
        assert_eq!(result, "Unknown: ${unknown.var}");
    }

    #[test]
    fn test_custom_variables() {
        let mut ctx = VariableContext::new();
        ctx.set("profile", "release");

        assert_eq!(ctx.interpolate("--${profile}"), "--release");
    }

    #[test]
    fn test_exported_env() {
        let ctx = VariableContext::new().for_request(&request());
        let env = ctx.exported_env();

        assert_eq!(env["TIDEMARK_PACKAGE"], "core");
        assert_eq!(env["TIDEMARK_DEPENDENCIES_CHANGED"], "true");
        assert_eq!(env["TIDEMARK_BRANCH"], "main");
    }
}
