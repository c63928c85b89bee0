//! Project file parsing.

use crate::nodes::{get_all_string_args, get_first_string_arg, get_string_list_prop, get_string_prop};
use crate::settings::{self, Settings};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tidemark_core::{PackageDescriptor, PackageKind};

/// A parsed and validated project.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    /// Packages in declaration order, dependencies transitively resolved.
    pub packages: Vec<PackageDescriptor>,
    /// Externally managed dependencies; never built by this project.
    pub externals: Vec<String>,
    pub settings: Settings,
    /// Direct in-project dependencies as written, per package.
    declared: HashMap<String, Vec<String>>,
}

impl Project {
    pub fn package(&self, name: &str) -> Option<&PackageDescriptor> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Dependencies as declared in the file, before transitive resolution.
    pub fn declared_dependencies(&self, name: &str) -> Option<&[String]> {
        self.declared.get(name).map(Vec::as_slice)
    }
}

/// Read and parse a project file.
pub fn load_project(path: impl AsRef<Path>) -> ConfigResult<Project> {
    let content = std::fs::read_to_string(path)?;
    parse_project(&content)
}

/// Parse a project from KDL text.
pub fn parse_project(kdl: &str) -> ConfigResult<Project> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut packages = Vec::new();
    let mut externals = Vec::new();
    let mut settings = Settings::default();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;
            }
            "orchestrator" => settings::parse_orchestrator(node, &mut settings)?,
            "ledger" => settings.ledger = Some(settings::parse_ledger(node)?),
            "jobs" => settings.jobs = Some(settings::parse_endpoint(node, "jobs")?),
            "webhook" => settings.webhook = Some(settings::parse_endpoint(node, "webhook")?),
            "external" => externals.extend(get_all_string_args(node)),
            "package" => packages.push(parse_package(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("project name".to_string()));
    }

    let declared = split_dependencies(&mut packages, &externals)?;

    if let Err(cycle) = detect_cycle(&packages, &declared) {
        return Err(ConfigError::CycleDetected(cycle));
    }

    resolve_transitive(&mut packages, &declared);

    Ok(Project {
        name,
        packages,
        externals,
        settings,
        declared,
    })
}

fn parse_package(node: &KdlNode) -> ConfigResult<PackageDescriptor> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("package name".to_string()))?;

    let kind = match get_string_prop(node, "kind") {
        Some(raw) => raw
            .parse::<PackageKind>()
            .map_err(|_| ConfigError::UnknownKind {
                package: name.clone(),
                kind: raw.clone(),
            })?,
        None => PackageKind::Source,
    };

    let version = get_string_prop(node, "version")
        .ok_or_else(|| ConfigError::MissingField(format!("version for package '{}'", name)))?;

    let path = get_string_prop(node, "path").unwrap_or_else(|| name.clone());

    let mut build = None;
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "build" {
                build = get_first_string_arg(child);
            }
        }
    }

    Ok(PackageDescriptor {
        dependencies: get_string_list_prop(node, "depends-on"),
        managed_dependencies: Vec::new(),
        ignore_on_stage: get_string_list_prop(node, "ignore-on-stage"),
        name,
        kind,
        path,
        version,
        build,
    })
}

/// Validate names and separate in-project from external dependencies.
/// Returns the direct in-project dependencies per package.
fn split_dependencies(
    packages: &mut [PackageDescriptor],
    externals: &[String],
) -> ConfigResult<HashMap<String, Vec<String>>> {
    let mut names = HashSet::new();
    for pkg in packages.iter() {
        if !names.insert(pkg.name.clone()) {
            return Err(ConfigError::Duplicate(format!("package '{}'", pkg.name)));
        }
    }

    let mut declared = HashMap::new();
    for pkg in packages.iter_mut() {
        let mut internal = Vec::new();
        for dep in pkg.dependencies.drain(..) {
            if dep == pkg.name {
                return Err(ConfigError::SelfDependency(pkg.name.clone()));
            }
            if names.contains(&dep) {
                if !internal.contains(&dep) {
                    internal.push(dep);
                }
            } else if externals.contains(&dep) {
                if !pkg.managed_dependencies.contains(&dep) {
                    pkg.managed_dependencies.push(dep);
                }
            } else {
                return Err(ConfigError::InvalidReference(format!(
                    "package '{}' depends on unknown package '{}'",
                    pkg.name, dep
                )));
            }
        }
        declared.insert(pkg.name.clone(), internal);
    }

    Ok(declared)
}

/// Replace each package's dependencies with everything it reaches, ordered
/// by declaration order in the project.
fn resolve_transitive(packages: &mut [PackageDescriptor], declared: &HashMap<String, Vec<String>>) {
    let order: Vec<String> = packages.iter().map(|p| p.name.clone()).collect();

    for pkg in packages.iter_mut() {
        let mut reached = HashSet::new();
        let mut stack: Vec<&str> = declared
            .get(&pkg.name)
            .map(|d| d.iter().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(dep) = stack.pop() {
            if reached.insert(dep.to_string()) {
                if let Some(next) = declared.get(dep) {
                    stack.extend(next.iter().map(String::as_str));
                }
            }
        }

        pkg.dependencies = order
            .iter()
            .filter(|name| reached.contains(*name))
            .cloned()
            .collect();
    }
}

/// Detect cycles in the package dependency graph using DFS.
fn detect_cycle(
    packages: &[PackageDescriptor],
    declared: &HashMap<String, Vec<String>>,
) -> Result<(), String> {
    let mut visited = HashSet::new();
    let mut rec_stack = Vec::new();

    for pkg in packages {
        if !visited.contains(pkg.name.as_str()) {
            if let Some(cycle) = dfs_detect_cycle(&pkg.name, declared, &mut visited, &mut rec_stack)
            {
                return Err(cycle);
            }
        }
    }
    Ok(())
}

fn dfs_detect_cycle<'a>(
    node: &'a str,
    declared: &'a HashMap<String, Vec<String>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut Vec<&'a str>,
) -> Option<String> {
    visited.insert(node);
    rec_stack.push(node);

    if let Some(deps) = declared.get(node) {
        for dep in deps {
            let dep = dep.as_str();
            if let Some(start) = rec_stack.iter().position(|n| *n == dep) {
                let mut path: Vec<&str> = rec_stack[start..].to_vec();
                path.push(dep);
                return Some(path.join(" -> "));
            }
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_detect_cycle(dep, declared, visited, rec_stack) {
                    return Some(cycle);
                }
            }
        }
    }

    rec_stack.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LedgerSource;

    #[test]
    fn test_parse_simple_project() {
        let kdl = r#"
            project "acme"

            package "base" path="pkgs/base" version="1.0.0"
        "#;

        let project = parse_project(kdl).unwrap();
        assert_eq!(project.name, "acme");
        assert_eq!(project.packages.len(), 1);
        assert_eq!(project.packages[0].kind, PackageKind::Source);
        assert_eq!(project.packages[0].path, "pkgs/base");
        assert_eq!(project.settings.concurrency, settings::DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_parse_full_project() {
        let kdl = r#"
            project "acme"

            orchestrator {
                concurrency 2
            }

            ledger file="ledger.json"
            webhook url="https://events.example.com/hook" token-env="HOOK_TOKEN"

            external "managed-lib"

            package "base" kind="source" version="1.0.0"

            package "core" kind="unlocked" path="pkgs/core" version="2.1.0" {
                depends-on "base" "managed-lib"
                ignore-on-stage "prepare"
                build "make -C ${package.path}"
            }
        "#;

        let project = parse_project(kdl).unwrap();
        let core = project.package("core").unwrap();

        assert_eq!(core.kind, PackageKind::Unlocked);
        assert_eq!(core.dependencies, vec!["base"]);
        assert_eq!(core.managed_dependencies, vec!["managed-lib"]);
        assert!(core.is_ignored_on("prepare"));
        assert_eq!(core.build.as_deref(), Some("make -C ${package.path}"));
        assert_eq!(project.settings.concurrency, 2);
        assert!(matches!(project.settings.ledger, Some(LedgerSource::File(_))));
        assert!(project.settings.webhook.is_some());
    }

    #[test]
    fn test_dependencies_resolved_transitively() {
        let kdl = r#"
            project "acme"
            package "a" kind="unlocked" version="1.0.0"
            package "b" kind="unlocked" version="1.0.0" depends-on="a"
            package "c" kind="unlocked" version="1.0.0" depends-on="b"
        "#;

        let project = parse_project(kdl).unwrap();
        assert_eq!(project.package("c").unwrap().dependencies, vec!["a", "b"]);
        assert_eq!(project.declared_dependencies("c").unwrap(), ["b"]);
    }

    #[test]
    fn test_detect_missing_dependency() {
        let kdl = r#"
            project "acme"
            package "core" version="1.0.0" depends-on="nonexistent"
        "#;

        let result = parse_project(kdl);
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidReference(_)));
    }

    #[test]
    fn test_detect_self_dependency() {
        let kdl = r#"
            project "acme"
            package "core" version="1.0.0" depends-on="core"
        "#;

        let result = parse_project(kdl);
        assert!(matches!(result.unwrap_err(), ConfigError::SelfDependency(name) if name == "core"));
    }

    #[test]
    fn test_detect_cycle() {
        let kdl = r#"
            project "acme"
            package "a" version="1.0.0" depends-on="c"
            package "b" version="1.0.0" depends-on="a"
            package "c" version="1.0.0" depends-on="b"
        "#;

        let result = parse_project(kdl);
        match result.unwrap_err() {
            ConfigError::CycleDetected(path) => assert_eq!(path, "a -> c -> b -> a"),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind() {
        let kdl = r#"
            project "acme"
            package "core" kind="managed" version="1.0.0"
        "#;

        let result = parse_project(kdl);
        assert!(matches!(result.unwrap_err(), ConfigError::UnknownKind { kind, .. } if kind == "managed"));
    }

    #[test]
    fn test_duplicate_package() {
        let kdl = r#"
            project "acme"
            package "core" version="1.0.0"
            package "core" version="1.1.0"
        "#;

        assert!(matches!(parse_project(kdl).unwrap_err(), ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_version_required() {
        let kdl = r#"
            project "acme"
            package "core"
        "#;

        assert!(matches!(parse_project(kdl).unwrap_err(), ConfigError::MissingField(_)));
    }
}
