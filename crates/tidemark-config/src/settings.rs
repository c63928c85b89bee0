//! Orchestrator settings and external endpoint configuration.

use crate::nodes::{get_first_integer_arg, get_first_string_arg, get_string_prop};
use crate::{ConfigError, ConfigResult};
use kdl::KdlNode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default number of concurrent builds.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default time to wait for one package build, in minutes.
pub const DEFAULT_WAIT_MINUTES: u64 = 240;

/// Ledger error text that marks a failure of the remote build service rather
/// than of the package sources.
pub const DEFAULT_INFRA_ERROR_PATTERN: &str = "Unlocked package creation errors";

/// Settings from the `orchestrator` block and the endpoint nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum number of in-flight builds.
    pub concurrency: usize,
    /// Per-package wait budget in minutes.
    pub wait_minutes: u64,
    /// Build command used by packages without their own `build` child.
    pub build_command: Option<String>,
    /// Regular expressions matched against ledger error text.
    pub infra_error_patterns: Vec<String>,
    pub ledger: Option<LedgerSource>,
    pub jobs: Option<Endpoint>,
    pub webhook: Option<Endpoint>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            wait_minutes: DEFAULT_WAIT_MINUTES,
            build_command: None,
            infra_error_patterns: vec![DEFAULT_INFRA_ERROR_PATTERN.to_string()],
            ledger: None,
            jobs: None,
            webhook: None,
        }
    }
}

impl Settings {
    pub fn wait_budget(&self) -> Duration {
        Duration::from_secs(self.wait_minutes * 60)
    }

    /// Compiled infrastructure error patterns.
    pub fn infra_error_matchers(&self) -> ConfigResult<Vec<Regex>> {
        self.infra_error_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidValue {
                    field: "infra-error-pattern".to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

/// Where prior build outcomes are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerSource {
    Http(Endpoint),
    File(PathBuf),
}

/// An HTTP endpoint with an optional token taken from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: Url,
    /// Name of the environment variable holding the authorization token.
    pub token_env: Option<String>,
}

impl Endpoint {
    /// Read the token from the environment, if configured and set.
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty())
    }
}

/// Apply an `orchestrator { ... }` block.
pub(crate) fn parse_orchestrator(node: &KdlNode, settings: &mut Settings) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    let mut patterns = Vec::new();

    for child in children.nodes() {
        match child.name().value() {
            "concurrency" => {
                let value = get_first_integer_arg(child).ok_or_else(|| {
                    ConfigError::MissingField("orchestrator concurrency value".to_string())
                })?;
                if value < 1 {
                    return Err(ConfigError::InvalidValue {
                        field: "concurrency".to_string(),
                        message: format!("must be at least 1, got {}", value),
                    });
                }
                settings.concurrency = usize::try_from(value).map_err(|e| {
                    ConfigError::InvalidValue {
                        field: "concurrency".to_string(),
                        message: e.to_string(),
                    }
                })?;
            }
            "wait-minutes" => {
                let value = get_first_integer_arg(child).ok_or_else(|| {
                    ConfigError::MissingField("orchestrator wait-minutes value".to_string())
                })?;
                settings.wait_minutes =
                    u64::try_from(value).map_err(|e| ConfigError::InvalidValue {
                        field: "wait-minutes".to_string(),
                        message: e.to_string(),
                    })?;
            }
            "build-command" => {
                settings.build_command = get_first_string_arg(child);
            }
            "infra-error-pattern" => {
                if let Some(p) = get_first_string_arg(child) {
                    patterns.push(p);
                }
            }
            _ => {}
        }
    }

    if !patterns.is_empty() {
        settings.infra_error_patterns = patterns;
    }
    settings.infra_error_matchers()?;

    Ok(())
}

/// Parse `ledger url="..."` or `ledger file="..."`.
pub(crate) fn parse_ledger(node: &KdlNode) -> ConfigResult<LedgerSource> {
    if let Some(file) = get_string_prop(node, "file") {
        return Ok(LedgerSource::File(PathBuf::from(file)));
    }
    Ok(LedgerSource::Http(parse_endpoint(node, "ledger")?))
}

/// Parse a node carrying `url=` and optional `token-env=` properties.
pub(crate) fn parse_endpoint(node: &KdlNode, field: &str) -> ConfigResult<Endpoint> {
    let raw = get_string_prop(node, "url")
        .ok_or_else(|| ConfigError::MissingField(format!("{} url", field)))?;
    let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
        field: format!("{} url", field),
        message: e.to_string(),
    })?;

    Ok(Endpoint {
        url,
        token_env: get_string_prop(node, "token-env"),
    })
}
