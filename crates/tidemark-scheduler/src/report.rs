//! Final outcome of a scheduled run.

use serde::Serialize;
use tidemark_core::{BuildResult, NodeStatus, PackageNode, RunId};

/// A package that built successfully.
#[derive(Debug, Clone, Serialize)]
pub struct SucceededPackage {
    pub name: String,
    pub result: BuildResult,
}

/// A package that failed, timed out or was failed by a dependency.
#[derive(Debug, Clone, Serialize)]
pub struct FailedPackage {
    pub name: String,
    pub status: NodeStatus,
    pub reason: String,
}

/// Terminal state of every scheduled package, in declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub succeeded: Vec<SucceededPackage>,
    pub failed: Vec<FailedPackage>,
}

impl RunReport {
    pub(crate) fn from_nodes(run_id: RunId, mut nodes: Vec<PackageNode>) -> Self {
        nodes.sort_by_key(|n| n.order);

        let mut report = RunReport {
            run_id,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for node in nodes {
            match (node.status, node.result_artifact) {
                (NodeStatus::Succeeded, Some(result)) => report.succeeded.push(SucceededPackage {
                    name: node.descriptor.name,
                    result,
                }),
                (status, _) => report.failed.push(FailedPackage {
                    name: node.descriptor.name,
                    status,
                    reason: node
                        .error_message
                        .unwrap_or_else(|| format!("ended in state {}", status)),
                }),
            }
        }

        report
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn succeeded_names(&self) -> Vec<&str> {
        self.succeeded.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn failure(&self, name: &str) -> Option<&FailedPackage> {
        self.failed.iter().find(|p| p.name == name)
    }
}
