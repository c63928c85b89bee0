//! Per-run node state machine.
//!
//! `RunState` owns every node of a run and applies dispatches, completions,
//! timeouts and failure cascades. It performs no I/O; the coordinator loop in
//! [`crate::scheduler`] drives it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tidemark_core::{BuildResult, NodeStatus, PackageKind, PackageNode, RunId};
use tracing::{debug, warn};

use crate::report::RunReport;
use crate::{SchedulerError, SchedulerResult};

/// Dispatch priority classes; lower runs first.
const PRIORITY_UNGATED: u8 = 0;
const PRIORITY_GATED_ROOT: u8 = 1;
const PRIORITY_UNLOCKED: u8 = 2;

/// Effect of applying a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The node succeeded; `unlocked` became ready as a result.
    Succeeded { unlocked: Vec<String> },
    /// The node failed; `cascaded` were failed because they depend on it.
    Failed {
        reason: String,
        cascaded: Vec<String>,
    },
    /// Unknown package or node not building. Nothing changed.
    Ignored,
}

pub struct RunState {
    nodes: HashMap<String, PackageNode>,
    /// Unresolved in-set dependencies of each gated node.
    unresolved: HashMap<String, HashSet<String>>,
    /// Gated nodes waiting on each package.
    dependents: HashMap<String, Vec<String>>,
    ready: BTreeSet<(u8, usize, String)>,
    building: HashSet<String>,
}

impl RunState {
    /// Validate the node set and partition it into ready and waiting nodes.
    pub fn new(nodes: Vec<PackageNode>) -> SchedulerResult<Self> {
        let mut by_name = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let name = node.name().to_string();
            if node.dependency_names().contains(&name) {
                return Err(SchedulerError::SelfDependency(name));
            }
            if by_name.insert(name.clone(), node).is_some() {
                return Err(SchedulerError::Duplicate(name));
            }
        }

        if let Some(cycle) = find_cycle(&by_name) {
            return Err(SchedulerError::CycleDetected(cycle));
        }

        let mut state = Self {
            nodes: by_name,
            unresolved: HashMap::new(),
            dependents: HashMap::new(),
            ready: BTreeSet::new(),
            building: HashSet::new(),
        };
        state.partition();
        Ok(state)
    }

    fn partition(&mut self) {
        let names: HashSet<String> = self.nodes.keys().cloned().collect();

        for node in self.nodes.values_mut() {
            let name = node.name().to_string();

            if node.kind() != PackageKind::Unlocked {
                node.status = NodeStatus::Ready;
                self.ready.insert((PRIORITY_UNGATED, node.order, name));
                continue;
            }

            // Dependencies outside the run are already satisfied.
            let in_set: HashSet<String> = node
                .dependency_names()
                .iter()
                .filter(|d| names.contains(*d))
                .cloned()
                .collect();

            if in_set.is_empty() {
                node.status = NodeStatus::Ready;
                self.ready.insert((PRIORITY_GATED_ROOT, node.order, name));
            } else {
                node.status = NodeStatus::Waiting;
                for dep in &in_set {
                    self.dependents
                        .entry(dep.clone())
                        .or_default()
                        .push(name.clone());
                }
                self.unresolved.insert(name, in_set);
            }
        }

        for dependents in self.dependents.values_mut() {
            dependents.sort();
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, name: &str) -> Option<&PackageNode> {
        self.nodes.get(name)
    }

    /// Nodes in declaration order.
    pub fn nodes_in_order(&self) -> Vec<&PackageNode> {
        let mut nodes: Vec<_> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.order);
        nodes
    }

    pub fn building_count(&self) -> usize {
        self.building.len()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// No node is waiting, ready or building.
    pub fn is_finished(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_terminal())
    }

    /// Take the highest-priority ready node and mark it building.
    pub fn next_ready(&mut self) -> Option<&PackageNode> {
        let (_, _, name) = self.ready.pop_first()?;
        let node = self.nodes.get_mut(&name)?;
        node.status = NodeStatus::Building;
        self.building.insert(name);
        Some(node)
    }

    /// Apply a builder completion to a building node.
    pub fn complete(&mut self, name: &str, outcome: Result<BuildResult, String>) -> Completion {
        let Some(node) = self.nodes.get(name) else {
            warn!(package = %name, "Completion for unknown package ignored");
            return Completion::Ignored;
        };
        if node.status != NodeStatus::Building {
            debug!(package = %name, status = %node.status, "Completion for settled package ignored");
            return Completion::Ignored;
        }
        let kind = node.kind();

        match outcome {
            Ok(result) if result.artifact_handle.is_none() => self.fail(
                name,
                NodeStatus::Failed,
                "build did not complete within wait budget".to_string(),
            ),
            Ok(result) if kind == PackageKind::Unlocked && result.coverage_passed != Some(true) => {
                self.fail(
                    name,
                    NodeStatus::Failed,
                    "coverage threshold not met".to_string(),
                )
            }
            Ok(result) => self.succeed(name, result),
            Err(reason) => self.fail(name, NodeStatus::Failed, reason),
        }
    }

    /// Mark a building node as timed out and release its slot.
    pub fn time_out(&mut self, name: &str, reason: String) -> Completion {
        let building = self
            .nodes
            .get(name)
            .is_some_and(|n| n.status == NodeStatus::Building);
        if !building {
            return Completion::Ignored;
        }
        self.fail(name, NodeStatus::TimedOut, reason)
    }

    /// Fail every waiting node when nothing can make progress any more.
    pub fn fail_unsatisfiable(&mut self) -> Vec<String> {
        if !self.building.is_empty() || !self.ready.is_empty() {
            return Vec::new();
        }

        let mut stalled: Vec<(usize, String)> = self
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::Waiting)
            .map(|n| (n.order, n.name().to_string()))
            .collect();
        stalled.sort();

        let mut failed = Vec::with_capacity(stalled.len());
        for (_, name) in stalled {
            if let Some(node) = self.nodes.get_mut(&name) {
                node.status = NodeStatus::Failed;
                node.error_message = Some("dependencies can never be satisfied".to_string());
            }
            self.unresolved.remove(&name);
            failed.push(name);
        }
        failed
    }

    fn succeed(&mut self, name: &str, result: BuildResult) -> Completion {
        self.building.remove(name);
        if let Some(node) = self.nodes.get_mut(name) {
            node.status = NodeStatus::Succeeded;
            node.result_artifact = Some(result);
        }

        let mut unlocked = Vec::new();
        for dependent in self.dependents.get(name).cloned().unwrap_or_default() {
            let Some(pending) = self.unresolved.get_mut(&dependent) else {
                continue;
            };
            pending.remove(name);
            if !pending.is_empty() {
                continue;
            }
            self.unresolved.remove(&dependent);
            if let Some(node) = self.nodes.get_mut(&dependent) {
                if node.status == NodeStatus::Waiting {
                    node.status = NodeStatus::Ready;
                    self.ready
                        .insert((PRIORITY_UNLOCKED, node.order, dependent.clone()));
                    unlocked.push(dependent);
                }
            }
        }

        Completion::Succeeded { unlocked }
    }

    /// Fail `name` and cascade breadth-first to every waiting node gated on it.
    fn fail(&mut self, name: &str, status: NodeStatus, reason: String) -> Completion {
        self.building.remove(name);
        if let Some(node) = self.nodes.get_mut(name) {
            node.status = status;
            node.error_message = Some(reason.clone());
        }

        let mut cascaded = Vec::new();
        let mut queue = VecDeque::from([name.to_string()]);

        while let Some(failed) = queue.pop_front() {
            let failed_reason = self
                .nodes
                .get(&failed)
                .and_then(|n| n.error_message.clone())
                .unwrap_or_default();

            for dependent in self.dependents.get(&failed).cloned().unwrap_or_default() {
                let gated = self
                    .unresolved
                    .get(&dependent)
                    .is_some_and(|pending| pending.contains(&failed));
                if !gated {
                    continue;
                }
                self.unresolved.remove(&dependent);
                if let Some(node) = self.nodes.get_mut(&dependent) {
                    node.status = NodeStatus::Failed;
                    node.error_message =
                        Some(format!("dependency {} failed: {}", failed, failed_reason));
                }
                cascaded.push(dependent.clone());
                queue.push_back(dependent);
            }
        }

        Completion::Failed { reason, cascaded }
    }

    pub fn into_report(self, run_id: RunId) -> RunReport {
        RunReport::from_nodes(run_id, self.nodes.into_values().collect())
    }
}

/// Detect a cycle among in-set dependency edges using DFS.
fn find_cycle(nodes: &HashMap<String, PackageNode>) -> Option<String> {
    let mut visited = HashSet::new();
    let mut rec_stack = Vec::new();

    let mut names: Vec<(usize, &str)> = nodes.values().map(|n| (n.order, n.name())).collect();
    names.sort();

    for (_, name) in names {
        if !visited.contains(name) {
            if let Some(cycle) = dfs_find_cycle(name, nodes, &mut visited, &mut rec_stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_find_cycle<'a>(
    name: &'a str,
    nodes: &'a HashMap<String, PackageNode>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut Vec<&'a str>,
) -> Option<String> {
    visited.insert(name);
    rec_stack.push(name);

    if let Some(node) = nodes.get(name) {
        for dep in node.dependency_names() {
            let Some((dep, _)) = nodes.get_key_value(dep) else {
                continue;
            };
            let dep = dep.as_str();
            if let Some(start) = rec_stack.iter().position(|n| *n == dep) {
                let mut path: Vec<&str> = rec_stack[start..].to_vec();
                path.push(dep);
                return Some(path.join(" -> "));
            }
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_find_cycle(dep, nodes, visited, rec_stack) {
                    return Some(cycle);
                }
            }
        }
    }

    rec_stack.pop();
    None
}
