//! Dependency scheduler - builds selected packages in dependency order with
//! bounded concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tidemark_core::{
    BuildRequest, BuildResult, Builder, NullSink, PackageNode, ProgressSink, ProgressStatus,
    RunId, StatusEvent,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::report::RunReport;
use crate::state::{Completion, RunState};
use crate::SchedulerResult;

/// Default number of concurrent builds.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default time to wait for one package build.
pub const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(240 * 60);

/// Completion of one dispatched build.
#[derive(Debug)]
struct Notification {
    package: String,
    outcome: Result<BuildResult, String>,
}

/// Drives a run: dispatches ready packages to the builder, applies
/// completions and timeouts, and reports the terminal state of every package.
pub struct DependencyScheduler {
    builder: Arc<dyn Builder>,
    sink: Arc<dyn ProgressSink>,
    concurrency: usize,
    wait_budget: Duration,
    run_id: RunId,
    branch: String,
}

impl DependencyScheduler {
    pub fn new(builder: Arc<dyn Builder>) -> Self {
        Self {
            builder,
            sink: Arc::new(NullSink),
            concurrency: DEFAULT_CONCURRENCY,
            wait_budget: DEFAULT_WAIT_BUDGET,
            run_id: RunId::new(),
            branch: String::new(),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Maximum number of outstanding builder calls. Values below 1 are
    /// raised to 1.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_wait_budget(mut self, budget: Duration) -> Self {
        self.wait_budget = budget;
        self
    }

    #[must_use]
    pub fn for_run(mut self, run_id: RunId, branch: impl Into<String>) -> Self {
        self.run_id = run_id;
        self.branch = branch.into();
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Build every node, honoring dependency gates, until each one is settled.
    pub async fn run(&self, nodes: Vec<PackageNode>) -> SchedulerResult<RunReport> {
        let mut state = RunState::new(nodes)?;
        info!(
            run_id = %self.run_id,
            packages = state.len(),
            concurrency = self.concurrency,
            "Starting run"
        );

        for node in state.nodes_in_order() {
            self.publish(node.name(), ProgressStatus::Queued, Some(node.build_reason.as_str()));
        }

        // Every dispatch sends exactly one notification, so sends never block.
        let (tx, mut rx) = mpsc::channel::<Notification>(state.len().max(1));
        let mut deadlines: HashMap<String, Instant> = HashMap::new();
        let mut tasks: HashMap<String, JoinHandle<()>> = HashMap::new();
        // Timed-out calls still hold their slot until they report or their
        // grace deadline passes.
        let mut abandoned: HashMap<String, Instant> = HashMap::new();

        loop {
            while state.building_count() + abandoned.len() < self.concurrency {
                let Some(node) = state.next_ready() else {
                    break;
                };
                let request = self.request_for(node);
                let name = request.package.name.clone();
                deadlines.insert(name.clone(), Instant::now() + self.wait_budget);
                tasks.insert(name, self.dispatch(request, tx.clone()));
            }

            for name in state.fail_unsatisfiable() {
                error!(package = %name, "Dependencies can never be satisfied");
                self.publish(&name, ProgressStatus::Failed, Some("dependencies can never be satisfied"));
            }

            if state.is_finished() {
                break;
            }

            let Some(next_wakeup) = deadlines.values().chain(abandoned.values()).min().copied()
            else {
                // Nothing in flight and nothing dispatchable.
                break;
            };

            tokio::select! {
                Some(notification) = rx.recv() => {
                    let Notification { package, outcome } = notification;
                    tasks.remove(&package);
                    let completion = state.complete(&package, outcome);
                    if completion != Completion::Ignored {
                        deadlines.remove(&package);
                        self.report_completion(&state, &package, completion);
                    } else if abandoned.remove(&package).is_some() {
                        info!(package = %package, "Late completion after timeout, releasing slot");
                    } else {
                        warn!(package = %package, "Ignoring stale completion notification");
                    }
                }
                _ = sleep_until(next_wakeup) => {
                    let now = Instant::now();
                    let expired: Vec<String> = deadlines
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(name, _)| name.clone())
                        .collect();
                    for name in expired {
                        deadlines.remove(&name);
                        let reason = format!(
                            "no completion within wait budget of {}s",
                            self.wait_budget.as_secs()
                        );
                        warn!(package = %name, budget_secs = self.wait_budget.as_secs(), "Build timed out");
                        let completion = state.time_out(&name, reason);
                        self.report_completion(&state, &name, completion);
                        abandoned.insert(name, now + self.wait_budget);
                    }

                    let lost: Vec<String> = abandoned
                        .iter()
                        .filter(|(_, grace)| **grace <= now)
                        .map(|(name, _)| name.clone())
                        .collect();
                    for name in lost {
                        abandoned.remove(&name);
                        warn!(package = %name, "Abandoned build never reported, aborting it");
                        if let Some(task) = tasks.remove(&name) {
                            task.abort();
                            // The slot is free only once the call is dropped.
                            let _ = task.await;
                        }
                    }
                }
            }
        }

        if !abandoned.is_empty() {
            debug!(pending = abandoned.len(), "Run finished with timed-out builds still running");
        }

        let report = state.into_report(self.run_id);
        info!(
            run_id = %self.run_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Run finished"
        );
        Ok(report)
    }

    fn request_for(&self, node: &PackageNode) -> BuildRequest {
        BuildRequest {
            run_id: self.run_id,
            branch: self.branch.clone(),
            package: node.descriptor.clone(),
            dependencies_changed: node.dependencies_changed,
        }
    }

    fn dispatch(&self, request: BuildRequest, tx: mpsc::Sender<Notification>) -> JoinHandle<()> {
        let builder = self.builder.clone();
        let package = request.package.name.clone();

        info!(package = %package, kind = %request.package.kind, builder = builder.name(), "Dispatching build");
        self.publish(&package, ProgressStatus::InProgress, None);

        tokio::spawn(async move {
            let outcome = builder.build(request).await.map_err(|e| e.to_string());
            if tx.send(Notification { package, outcome }).await.is_err() {
                debug!("Run finished before build completion arrived");
            }
        })
    }

    fn report_completion(&self, state: &RunState, name: &str, completion: Completion) {
        match completion {
            Completion::Succeeded { unlocked } => {
                info!(package = %name, "Build succeeded");
                let artifact = state
                    .node(name)
                    .and_then(|n| n.result_artifact.as_ref())
                    .and_then(|r| r.artifact_handle.clone());
                self.publish(name, ProgressStatus::Succeeded, artifact.as_deref());
                for dependent in unlocked {
                    debug!(package = %dependent, unlocked_by = %name, "Dependencies satisfied");
                }
            }
            Completion::Failed { reason, cascaded } => {
                error!(package = %name, reason = %reason, "Build failed");
                self.publish(name, ProgressStatus::Failed, Some(reason.as_str()));
                for dependent in cascaded {
                    let detail = state
                        .node(&dependent)
                        .and_then(|n| n.error_message.clone())
                        .unwrap_or_default();
                    info!(package = %dependent, reason = %detail, "Failing dependent");
                    self.publish(&dependent, ProgressStatus::Failed, Some(detail.as_str()));
                }
            }
            Completion::Ignored => {}
        }
    }

    fn publish(&self, package: &str, status: ProgressStatus, detail: Option<&str>) {
        let mut event = StatusEvent::new(self.run_id, package, status);
        if let Some(detail) = detail.filter(|d| !d.is_empty()) {
            event = event.detail(detail);
        }
        self.sink.publish(event);
    }
}
