//! Change detector - decides which packages need a build in this run.

use futures::future::join_all;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tidemark_core::{
    JobMonitor, LedgerReader, LedgerRecord, Marker, NodeStatus, OutcomeKind, PackageDescriptor,
    PackageKind, PackageNode, Result, RevisionOracle,
};
use tracing::{debug, info, warn};

use crate::reason::{BuildReason, Decision, SkipReason};

/// How packages are selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DetectionMode {
    /// Build only what changed since the package's marker.
    #[default]
    Changed,
    /// Build every in-scope package without consulting the oracle or ledger.
    Full,
}

/// Result of an evaluation.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Packages selected for build, keyed by name.
    pub selected: HashMap<String, PackageNode>,
    /// Packages left out of the run, in declaration order, with their reason
    /// in `build_reason`.
    pub skipped: Vec<PackageNode>,
}

impl Evaluation {
    /// Selected nodes in declaration order.
    pub fn into_ordered(self) -> Vec<PackageNode> {
        let mut nodes: Vec<_> = self.selected.into_values().collect();
        nodes.sort_by_key(|n| n.order);
        nodes
    }
}

/// Combines source control, the build ledger and job liveness into per-package
/// build decisions.
pub struct ChangeDetector {
    oracle: Arc<dyn RevisionOracle>,
    ledger: Option<Arc<dyn LedgerReader>>,
    jobs: Option<Arc<dyn JobMonitor>>,
    infra_patterns: Vec<Regex>,
    mode: DetectionMode,
    stage: Option<String>,
    include: Option<HashSet<String>>,
}

impl ChangeDetector {
    pub fn new(oracle: Arc<dyn RevisionOracle>) -> Self {
        Self {
            oracle,
            ledger: None,
            jobs: None,
            infra_patterns: Vec::new(),
            mode: DetectionMode::Changed,
            stage: None,
            include: None,
        }
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerReader>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[must_use]
    pub fn with_job_monitor(mut self, jobs: Arc<dyn JobMonitor>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Patterns identifying ledger errors caused by the build infrastructure.
    #[must_use]
    pub fn with_infra_patterns(mut self, patterns: Vec<Regex>) -> Self {
        self.infra_patterns = patterns;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: DetectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Omit packages that declare `stage` in `ignore-on-stage`.
    #[must_use]
    pub fn for_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Restrict the run to the named packages.
    #[must_use]
    pub fn include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    fn in_scope(&self, package: &PackageDescriptor) -> bool {
        if let Some(stage) = &self.stage {
            if package.is_ignored_on(stage) {
                debug!(package = %package.name, stage = %stage, "Package excluded for stage");
                return false;
            }
        }
        match &self.include {
            Some(names) => names.contains(&package.name),
            None => true,
        }
    }

    /// Decide, for every package, whether it must be built on `branch`.
    pub async fn evaluate(&self, packages: &[PackageDescriptor], branch: &str) -> Evaluation {
        let in_scope: Vec<(usize, &PackageDescriptor)> = packages
            .iter()
            .enumerate()
            .filter(|(_, p)| self.in_scope(p))
            .collect();

        if self.mode == DetectionMode::Full {
            info!(packages = in_scope.len(), "Full build requested");
            let selected = in_scope
                .into_iter()
                .map(|(order, pkg)| {
                    let mut node = PackageNode::new(pkg.clone(), order);
                    node.build_reason = BuildReason::FullBuild.to_string();
                    (pkg.name.clone(), node)
                })
                .collect();
            return Evaluation {
                selected,
                skipped: Vec::new(),
            };
        }

        let (records, ledger_error) = self.prior_outcomes(branch).await;

        let checks = in_scope.iter().map(|(_, pkg)| {
            let record = records.get(&pkg.name);
            async move {
                match self.check(pkg, record).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(package = %pkg.name, error = %e, "Change detection failed");
                        (Decision::build(BuildReason::DetectionFailed(e.to_string())), None)
                    }
                }
            }
        });
        let decisions = join_all(checks).await;

        let mut nodes: Vec<PackageNode> = Vec::with_capacity(decisions.len());
        for ((order, pkg), (decision, marker)) in in_scope.into_iter().zip(decisions) {
            let decision = match (decision, &ledger_error) {
                (Decision::Skip(_), Some(err)) => {
                    Decision::build(BuildReason::DetectionFailed(err.clone()))
                }
                (decision, _) => decision,
            };

            let mut node = PackageNode::new(pkg.clone(), order);
            node.marker = marker;
            node.prior_outcome = records.get(&pkg.name).cloned();
            apply_decision(&mut node, decision);
            nodes.push(node);
        }

        propagate_dependency_errors(&mut nodes);

        let mut evaluation = Evaluation::default();
        for node in nodes {
            if node.status.is_skip() {
                info!(package = %node.name(), status = %node.status, reason = %node.build_reason, "Package skipped");
                evaluation.skipped.push(node);
            } else {
                info!(package = %node.name(), reason = %node.build_reason, "Package selected for build");
                evaluation.selected.insert(node.name().to_string(), node);
            }
        }
        evaluation
    }

    async fn prior_outcomes(&self, branch: &str) -> (HashMap<String, LedgerRecord>, Option<String>) {
        let Some(ledger) = &self.ledger else {
            return (HashMap::new(), None);
        };
        match ledger.prior_outcomes(branch).await {
            Ok(records) => {
                debug!(branch = %branch, records = records.len(), "Loaded prior outcomes");
                (records, None)
            }
            Err(e) => {
                warn!(branch = %branch, error = %e, "Ledger query failed");
                (HashMap::new(), Some(e.to_string()))
            }
        }
    }

    async fn check(
        &self,
        package: &PackageDescriptor,
        record: Option<&LedgerRecord>,
    ) -> Result<(Decision, Option<Marker>)> {
        let attempted = record.and_then(|r| {
            let marker = Marker::commit(r.commit_id.as_deref()?);
            Some(match r.recorded_at {
                Some(at) => marker.created(at),
                None => marker,
            })
        });
        let tagged = self.oracle.latest_marker(package).await?;
        // The ledger commit comes first so it wins ties with a tag.
        let marker = Marker::most_recent(attempted.into_iter().chain(tagged));

        let Some(marker) = marker else {
            return Ok((Decision::build(BuildReason::NoMarker), None));
        };

        let in_flight = match record {
            Some(r) if r.outcome == OutcomeKind::InProgress => self.job_active(r).await,
            _ => false,
        };

        let source_changed = self.oracle.changed_since(&marker, &package.path).await?;
        let manifest_changed = self
            .oracle
            .dependency_manifest_changed_since(&marker, package)
            .await?;

        if in_flight {
            let reason = if source_changed || manifest_changed {
                SkipReason::Superseded
            } else {
                SkipReason::InFlight
            };
            return Ok((Decision::Skip(reason), Some(marker)));
        }

        if source_changed {
            let decision = Decision::Build {
                reason: BuildReason::SourceChanged,
                dependencies_changed: manifest_changed,
            };
            return Ok((decision, Some(marker)));
        }

        if manifest_changed {
            let decision = Decision::Build {
                reason: BuildReason::DescriptorChanged,
                dependencies_changed: true,
            };
            return Ok((decision, Some(marker)));
        }

        let decision = match record.map(|r| r.outcome) {
            Some(OutcomeKind::Success) => Decision::Skip(SkipReason::UpToDate),
            Some(OutcomeKind::Failed) if self.is_infra_error(record) => {
                Decision::Skip(SkipReason::InfrastructureError)
            }
            Some(OutcomeKind::Failed) => Decision::build(BuildReason::PreviousFailure),
            Some(OutcomeKind::InProgress) | Some(OutcomeKind::Unknown) => {
                Decision::build(BuildReason::NoUsableRecord)
            }
            None => Decision::Skip(SkipReason::UnchangedSinceMarker),
        };
        Ok((decision, Some(marker)))
    }

    async fn job_active(&self, record: &LedgerRecord) -> bool {
        let (Some(jobs), Some(job_id)) = (&self.jobs, record.job_id.as_deref()) else {
            return false;
        };
        match jobs.is_job_active(job_id).await {
            Ok(active) => active,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Job liveness check failed, treating as inactive");
                false
            }
        }
    }

    fn is_infra_error(&self, record: Option<&LedgerRecord>) -> bool {
        let Some(text) = record.and_then(|r| r.error_text.as_deref()) else {
            return false;
        };
        self.infra_patterns.iter().any(|p| p.is_match(text))
    }
}

fn apply_decision(node: &mut PackageNode, decision: Decision) {
    match decision {
        Decision::Build {
            reason,
            dependencies_changed,
        } => {
            node.build_reason = reason.to_string();
            node.dependencies_changed = dependencies_changed;
        }
        Decision::Skip(reason) => {
            node.build_reason = reason.to_string();
            if reason.is_error() {
                node.status = NodeStatus::SkippedDueToError;
                node.error_message = node
                    .prior_outcome
                    .as_ref()
                    .and_then(|r| r.error_text.clone())
                    .or_else(|| Some(reason.to_string()));
            } else {
                node.status = NodeStatus::Skipped;
            }
        }
    }
}

/// Mark unlocked packages whose in-set dependencies carry an unresolved
/// error, until nothing changes.
fn propagate_dependency_errors(nodes: &mut [PackageNode]) {
    loop {
        let errored: HashSet<String> = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::SkippedDueToError)
            .map(|n| n.name().to_string())
            .collect();

        let mut changed = false;
        for node in nodes.iter_mut() {
            if node.kind() != PackageKind::Unlocked || node.status == NodeStatus::SkippedDueToError {
                continue;
            }
            if let Some(dep) = node.dependency_names().iter().find(|d| errored.contains(*d)) {
                let reason = SkipReason::DependencyError;
                node.error_message = Some(format!("{}: {}", reason, dep));
                node.build_reason = reason.to_string();
                node.status = NodeStatus::SkippedDueToError;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tidemark_core::{Error, MarkerKind};

    #[derive(Default)]
    struct MockOracle {
        tags: HashMap<String, Marker>,
        changed_paths: HashSet<String>,
        changed_manifests: HashSet<String>,
        broken: HashSet<String>,
    }

    impl MockOracle {
        fn tagged(mut self, name: &str) -> Self {
            self.tags.insert(name.to_string(), Marker::tag(format!("{}_v1.0.0", name)));
            self
        }

        fn tagged_at(mut self, name: &str, at: DateTime<Utc>) -> Self {
            self.tags.insert(
                name.to_string(),
                Marker::tag(format!("{}_v1.0.0", name)).created(at),
            );
            self
        }

        fn source_changed(mut self, path: &str) -> Self {
            self.changed_paths.insert(path.to_string());
            self
        }

        fn manifest_changed(mut self, name: &str) -> Self {
            self.changed_manifests.insert(name.to_string());
            self
        }
    }

    #[async_trait]
    impl RevisionOracle for MockOracle {
        async fn latest_marker(&self, package: &PackageDescriptor) -> Result<Option<Marker>> {
            if self.broken.contains(&package.name) {
                return Err(Error::Revision("repository unavailable".to_string()));
            }
            Ok(self.tags.get(&package.name).cloned())
        }

        async fn changed_since(&self, _marker: &Marker, path: &str) -> Result<bool> {
            Ok(self.changed_paths.contains(path))
        }

        async fn dependency_manifest_changed_since(
            &self,
            _marker: &Marker,
            package: &PackageDescriptor,
        ) -> Result<bool> {
            Ok(self.changed_manifests.contains(&package.name))
        }
    }

    struct MockLedger {
        records: Option<HashMap<String, LedgerRecord>>,
    }

    impl MockLedger {
        fn with(records: Vec<(&str, LedgerRecord)>) -> Arc<Self> {
            Arc::new(Self {
                records: Some(
                    records
                        .into_iter()
                        .map(|(n, r)| (n.to_string(), r))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl LedgerReader for MockLedger {
        async fn prior_outcomes(&self, _branch: &str) -> Result<HashMap<String, LedgerRecord>> {
            self.records
                .clone()
                .ok_or_else(|| Error::Ledger("connection refused".to_string()))
        }
    }

    struct MockJobs {
        active: HashSet<String>,
    }

    #[async_trait]
    impl JobMonitor for MockJobs {
        async fn is_job_active(&self, job_id: &str) -> Result<bool> {
            if job_id == "broken" {
                return Err(Error::Ledger("timeout".to_string()));
            }
            Ok(self.active.contains(job_id))
        }
    }

    fn source(name: &str) -> PackageDescriptor {
        PackageDescriptor::new(name, PackageKind::Source)
    }

    fn unlocked(name: &str, deps: &[&str]) -> PackageDescriptor {
        PackageDescriptor::new(name, PackageKind::Unlocked).with_dependencies(deps.iter().copied())
    }

    fn infra_patterns() -> Vec<Regex> {
        vec![Regex::new("Unlocked package creation errors").unwrap()]
    }

    #[tokio::test]
    async fn test_no_marker_and_up_to_date() {
        let oracle = MockOracle::default().tagged("E");
        let ledger = MockLedger::with(vec![(
            "E",
            LedgerRecord::new(OutcomeKind::Success).at_commit("abc123"),
        )]);
        let detector = ChangeDetector::new(Arc::new(oracle)).with_ledger(ledger);

        let eval = detector.evaluate(&[source("D"), source("E")], "main").await;

        assert_eq!(eval.selected.len(), 1);
        assert_eq!(eval.selected["D"].build_reason, "no prior version marker");
        assert_eq!(eval.skipped.len(), 1);
        assert_eq!(eval.skipped[0].name(), "E");
        assert_eq!(eval.skipped[0].status, NodeStatus::Skipped);
        assert_eq!(
            eval.skipped[0].build_reason,
            "no changes since last successful build"
        );
    }

    #[tokio::test]
    async fn test_infrastructure_error_is_distinct_skip() {
        let oracle = MockOracle::default();
        let ledger = MockLedger::with(vec![
            (
                "F",
                LedgerRecord::new(OutcomeKind::Failed)
                    .at_commit("abc123")
                    .error("Unlocked package creation errors: service unavailable"),
            ),
            (
                "G",
                LedgerRecord::new(OutcomeKind::Failed)
                    .at_commit("abc123")
                    .error("compile error in Foo.cls"),
            ),
        ]);
        let detector = ChangeDetector::new(Arc::new(oracle))
            .with_ledger(ledger)
            .with_infra_patterns(infra_patterns());

        let eval = detector.evaluate(&[source("F"), source("G")], "main").await;

        assert_eq!(eval.skipped.len(), 1);
        let f = &eval.skipped[0];
        assert_eq!(f.status, NodeStatus::SkippedDueToError);
        assert_eq!(f.build_reason, "unresolved infrastructure error");
        assert!(f.error_message.as_deref().unwrap().contains("service unavailable"));

        assert_eq!(eval.selected["G"].build_reason, "previous build failed");
    }

    #[tokio::test]
    async fn test_source_and_descriptor_changes() {
        let oracle = MockOracle::default()
            .tagged("a")
            .tagged("b")
            .tagged("c")
            .source_changed("a")
            .manifest_changed("a")
            .manifest_changed("b");
        let detector = ChangeDetector::new(Arc::new(oracle));

        let eval = detector
            .evaluate(&[source("a"), source("b"), source("c")], "main")
            .await;

        let a = &eval.selected["a"];
        assert_eq!(a.build_reason, "source changed");
        assert!(a.dependencies_changed);
        assert_eq!(eval.selected["b"].build_reason, "descriptor changed");

        assert_eq!(eval.skipped[0].name(), "c");
        assert_eq!(eval.skipped[0].build_reason, "no changes since version marker");
        assert_eq!(eval.skipped[0].marker, Some(Marker::tag("c_v1.0.0")));
    }

    #[tokio::test]
    async fn test_newest_marker_wins_between_ledger_commit_and_tag() {
        let at = |y, m| Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).unwrap();
        let oracle = MockOracle::default()
            .tagged_at("p", at(2024, 6))
            .tagged_at("q", at(2024, 1));
        let ledger = MockLedger::with(vec![
            (
                "p",
                LedgerRecord {
                    recorded_at: Some(at(2024, 1)),
                    ..LedgerRecord::new(OutcomeKind::Success).at_commit("oldcommit")
                },
            ),
            (
                "q",
                LedgerRecord {
                    recorded_at: Some(at(2024, 6)),
                    ..LedgerRecord::new(OutcomeKind::Success).at_commit("newcommit")
                },
            ),
        ]);
        let detector = ChangeDetector::new(Arc::new(oracle)).with_ledger(ledger);

        let eval = detector.evaluate(&[source("p"), source("q")], "main").await;

        let markers: Vec<_> = eval
            .skipped
            .iter()
            .map(|n| n.marker.as_ref().unwrap().reference.as_str())
            .collect();
        assert_eq!(markers, vec!["p_v1.0.0", "newcommit"]);
        assert_eq!(eval.skipped[0].marker.as_ref().unwrap().kind, MarkerKind::Tag);
    }

    #[tokio::test]
    async fn test_in_progress_records() {
        let oracle = MockOracle::default().source_changed("busy-changed");
        let in_progress = |job: &str| {
            LedgerRecord::new(OutcomeKind::InProgress)
                .at_commit("abc123")
                .job(job)
        };
        let ledger = MockLedger::with(vec![
            ("busy-changed", in_progress("job-1")),
            ("busy-same", in_progress("job-2")),
            ("stale", in_progress("job-3")),
            ("flaky", in_progress("broken")),
        ]);
        let jobs = MockJobs {
            active: ["job-1", "job-2"].into_iter().map(String::from).collect(),
        };
        let detector = ChangeDetector::new(Arc::new(oracle))
            .with_ledger(ledger)
            .with_job_monitor(Arc::new(jobs));

        let packages = [
            source("busy-changed"),
            source("busy-same"),
            source("stale"),
            source("flaky"),
        ];
        let eval = detector.evaluate(&packages, "main").await;

        let reasons: Vec<_> = eval
            .skipped
            .iter()
            .map(|n| (n.name(), n.build_reason.as_str()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("busy-changed", "superseded by a newer in-flight job"),
                ("busy-same", "no material change; let the in-flight job finish"),
            ]
        );
        assert_eq!(eval.selected["stale"].build_reason, "no usable prior record");
        assert_eq!(eval.selected["flaky"].build_reason, "no usable prior record");
    }

    #[tokio::test]
    async fn test_dependency_error_propagates_to_unlocked() {
        let oracle = MockOracle::default().source_changed("d").source_changed("e");
        let ledger = MockLedger::with(vec![
            (
                "base",
                LedgerRecord::new(OutcomeKind::Failed)
                    .at_commit("abc123")
                    .error("Unlocked package creation errors"),
            ),
            ("c", LedgerRecord::new(OutcomeKind::Success).at_commit("abc123")),
            ("d", LedgerRecord::new(OutcomeKind::Success).at_commit("abc123")),
            ("e", LedgerRecord::new(OutcomeKind::Success).at_commit("abc123")),
        ]);
        let detector = ChangeDetector::new(Arc::new(oracle))
            .with_ledger(ledger)
            .with_infra_patterns(infra_patterns());

        let mut e = source("e");
        e.dependencies = vec!["base".to_string()];
        let packages = [
            unlocked("base", &[]),
            unlocked("c", &["base"]),
            unlocked("d", &["c"]),
            e,
        ];
        let eval = detector.evaluate(&packages, "main").await;

        let errored: Vec<_> = eval
            .skipped
            .iter()
            .filter(|n| n.status == NodeStatus::SkippedDueToError)
            .map(|n| n.name())
            .collect();
        assert_eq!(errored, vec!["base", "c", "d"]);
        assert_eq!(eval.skipped[2].build_reason, "dependency carries unresolved error");

        // Non-unlocked packages are not gated on their dependencies.
        assert!(eval.selected.contains_key("e"));
    }

    #[tokio::test]
    async fn test_ledger_failure_selects_would_be_skips() {
        let oracle = MockOracle::default().tagged("a").tagged("b").source_changed("b");
        let ledger = Arc::new(MockLedger { records: None });
        let detector = ChangeDetector::new(Arc::new(oracle)).with_ledger(ledger);

        let eval = detector.evaluate(&[source("a"), source("b")], "main").await;

        assert!(eval.skipped.is_empty());
        assert_eq!(
            eval.selected["a"].build_reason,
            "change detection failed: ledger query failed: connection refused"
        );
        assert_eq!(eval.selected["b"].build_reason, "source changed");
    }

    #[tokio::test]
    async fn test_oracle_failure_selects_package() {
        let mut oracle = MockOracle::default();
        oracle.broken.insert("a".to_string());
        let detector = ChangeDetector::new(Arc::new(oracle));

        let eval = detector.evaluate(&[source("a")], "main").await;

        assert!(eval.selected["a"]
            .build_reason
            .starts_with("change detection failed:"));
    }

    #[tokio::test]
    async fn test_scope_filters_and_full_mode() {
        let mut prepare_only = source("b");
        prepare_only.ignore_on_stage = vec!["build".to_string()];
        let packages = [source("a"), prepare_only, source("c")];

        let detector = ChangeDetector::new(Arc::new(MockOracle::default()))
            .with_mode(DetectionMode::Full)
            .for_stage("build")
            .include(["a", "b"]);

        let eval = detector.evaluate(&packages, "main").await;

        assert_eq!(eval.selected.len(), 1);
        assert_eq!(
            eval.selected["a"].build_reason,
            "activated as part of full build"
        );
        let ordered = eval.into_ordered();
        assert_eq!(ordered[0].order, 0);
    }
}
