//! Detect, schedule and build.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tidemark_core::{FanoutSink, ProgressSink, ProgressStatus, RunId, StatusEvent};
use tidemark_executor::ShellBuilder;
use tidemark_ledger::WebhookSink;
use tidemark_scheduler::{ChannelSink, DependencyScheduler, RunReport};
use tracing::info;

use super::Workspace;
use super::output::{SkippedPackage, error_report_markdown, print_event, print_report};
use crate::BuildArgs;

const WEBHOOK_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct BuildOutput<'a> {
    report: &'a RunReport,
    skipped: &'a [SkippedPackage],
}

pub async fn run(project_path: &Path, args: BuildArgs) -> Result<()> {
    let workspace = Workspace::load(project_path, args.selection.branch.clone())?;
    let settings = &workspace.project.settings;
    let detector = workspace.detector(&args.selection)?;

    let evaluation = detector
        .evaluate(&workspace.project.packages, &workspace.branch)
        .await;
    let skipped: Vec<SkippedPackage> = evaluation.skipped.iter().map(SkippedPackage::from).collect();
    let nodes = evaluation.into_ordered();

    let run_id = RunId::new();
    info!(
        run_id = %run_id,
        branch = %workspace.branch,
        selected = nodes.len(),
        skipped = skipped.len(),
        "Starting build run"
    );

    let (channel, mut events) = ChannelSink::new((nodes.len() * 4 + skipped.len()).max(1));
    let webhook = settings.webhook.as_ref().map(|w| Arc::new(WebhookSink::from_endpoint(w)));
    let mut sink = FanoutSink::new().with(Arc::new(channel));
    if let Some(webhook) = &webhook {
        sink = sink.with(webhook.clone());
    }
    let sink: Arc<dyn ProgressSink> = Arc::new(sink);

    let quiet = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if !quiet {
                print_event(&event);
            }
        }
    });

    for pkg in &skipped {
        sink.publish(StatusEvent::new(run_id, &pkg.name, ProgressStatus::Skipped).detail(&pkg.reason));
    }

    let mut builder = ShellBuilder::new(&workspace.root).with_variables(workspace.variables.clone());
    if let Some(command) = &settings.build_command {
        builder = builder.with_default_command(command);
    }

    let concurrency = args.concurrency.unwrap_or(settings.concurrency);
    let wait_budget = args
        .wait_minutes
        .map(|m| Duration::from_secs(m * 60))
        .unwrap_or_else(|| settings.wait_budget());

    let scheduler = DependencyScheduler::new(Arc::new(builder))
        .with_sink(sink.clone())
        .with_concurrency(concurrency)
        .with_wait_budget(wait_budget)
        .for_run(run_id, workspace.branch.clone());

    let report = scheduler.run(nodes).await?;

    // The printer ends once every sender is gone.
    drop(scheduler);
    drop(sink);
    printer.await.context("Event printer task failed")?;
    if let Some(webhook) = &webhook {
        webhook.flush(WEBHOOK_FLUSH_TIMEOUT).await;
    }

    if args.json {
        let output = BuildOutput {
            report: &report,
            skipped: &skipped,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report, &skipped);
    }

    if !report.is_success() {
        if let Some(path) = &args.error_report {
            std::fs::write(path, error_report_markdown(&report, &skipped))
                .with_context(|| format!("Failed to write error report: {}", path.display()))?;
            info!(path = %path.display(), "Wrote error report");
        }
        anyhow::bail!(
            "{} package(s) failed: {}",
            report.failed.len(),
            report.failed_names().join(", ")
        );
    }

    Ok(())
}
