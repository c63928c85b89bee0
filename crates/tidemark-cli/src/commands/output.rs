//! Terminal and file rendering of plans and run reports.

use serde::Serialize;
use tidemark_core::{NodeStatus, PackageNode, ProgressStatus, StatusEvent};
use tidemark_scheduler::RunReport;

/// A package that detection left out of the run.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedPackage {
    pub name: String,
    pub status: NodeStatus,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&PackageNode> for SkippedPackage {
    fn from(node: &PackageNode) -> Self {
        Self {
            name: node.name().to_string(),
            status: node.status,
            reason: node.build_reason.clone(),
            error: node.error_message.clone(),
        }
    }
}

/// A package selected for build.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedPackage {
    pub name: String,
    pub kind: String,
    pub reason: String,
    pub dependencies_changed: bool,
}

impl From<&PackageNode> for PlannedPackage {
    fn from(node: &PackageNode) -> Self {
        Self {
            name: node.name().to_string(),
            kind: node.kind().to_string(),
            reason: node.build_reason.clone(),
            dependencies_changed: node.dependencies_changed,
        }
    }
}

pub fn print_plan(selected: &[PlannedPackage], skipped: &[SkippedPackage]) {
    println!("--- Build plan ---");
    if selected.is_empty() {
        println!("  nothing to build");
    }
    for pkg in selected {
        println!("  ▶ {:<30} {:<9} {}", pkg.name, pkg.kind, pkg.reason);
    }
    if !skipped.is_empty() {
        println!("\n--- Skipped ---");
        for pkg in skipped {
            let marker = if pkg.status == NodeStatus::SkippedDueToError {
                "✗"
            } else {
                "⊘"
            };
            match &pkg.error {
                Some(error) => println!("  {} {:<30} {}: {}", marker, pkg.name, pkg.reason, error),
                None => println!("  {} {:<30} {}", marker, pkg.name, pkg.reason),
            }
        }
    }
}

pub fn print_event(event: &StatusEvent) {
    let symbol = match event.status {
        ProgressStatus::Queued => "○",
        ProgressStatus::InProgress => "▶",
        ProgressStatus::Succeeded => "✓",
        ProgressStatus::Failed => "✗",
        ProgressStatus::Skipped => "⊘",
    };
    match &event.detail {
        Some(detail) => println!("{} {} ({})", symbol, event.package, detail),
        None => println!("{} {}", symbol, event.package),
    }
}

pub fn print_report(report: &RunReport, skipped: &[SkippedPackage]) {
    println!("\n--- Package Summary ---");
    for pkg in &report.succeeded {
        let artifact = pkg.result.artifact_handle.as_deref().unwrap_or("-");
        match &pkg.result.version_id {
            Some(version) => println!("  ✓ {} - {} ({})", pkg.name, artifact, version),
            None => println!("  ✓ {} - {}", pkg.name, artifact),
        }
    }
    for pkg in &report.failed {
        println!("  ✗ {} - {}: {}", pkg.name, pkg.status, pkg.reason);
    }
    for pkg in skipped {
        match &pkg.error {
            Some(error) => println!("  ⊘ {} - {}: {}", pkg.name, pkg.reason, error),
            None => println!("  ⊘ {} - {}", pkg.name, pkg.reason),
        }
    }

    println!(
        "\n{} succeeded, {} failed, {} skipped",
        report.succeeded.len(),
        report.failed.len(),
        skipped.len()
    );
}

/// Markdown summary of every failed package, for CI job summaries.
pub fn error_report_markdown(report: &RunReport, skipped: &[SkippedPackage]) -> String {
    let mut md = String::new();
    md.push_str(&format!("## Build failures (run {})\n\n", report.run_id));

    if report.failed.is_empty() {
        md.push_str("No package failed.\n");
    } else {
        md.push_str("| Package | Status | Reason |\n");
        md.push_str("|---------|--------|--------|\n");
        for pkg in &report.failed {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                pkg.name,
                pkg.status,
                escape_cell(&pkg.reason)
            ));
        }
    }

    let blocked: Vec<_> = skipped
        .iter()
        .filter(|p| p.status == NodeStatus::SkippedDueToError)
        .collect();
    if !blocked.is_empty() {
        md.push_str("\n### Skipped due to unresolved errors\n\n");
        for pkg in blocked {
            md.push_str(&format!("- **{}**: {}\n", pkg.name, pkg.reason));
            if let Some(error) = &pkg.error {
                md.push_str(&format!("  - `{}`\n", error.replace('`', "'")));
            }
        }
    }

    md
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', "<br>")
}
