//! Detection-only command.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use super::Workspace;
use super::output::{PlannedPackage, SkippedPackage, print_plan};
use crate::PlanArgs;

#[derive(Serialize)]
struct Plan {
    branch: String,
    selected: Vec<PlannedPackage>,
    skipped: Vec<SkippedPackage>,
}

pub async fn run(project_path: &Path, args: PlanArgs) -> Result<()> {
    let workspace = Workspace::load(project_path, args.selection.branch.clone())?;
    let detector = workspace.detector(&args.selection)?;

    let evaluation = detector
        .evaluate(&workspace.project.packages, &workspace.branch)
        .await;

    let skipped: Vec<SkippedPackage> = evaluation.skipped.iter().map(SkippedPackage::from).collect();
    let selected: Vec<PlannedPackage> = evaluation
        .into_ordered()
        .iter()
        .map(PlannedPackage::from)
        .collect();

    if args.json {
        let plan = Plan {
            branch: workspace.branch,
            selected,
            skipped,
        };
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("Project: {} (branch {})", workspace.project.name, workspace.branch);
        print_plan(&selected, &skipped);
    }

    Ok(())
}
