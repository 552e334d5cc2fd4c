//! `review` / `gates run`: run all verification gates and print reports.

use crate::gates::{GateOutcome, GateSet};
use anyhow::Result;
use console::style;
use std::path::Path;

pub async fn cmd_review(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let gates = GateSet::standard();
    let results = gates.run_all(&workspace).await;

    let mut failed = false;
    for (name, outcome) in &results {
        match outcome {
            GateOutcome::Pass => println!("{} {name}", style("PASS").green().bold()),
            GateOutcome::Skipped(reason) => {
                println!("{} {name} ({reason})", style("SKIP").dim())
            }
            GateOutcome::Fail(report) => {
                failed = true;
                println!("{} {name}", style("FAIL").red().bold());
                print!("{}", report.describe());
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
