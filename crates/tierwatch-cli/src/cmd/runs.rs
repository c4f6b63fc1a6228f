use clap::Subcommand;
use std::path::Path;
use tierwatch_core::run::RunStatus;
use tierwatch_core::store::RunLog;

use crate::output::{print_json, print_table};

#[derive(Subcommand)]
pub enum RunsSubcommand {
    /// List recent runs, newest first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

pub fn run(root: &Path, subcmd: RunsSubcommand, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;

    match subcmd {
        RunsSubcommand::List { limit } => {
            let runs = store.recent(limit)?;
            if json {
                print_json(&runs)?;
                return Ok(());
            }
            if runs.is_empty() {
                println!("no runs recorded");
                return Ok(());
            }
            print_table(
                &["STARTED", "STATUS", "APPLIED", "CONFLICTS", "FAILED", "DEFERRED", "GAPS"],
                runs.iter()
                    .map(|r| {
                        let s = &r.summary;
                        vec![
                            r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                            match r.status {
                                RunStatus::Completed => "completed".to_string(),
                                RunStatus::Skipped { .. } => "skipped".to_string(),
                            },
                            s.applied.to_string(),
                            s.conflicts.to_string(),
                            s.failed.to_string(),
                            s.deferred.to_string(),
                            s.policy_gaps.to_string(),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }
    }
}
