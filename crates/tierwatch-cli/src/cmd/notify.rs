use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use std::path::Path;
use tierwatch_core::config::Config;
use tierwatch_core::notify::{notifier_from_config, FanOut};
use tierwatch_core::store::NotificationQueue;

use crate::output::{print_json, print_table};

#[derive(Subcommand)]
pub enum NotifySubcommand {
    /// Deliver every pending notification once
    Drain,

    /// List notifications still waiting for delivery
    Pending,
}

pub fn run(root: &Path, subcmd: NotifySubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let store = super::open_store(root)?;

    match subcmd {
        NotifySubcommand::Drain => {
            let notifier = notifier_from_config(&config.notifications)?;
            let report = FanOut::new(config.notifications.max_attempts).drain(
                store.as_ref(),
                notifier.as_ref(),
                Utc::now(),
            )?;
            if json {
                print_json(&report)?;
            } else {
                super::run::print_delivery(&report);
            }
            Ok(())
        }

        NotifySubcommand::Pending => {
            let pending = store.pending()?;
            if json {
                print_json(&pending)?;
                return Ok(());
            }
            if pending.is_empty() {
                println!("no pending notifications");
                return Ok(());
            }
            print_table(
                &["TICKET", "FROM", "TO", "ATTEMPTS", "OUTSTANDING"],
                pending
                    .iter()
                    .map(|n| {
                        vec![
                            format!("#{}", n.request.ticket_id),
                            n.request.from.to_string(),
                            n.request.to.to_string(),
                            n.attempts.to_string(),
                            n.outstanding()
                                .iter()
                                .map(|r| r.to_string())
                                .collect::<Vec<_>>()
                                .join(", "),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }
    }
}
