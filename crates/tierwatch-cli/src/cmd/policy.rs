use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use tierwatch_core::config::{Config, WarnLevel};
use tierwatch_core::types::format_secs;

#[derive(Subcommand)]
pub enum PolicySubcommand {
    /// Show the escalation ladder and any gaps
    Show,

    /// Validate policy, run settings, owners and notifications
    Validate,
}

pub fn run(root: &Path, subcmd: PolicySubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        PolicySubcommand::Show => show(root, json),
        PolicySubcommand::Validate => validate(root, json),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let policy = config.policy()?;
    let gaps = policy.gaps();

    if json {
        let rules: Vec<_> = policy.rules().collect();
        print_json(&serde_json::json!({
            "max_tier": policy.max_tier(),
            "rules": rules,
            "gaps": gaps
                .iter()
                .map(|(priority, tier)| serde_json::json!({ "priority": priority, "tier": tier }))
                .collect::<Vec<_>>(),
        }))?;
        return Ok(());
    }

    println!(
        "max tier: {} ({})",
        policy.max_tier(),
        policy.max_tier().role()
    );
    println!();
    print_table(
        &["PRIORITY", "AT", "AFTER", "TO"],
        policy
            .rules()
            .map(|r| {
                vec![
                    r.priority.to_string(),
                    r.tier.to_string(),
                    format_secs(r.threshold().num_seconds()),
                    format!("{} ({})", r.next, r.next.role()),
                ]
            })
            .collect(),
    );
    for (priority, tier) in gaps {
        println!("gap: {priority} tickets at {tier} never escalate automatically");
    }
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
