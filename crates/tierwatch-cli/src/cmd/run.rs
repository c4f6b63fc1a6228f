use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tierwatch_core::config::Config;
use tierwatch_core::executor::Outcome;
use tierwatch_core::notify::{notifier_from_config, FanOut, FanOutReport};
use tierwatch_core::run::{Orchestrator, RunReport, RunStatus};

use crate::output::print_table;

pub fn run(root: &Path, now: Option<&str>, notify: bool, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root)?;
    let now = parse_now(now)?;
    let store = super::open_store(root)?;

    let rt = tokio::runtime::Runtime::new()?;
    let orchestrator = Orchestrator::with_store(store.clone());
    let report = rt.block_on(orchestrator.run_once(&config, now))?;
    drop(rt);

    // The webhook client blocks, so drain outside the runtime.
    let delivery = if notify {
        let notifier = notifier_from_config(&config.notifications)?;
        Some(FanOut::new(config.notifications.max_attempts).drain(
            store.as_ref(),
            notifier.as_ref(),
            Utc::now(),
        )?)
    } else {
        None
    };

    if json {
        crate::output::print_json(&serde_json::json!({
            "run": report,
            "notifications": delivery,
        }))?;
        return Ok(());
    }
    print_report(&report);
    if let Some(d) = delivery {
        print_delivery(&d);
    }
    Ok(())
}

pub(crate) fn parse_now(now: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match now {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .with_context(|| format!("invalid --now '{s}': expected RFC 3339")),
    }
}

pub(crate) fn print_report(report: &RunReport) {
    if let RunStatus::Skipped { holder, expires_at } = &report.status {
        println!(
            "run skipped: lease held by {holder} until {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        return;
    }

    let s = &report.summary;
    println!(
        "run {}: {} candidates, {} due, {} applied, {} conflicts, {} failed, {} deferred, {} policy gaps",
        short_id(report),
        s.candidates,
        s.decisions,
        s.applied,
        s.conflicts,
        s.failed,
        s.deferred,
        s.policy_gaps
    );

    if !report.outcomes.is_empty() {
        println!();
        print_table(
            &["TICKET", "PRIORITY", "FROM", "TO", "OUTCOME"],
            report
                .outcomes
                .iter()
                .map(|o| {
                    vec![
                        format!("#{}", o.ticket_id),
                        o.priority.to_string(),
                        o.from.to_string(),
                        o.to.to_string(),
                        describe(&o.outcome),
                    ]
                })
                .collect(),
        );
    }

    for gap in &report.gaps {
        println!(
            "warning: ticket #{} skipped: no rule for {} at {}",
            gap.ticket_id, gap.priority, gap.tier
        );
    }
}

pub(crate) fn print_delivery(d: &FanOutReport) {
    println!(
        "notifications: {} requests, {} delivered, {} skipped, {} failed, {} given up",
        d.requests, d.delivered, d.skipped, d.failed, d.exhausted
    );
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Applied {
            version,
            notification_queued: true,
        } => format!("applied (v{version})"),
        Outcome::Applied { version, .. } => format!("applied (v{version}, notification not queued)"),
        Outcome::Conflict { reason } => format!("conflict: {reason}"),
        Outcome::Failed { error } => format!("failed: {error}"),
        Outcome::Deferred => "deferred".to_string(),
    }
}

fn short_id(report: &RunReport) -> String {
    report.id.simple().to_string()[..8].to_string()
}

