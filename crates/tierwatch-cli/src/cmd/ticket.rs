use crate::output::{print_json, print_table, truncate};
use chrono::Utc;
use clap::Subcommand;
use std::path::Path;
use tierwatch_core::paths::validate_category;
use tierwatch_core::store::TicketStore;
use tierwatch_core::ticket::{NewTicket, Ticket};
use tierwatch_core::types::{format_secs, Priority, TicketStatus, Tier};

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum TicketSubcommand {
    /// Add a ticket in OPEN/L1
    Add {
        /// One-line summary
        #[arg(long)]
        subject: String,

        /// Category (lowercase, hyphens allowed), used for owner lookup
        #[arg(long)]
        category: String,

        /// low | medium | high | urgent
        #[arg(long, default_value = "medium")]
        priority: String,

        /// Contact address of the customer who raised the ticket
        #[arg(long)]
        customer: Option<String>,

        /// Creation time as RFC 3339 (default: now)
        #[arg(long)]
        created_at: Option<String>,
    },

    /// List tickets (default: open and in progress only)
    List {
        /// Include resolved and closed tickets
        #[arg(long)]
        all: bool,

        /// Only tickets at this tier
        #[arg(long)]
        tier: Option<String>,
    },

    /// Show a ticket and its escalation history
    Show { id: u64 },

    /// Change a ticket's status: open | in_progress | resolved | closed
    Status { id: u64, status: String },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcommand: TicketSubcommand, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;

    match subcommand {
        TicketSubcommand::Add {
            subject,
            category,
            priority,
            customer,
            created_at,
        } => {
            validate_category(&category)?;
            let priority: Priority = priority.parse()?;
            let created_at = super::run::parse_now(created_at.as_deref())?;
            let ticket = store.insert(NewTicket {
                subject,
                category,
                priority,
                customer,
                created_at,
            })?;
            if json {
                print_json(&ticket)?;
            } else {
                println!(
                    "created ticket #{} ({} {}, {})",
                    ticket.id, ticket.priority, ticket.category, ticket.tier
                );
            }
            Ok(())
        }

        TicketSubcommand::List { all, tier } => {
            let tier: Option<Tier> = tier.map(|t| t.parse()).transpose()?;
            let tickets: Vec<Ticket> = store
                .list()?
                .into_iter()
                .filter(|t| all || !t.status.is_terminal())
                .filter(|t| tier.map_or(true, |tier| t.tier == tier))
                .collect();

            if json {
                print_json(&tickets)?;
                return Ok(());
            }
            if tickets.is_empty() {
                println!("no tickets");
                return Ok(());
            }
            let now = Utc::now();
            print_table(
                &["ID", "PRIORITY", "STATUS", "TIER", "AT TIER", "CATEGORY", "SUBJECT"],
                tickets
                    .iter()
                    .map(|t| {
                        vec![
                            format!("#{}", t.id),
                            t.priority.to_string(),
                            t.status.to_string(),
                            if t.manual_review {
                                format!("{} (review)", t.tier)
                            } else {
                                t.tier.to_string()
                            },
                            format_secs((now - t.aging_since()).num_seconds()),
                            t.category.clone(),
                            truncate(&t.subject, 48),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }

        TicketSubcommand::Show { id } => {
            let t = store.get(id)?;
            if json {
                print_json(&t)?;
                return Ok(());
            }
            println!("Ticket:   #{}", t.id);
            println!("Subject:  {}", t.subject);
            println!("Category: {}", t.category);
            println!("Priority: {}", t.priority);
            println!("Status:   {}", t.status);
            println!("Tier:     {} ({})", t.tier, t.tier.role());
            if let Some(c) = &t.customer {
                println!("Customer: {c}");
            }
            if t.manual_review {
                println!("Flagged:  manual review");
            }
            println!("Version:  {}", t.version);
            println!("Created:  {}", t.created_at.format("%Y-%m-%d %H:%M UTC"));
            if !t.history.is_empty() {
                println!();
                println!("History:");
                for e in &t.history {
                    println!(
                        "  {}  {} -> {}  {}",
                        e.at.format("%Y-%m-%d %H:%M UTC"),
                        e.from,
                        e.to,
                        e.reason
                    );
                }
            }
            Ok(())
        }

        TicketSubcommand::Status { id, status } => {
            let status: TicketStatus = status.parse()?;
            let t = store.set_status(id, status, Utc::now())?;
            if json {
                print_json(&t)?;
            } else {
                println!("ticket #{} is now {} (v{})", t.id, t.status, t.version);
            }
            Ok(())
        }
    }
}
