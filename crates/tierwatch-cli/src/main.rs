mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    notify::NotifySubcommand, policy::PolicySubcommand, runs::RunsSubcommand,
    ticket::TicketSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tierwatch",
    about = "Support ticket tier escalation: evaluate aging tickets and move them up the support ladder",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .tierwatch/)
    #[arg(long, global = true, env = "TIERWATCH_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .tierwatch/ with a default config and an empty ticket store
    Init,

    /// Run one evaluate-and-escalate pass
    Run {
        /// Evaluate as of this RFC 3339 time instead of the current time
        #[arg(long)]
        now: Option<String>,

        /// Drain the notification outbox after the run
        #[arg(long)]
        notify: bool,
    },

    /// Run escalation passes on a fixed interval until interrupted
    Daemon {
        /// Seconds between runs (default: run.interval_seconds from config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Seed and inspect tickets
    Ticket {
        #[command(subcommand)]
        subcommand: TicketSubcommand,
    },

    /// Show or validate the escalation policy
    Policy {
        #[command(subcommand)]
        subcommand: PolicySubcommand,
    },

    /// Deliver queued escalation notifications
    Notify {
        #[command(subcommand)]
        subcommand: NotifySubcommand,
    },

    /// Inspect recorded escalation runs
    Runs {
        #[command(subcommand)]
        subcommand: RunsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Daemon { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Run { now, notify } => cmd::run::run(&root, now.as_deref(), notify, cli.json),
        Commands::Daemon { interval } => cmd::daemon::run(&root, interval),
        Commands::Ticket { subcommand } => cmd::ticket::run(&root, subcommand, cli.json),
        Commands::Policy { subcommand } => cmd::policy::run(&root, subcommand, cli.json),
        Commands::Notify { subcommand } => cmd::notify::run(&root, subcommand, cli.json),
        Commands::Runs { subcommand } => cmd::runs::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
