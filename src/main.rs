mod calendar;
mod card;
mod config;
mod diff;
mod error;
mod notion;
mod snapshot;
mod sync;

use anyhow::Result;
use calendar::CalendarClient;
use clap::{Parser, Subcommand};
use notion::NotionClient;
use snapshot::Snapshot;
use sync::{SyncStats, Syncer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "notioncal")]
#[command(about = "Mirror calendar cards from Notion databases into the macOS Calendar app")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every configured database against the calendar
    Sync {
        /// Also remove events whose end date has passed
        #[arg(long)]
        prune_past: bool,
    },
    /// Show what a sync would change, without touching the calendar
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notioncal=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { prune_past } => cmd_sync(prune_past).await,
        Commands::Status => cmd_status().await,
    }
}

async fn cmd_sync(prune_past: bool) -> Result<()> {
    let cfg = config::load_config()?;
    let notion = NotionClient::new(&cfg.notion_token);
    let calendar = CalendarClient::new(&cfg.calendar_name)?;

    let mut totals = SyncStats::default();

    for database_id in &cfg.databases {
        println!("\n📅 Syncing: {database_id}");

        let snapshot = Snapshot::load(config::snapshot_path(&cfg, database_id))?;
        let mut syncer = Syncer::new(&notion, &calendar, database_id, snapshot);
        let stats = syncer.run(prune_past).await?;

        println!(
            "  {} added, {} updated, {} deleted, {} failed, {} skipped",
            stats.added, stats.updated, stats.deleted, stats.failed, stats.skipped
        );
        totals.merge(&stats);
    }

    println!(
        "\nTotal: {} added, {} updated, {} deleted, {} failed",
        totals.added, totals.updated, totals.deleted, totals.failed
    );

    Ok(())
}

/// Dry-run: classifies only, so no calendar client is needed and the
/// command works on machines without osascript.
async fn cmd_status() -> Result<()> {
    let cfg = config::load_config()?;
    let notion = NotionClient::new(&cfg.notion_token);

    let mut any_changes = false;

    for database_id in &cfg.databases {
        let snapshot = Snapshot::load(config::snapshot_path(&cfg, database_id))?;
        let live = notion.fetch_live_cards(database_id).await?;
        let diff = diff::compute(&snapshot, &live);

        if diff.is_empty() {
            continue;
        }

        any_changes = true;
        println!("\n📅 {database_id}");

        for id in &diff.new {
            let title = live.get(id).map(|c| c.title.as_str()).unwrap_or("");
            println!("    + {id}  {title}");
        }
        for id in &diff.modified {
            let title = live.get(id).map(|c| c.title.as_str()).unwrap_or("");
            println!("    ~ {id}  {title}");
        }
        for id in &diff.deleted {
            let title = snapshot
                .get(id)
                .map(|row| row.title.clone())
                .unwrap_or_default();
            println!("    - {id}  {title}");
        }
    }

    if !any_changes {
        println!("Everything up to date.");
    } else {
        println!("\nRun `notioncal sync` to apply these changes.");
    }

    Ok(())
}
