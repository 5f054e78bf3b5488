//! Command-line host for the catalog
//!
//! Owns a `CatalogManager`, ticks it until the requested work is done and
//! persists the cache on the way out.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use github_catalog::models::ALL_CATEGORY;
use github_catalog::{CatalogConfig, CatalogEvent, CatalogManager};

const TICK: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(
    name = "github-catalog",
    version,
    about = "Browse and import curated GitHub repositories"
)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List repositories, optionally restricted to one category
    List {
        #[arg(short, long, default_value = ALL_CATEGORY)]
        category: String,
    },
    /// Re-fetch metadata for every configured repository
    Refresh,
    /// Download a repository and extract its subtree into the project
    Import { identifier: String },
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("github-catalog")
        .join("catalog.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    github_catalog::init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = CatalogConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let mut manager = CatalogManager::from_config(config)?;
    let issued = manager.initialize();

    // A fresh cache issues nothing; an explicit refresh still hits the network
    if matches!(cli.command, Command::Refresh) && issued == 0 {
        manager.refresh();
    }
    run_until_idle(&mut manager, None).await;

    let result = match &cli.command {
        Command::List { category } => {
            print_category(&manager, category);
            Ok(())
        }
        Command::Refresh => {
            println!("{} repositories up to date", manager.len());
            Ok(())
        }
        Command::Import { identifier } => import(&mut manager, identifier).await,
    };

    manager.shutdown().context("saving metadata cache")?;
    result
}

async fn import(manager: &mut CatalogManager, identifier: &str) -> anyhow::Result<()> {
    manager.request_import(identifier)?;
    let events = run_until_idle(manager, Some(identifier)).await;
    import_result(&events, identifier)
}

/// Succeeds only on an `Imported` event for `identifier`; an interrupted or
/// cancelled download leaves none behind
fn import_result(events: &[CatalogEvent], identifier: &str) -> anyhow::Result<()> {
    for event in events {
        match event {
            CatalogEvent::Imported { identifier: id, .. } if id == identifier => return Ok(()),
            CatalogEvent::ImportFailed { identifier: id, reason } if id == identifier => {
                bail!("import of {} failed: {}", identifier, reason)
            }
            _ => {}
        }
    }
    bail!("import of {} did not complete", identifier)
}

/// Tick the manager until nothing is pending or Ctrl-C is pressed
async fn run_until_idle(manager: &mut CatalogManager, watch: Option<&str>) -> Vec<CatalogEvent> {
    let mut ticker = tokio::time::interval(TICK);
    let mut events = Vec::new();
    let mut last_percent = None;

    while manager.has_pending() {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, cancelling pending requests");
                break;
            }
        }

        for event in manager.poll_once() {
            report(&event);
            events.push(event);
        }

        if let Some(progress) = watch.and_then(|id| manager.download_progress(id)) {
            let percent = (progress * 100.0).floor() as u32;
            if last_percent != Some(percent) {
                println!("{:>3}%", percent);
                last_percent = Some(percent);
            }
        }
    }

    events
}

fn report(event: &CatalogEvent) {
    match event {
        CatalogEvent::Imported {
            identifier,
            summary,
        } => println!(
            "Imported {} into {} ({} files)",
            identifier,
            summary.destination.display(),
            summary.files_written
        ),
        CatalogEvent::ImportFailed { identifier, reason } => {
            eprintln!("Import of {} failed: {}", identifier, reason)
        }
        CatalogEvent::RequestFailed {
            identifier: Some(identifier),
            reason,
        } => eprintln!("Request for {} failed: {}", identifier, reason),
        other => tracing::debug!("{:?}", other),
    }
}

fn print_category(manager: &CatalogManager, category: &str) {
    println!("Categories: {}", manager.categories().join(", "));
    for record in manager.records_in_category(category) {
        let icon = if record.icon_bytes.is_some() { "*" } else { " " };
        println!("{} {:<32} {}", icon, record.identifier, record.display_name);
        if !record.description.is_empty() {
            println!("    {}", record.description);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use github_catalog::services::ImportSummary;

    fn imported(identifier: &str) -> CatalogEvent {
        CatalogEvent::Imported {
            identifier: identifier.to_string(),
            summary: ImportSummary {
                destination: PathBuf::from("/project/tools"),
                files_written: 1,
                bytes_written: 3,
                skipped: 0,
            },
        }
    }

    #[test]
    fn test_import_result_requires_imported_event() {
        assert!(import_result(&[imported("owner/tools")], "owner/tools").is_ok());

        // Interrupted, or cancelled after the record turned private
        let err = import_result(&[], "owner/tools").unwrap_err();
        assert!(err.to_string().contains("did not complete"));

        let discarded = [CatalogEvent::RecordDiscarded("owner/tools".to_string())];
        assert!(import_result(&discarded, "owner/tools").is_err());

        // Another repository's import does not count
        assert!(import_result(&[imported("owner/other")], "owner/tools").is_err());
    }

    #[test]
    fn test_import_result_reports_failure_reason() {
        let events = [CatalogEvent::ImportFailed {
            identifier: "owner/tools".to_string(),
            reason: "invalid Zip archive".to_string(),
        }];
        let err = import_result(&events, "owner/tools").unwrap_err();
        assert!(err.to_string().contains("invalid Zip archive"));
    }
}
