use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use gcat_catalog::ExistenceChecks;
use gcat_core::TextMode;
use gcat_reconcile::{InvalidRowPolicy, ReconcileConfig, ReconcilePipeline, RunSummary};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "gcat")]
#[command(about = "GIS catalog audit toolkit")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Flags that take precedence over `GCAT_*` environment variables.
#[derive(Debug, Args)]
struct ConfigOverrides {
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,
    #[arg(long, global = true)]
    inventory: Option<PathBuf>,
    #[arg(long, global = true)]
    profile: Option<PathBuf>,
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    backups_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    portal_url: Option<String>,
    /// Read portal items from a JSON snapshot instead of the live portal.
    #[arg(long, global = true)]
    portal_snapshot: Option<PathBuf>,
    /// plain | html
    #[arg(long, global = true)]
    text_mode: Option<TextMode>,
    /// strict | deferred
    #[arg(long, global = true)]
    existence_checks: Option<ExistenceChecks>,
    /// abort | skip
    #[arg(long, global = true)]
    on_invalid_row: Option<InvalidRowPolicy>,
}

impl ConfigOverrides {
    fn apply(self, config: &mut ReconcileConfig) {
        if let Some(v) = self.store_root {
            config.store_root = v;
        }
        if let Some(v) = self.inventory {
            config.inventory_path = v;
        }
        if let Some(v) = self.profile {
            config.profile_path = Some(v);
        }
        if let Some(v) = self.reports_dir {
            config.reports_dir = v;
        }
        if let Some(v) = self.backups_dir {
            config.backups_dir = v;
        }
        if let Some(v) = self.portal_url {
            config.portal_url = v;
        }
        if let Some(v) = self.portal_snapshot {
            config.portal_snapshot = Some(v);
        }
        if let Some(v) = self.text_mode {
            config.text_mode = v;
        }
        if let Some(v) = self.existence_checks {
            config.existence_checks = v;
        }
        if let Some(v) = self.on_invalid_row {
            config.on_invalid_row = v;
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compare catalog, local and portal metadata per field.
    CompareMetadata,
    /// List datasets present in only the catalog, the stores or the portal.
    CompareLocations,
    /// Write the catalog's canonical metadata to the stores and the portal.
    UpdateMetadata {
        #[arg(long)]
        dry_run: bool,
    },
    BackupMetadata,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ReconcileConfig::from_env();
    cli.overrides.apply(&mut config);
    debug!(?config, "resolved configuration");

    let pipeline = ReconcilePipeline::from_config(config)?;
    let summary = match cli.command.unwrap_or(Commands::CompareMetadata) {
        Commands::CompareMetadata => pipeline.compare_metadata()?,
        Commands::CompareLocations => pipeline.compare_locations()?,
        Commands::UpdateMetadata { dry_run } => pipeline.update_metadata(dry_run)?,
        Commands::BackupMetadata => pipeline.backup_metadata()?,
    };
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} complete: run_id={} rows={} skipped={} failed_writes={} reports={}",
        summary.command,
        summary.run_id,
        summary.rows_processed,
        summary.skipped.len(),
        summary.write_failures,
        summary.reports_dir.as_deref().unwrap_or("-")
    );
    for artifact in &summary.artifacts {
        println!("  {artifact}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_environment_defaults() {
        let cli = Cli::try_parse_from([
            "gcat",
            "update-metadata",
            "--dry-run",
            "--store-root",
            "/data/stores",
            "--existence-checks",
            "deferred",
            "--on-invalid-row",
            "skip",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::UpdateMetadata { dry_run: true })));

        let mut config = ReconcileConfig::default();
        cli.overrides.apply(&mut config);
        assert_eq!(config.store_root, PathBuf::from("/data/stores"));
        assert_eq!(config.existence_checks, ExistenceChecks::Deferred);
        assert_eq!(config.on_invalid_row, InvalidRowPolicy::Skip);
        assert_eq!(config.text_mode, TextMode::Plain);
    }

    #[test]
    fn unknown_text_mode_is_rejected() {
        assert!(Cli::try_parse_from(["gcat", "--text-mode", "markdown"]).is_err());
    }
}
