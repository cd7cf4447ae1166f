#![warn(missing_docs)]

//! snaparc command-line entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use snaparc::{Archiver, BtrfsInspector, Cli, SnapshotInspector};
use snaparc_core::{name, TracingSink};
use snaparc_remote::{RemoteStore, SwiftStore};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())))
        .init();

    let config = cli.load_config().context("Failed to load configuration")?;
    tracing::debug!(container = %config.container_name, staging_dir = %config.staging_dir.display(), "Loaded configuration");

    let inspector = BtrfsInspector::new(config.tools.serializer.clone());
    let lineage = inspector
        .read_only_snapshots(&cli.path)
        .await
        .with_context(|| format!("Failed to inspect {}", cli.path.display()))?;
    if lineage.is_empty() {
        tracing::info!("No read-only snapshots of {}", cli.path.display());
        return Ok(());
    }

    let sink = Arc::new(TracingSink);
    let store: Arc<dyn RemoteStore> = Arc::new(
        SwiftStore::new(config.swift.clone())
            .context("Failed to set up the Swift client")?
            .with_sink(sink.clone()),
    );
    let archiver = Archiver::new(config, store, sink);

    if cli.dry_run {
        let plan = archiver.plan(&lineage).await.context("Failed to plan archive run")?;
        tracing::info!(
            archived = plan.archived.len(),
            pending = plan.pending.len(),
            "Dry run, nothing will be produced"
        );
        for unit in &plan.pending {
            println!("{}\t{}", name(unit)?, unit);
        }
        return Ok(());
    }

    tokio::select! {
        result = archiver.run(&lineage) => {
            let summary = result.context("Archive run failed")?;
            tracing::info!(
                units = summary.archived.len(),
                bytes = summary.bytes_uploaded,
                "Done"
            );
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, the unit in progress was not archived");
            anyhow::bail!("interrupted")
        }
    }
}
