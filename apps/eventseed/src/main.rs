mod cli;
mod server;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{Cli, CliCommand, ImportArgs, ServeArgs};
use eventseed_config::AppConfig;
use eventseed_core::{build_registry, DemoCatalog, Importer, JobOutcome, ProgressBoard};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let explicit = cli.config.is_some();
    let config_path = eventseed_config::resolve_config_path(cli.config);
    let config = if explicit {
        eventseed_config::load_config(&config_path)
    } else {
        eventseed_config::load_config_or_default(&config_path)
    }
    .with_context(|| format!("failed to load config {}", config_path.display()))?;

    match cli.command {
        CliCommand::Import(args) => run_import(config, args).await,
        CliCommand::Serve(args) => run_serve(config, args).await,
        CliCommand::SetupDemo => run_setup_demo(&config),
        CliCommand::Schema => {
            print!("{}", eventseed_clickhouse::schema_sql(&config.clickhouse)?);
            Ok(())
        }
    }
}

fn importer(config: &AppConfig) -> Result<Importer> {
    let registry = build_registry(config)?;
    Ok(Importer::new(config, registry, Arc::new(ProgressBoard::new())))
}

async fn run_import(config: AppConfig, args: ImportArgs) -> Result<()> {
    let importer = importer(&config)?;
    let request = args.request(&config.import);
    let destination = request.destination_id.clone();

    let handle = importer.start_import(request)?;
    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, stopping import into {}", destination);
            importer.cancel(&destination);
            // The job stops at its next pause; wait for it to record the outcome.
            loop {
                if !importer.board().is_running(&destination) {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            JobOutcome::Failed(importer.board().snapshot(&destination).failed.unwrap_or_default())
        }
    };

    match outcome {
        JobOutcome::Succeeded(summary) => {
            println!(
                "imported {} lines into {} in {} batches ({} sessions, {} skipped)",
                summary.lines_read,
                destination,
                summary.batches_sent,
                summary.sessions,
                summary.lines_skipped
            );
            Ok(())
        }
        JobOutcome::Failed(message) => Err(anyhow!("import into {} failed: {}", destination, message)),
    }
}

async fn run_serve(config: AppConfig, args: ServeArgs) -> Result<()> {
    let importer = importer(&config)?;
    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    info!(
        "serving imports for {} from {}",
        importer.registry().ids().join(", "),
        config.source.path
    );
    server::run(server::AppState::new(importer, config.import.clone()), host, port).await
}

fn run_setup_demo(config: &AppConfig) -> Result<()> {
    let (catalog, setup) = DemoCatalog::ensure_at(&config.demo.catalog_path, &config.site.base_url)?;

    for audience in catalog.sorted_audiences() {
        println!(
            "audience {:>4}  {} ({})",
            audience.id, audience.title, audience.country
        );
    }
    for page in &catalog.pages {
        println!("page     {:>4}  {} {}", page.id, page.title, page.url);
    }
    if !setup.changed() {
        println!("demo objects already present in {}", config.demo.catalog_path);
    }
    Ok(())
}
