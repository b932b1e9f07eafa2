use clap::{Args, Parser, Subcommand};
use eventseed_config::{ImportConfig, MAX_TIME_RANGE_DAYS};
use eventseed_core::ImportRequest;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "eventseed",
    about = "Replay recorded analytics events into Elasticsearch or ClickHouse"
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Replay the event log into one destination and wait for it to finish.
    Import(ImportArgs),
    /// Serve the HTTP trigger and progress API.
    Serve(ServeArgs),
    /// Create the demo audiences and pages in the local catalog.
    SetupDemo,
    /// Print the ClickHouse schema used by the columnar destination.
    Schema,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Spread events over the last 7 days.
    #[arg(long, conflicts_with_all = ["fortnight", "days"])]
    pub week: bool,
    /// Spread events over the last 14 days.
    #[arg(long, conflicts_with = "days")]
    pub fortnight: bool,
    #[arg(
        long,
        value_name = "N",
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_TIME_RANGE_DAYS))
    )]
    pub days: Option<u32>,
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,
    /// Seconds to wait between batches.
    #[arg(long, value_name = "SECONDS")]
    pub sleep: Option<f64>,
    #[arg(long, value_name = "ID")]
    pub destination: Option<String>,
    /// Seed for reproducible session identities.
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,
}

impl ImportArgs {
    pub fn time_range_days(&self, default: u32) -> u32 {
        if self.week {
            7
        } else if self.fortnight {
            14
        } else {
            self.days.unwrap_or(default)
        }
    }

    pub fn request(&self, defaults: &ImportConfig) -> ImportRequest {
        let mut request = ImportRequest::from_config(defaults);
        request.time_range_days = self.time_range_days(defaults.time_range_days);
        if let Some(batch_size) = self.batch_size {
            request.batch_size = batch_size;
        }
        if let Some(sleep) = self.sleep {
            request.sleep_seconds = sleep;
        }
        if let Some(destination) = &self.destination {
            request.destination_id = destination.clone();
        }
        if self.seed.is_some() {
            request.rng_seed = self.seed;
        }
        request
    }
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
}
