mod batch;
pub mod columnar_sink;
pub mod demo;
pub mod destination;
pub mod elastic_sink;
mod error;
pub mod job;
pub mod progress;
pub mod rewrite;
pub mod sampler;
pub mod session;
mod source;
pub mod transcode;
pub mod trigger;
pub mod utm;
pub mod window;

pub use crate::batch::{Batch, BatchRecord, Batcher};
pub use crate::columnar_sink::ColumnarRowSink;
pub use crate::demo::{DemoCatalog, DemoSetup};
pub use crate::destination::{Destination, DestinationRegistry};
pub use crate::elastic_sink::ElasticBulkSink;
pub use crate::error::{DeliveryError, SeedError, SeedResult};
pub use crate::job::{ImportJob, JobOutcome, JobSettings, JobSummary};
pub use crate::progress::{JobProgress, PollReport, ProgressBoard, ProgressSnapshot};
pub use crate::rewrite::RewriteContext;
pub use crate::source::SourceLog;
pub use crate::trigger::{ImportHandle, ImportRequest, Importer};
pub use crate::window::TimeWindow;

use anyhow::Result;
use eventseed_clickhouse::ClickHouseClient;
use eventseed_config::AppConfig;
use eventseed_elastic::ElasticClient;
use std::sync::Arc;

/// Registry holding every built-in destination, configured from `config`.
pub fn build_registry(config: &AppConfig) -> Result<DestinationRegistry> {
    let mut registry = DestinationRegistry::new();
    registry.register(Arc::new(ElasticBulkSink::new(ElasticClient::new(
        config.elasticsearch.clone(),
    )?)));
    registry.register(Arc::new(ColumnarRowSink::new(ClickHouseClient::new(
        config.clickhouse.clone(),
    )?)));
    Ok(registry)
}
