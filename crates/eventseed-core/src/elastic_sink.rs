use crate::batch::Batch;
use crate::destination::Destination;
use crate::error::DeliveryError;
use crate::window::{utc_day, TimeWindow};
use async_trait::async_trait;
use eventseed_config::DESTINATION_ELASTICSEARCH;
use eventseed_elastic::{load_mapping, ElasticClient, IndexCreation};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

/// Major versions before 7 still require a mapping type on every document.
const TYPED_INDEX_MAX_VERSION: u32 = 6;
const DOCUMENT_TYPE: &str = "record";

/// Writes batches to date-partitioned indexes through the `_bulk` API.
pub struct ElasticBulkSink {
    client: ElasticClient,
    /// Server major version seen by `prepare`; 0 until then.
    major_version: AtomicU32,
}

impl ElasticBulkSink {
    pub fn new(client: ElasticClient) -> Self {
        Self {
            client,
            major_version: AtomicU32::new(0),
        }
    }

    pub fn index_name(&self, timestamp_ms: i64) -> String {
        format!(
            "{}-{}",
            self.client.config().index_prefix,
            utc_day(timestamp_ms)
        )
    }

    fn uses_document_type(&self) -> bool {
        let major = self.major_version.load(Ordering::Relaxed);
        major != 0 && major <= TYPED_INDEX_MAX_VERSION
    }

    /// NDJSON body with one action line per record and a trailing newline.
    pub fn bulk_body(&self, batch: &Batch) -> String {
        let typed = self.uses_document_type();
        let mut body = String::new();
        for record in &batch.records {
            let index = self.index_name(record.timestamp_ms);
            let action = if typed {
                json!({"index": {"_index": index, "_type": DOCUMENT_TYPE}})
            } else {
                json!({"index": {"_index": index}})
            };
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&record.line);
            body.push('\n');
        }
        body
    }

    fn delivery_error(&self, exc: anyhow::Error) -> DeliveryError {
        DeliveryError::new(self.id(), format!("{exc:#}"))
    }
}

#[async_trait]
impl Destination for ElasticBulkSink {
    fn id(&self) -> &str {
        DESTINATION_ELASTICSEARCH
    }

    async fn prepare(&self, window: &TimeWindow) -> Result<(), DeliveryError> {
        let major = self
            .client
            .major_version()
            .await
            .map_err(|exc| self.delivery_error(exc))?;
        self.major_version.store(major, Ordering::Relaxed);

        let mapping = load_mapping(self.client.config().mapping_path.as_deref(), major)
            .map_err(|exc| self.delivery_error(exc))?;

        let mut created = 0_usize;
        for day in window.utc_days() {
            let name = format!("{}-{}", self.client.config().index_prefix, day);
            match self
                .client
                .create_index(&name, &mapping)
                .await
                .map_err(|exc| self.delivery_error(exc))?
            {
                IndexCreation::Created => created += 1,
                IndexCreation::AlreadyExists => debug!("index {} already exists", name),
            }
        }

        info!(
            "elasticsearch {} ready: {} indexes created for {} days",
            major, created, window.days
        );
        Ok(())
    }

    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }

        self.client
            .bulk(self.bulk_body(batch))
            .await
            .map_err(|exc| self.delivery_error(exc))?;
        Ok(())
    }
}
