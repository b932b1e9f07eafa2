use crate::batch::Batch;
use crate::error::{DeliveryError, SeedError, SeedResult};
use crate::window::TimeWindow;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A store that rewritten batches are delivered to.
#[async_trait]
pub trait Destination: Send + Sync {
    fn id(&self) -> &str;

    /// Runs once per import before the first batch, e.g. to create indexes.
    async fn prepare(&self, _window: &TimeWindow) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Writes one batch in a single request. Errors carry the backend's text.
    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

#[derive(Clone, Default)]
pub struct DestinationRegistry {
    destinations: BTreeMap<String, Arc<dyn Destination>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `destination` under its own id, replacing any earlier registration.
    pub fn register(&mut self, destination: Arc<dyn Destination>) {
        self.destinations
            .insert(destination.id().to_string(), destination);
    }

    pub fn get(&self, id: &str) -> SeedResult<Arc<dyn Destination>> {
        self.destinations
            .get(id)
            .cloned()
            .ok_or_else(|| SeedError::UnknownDestination(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.destinations.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.destinations.keys().cloned().collect()
    }
}
