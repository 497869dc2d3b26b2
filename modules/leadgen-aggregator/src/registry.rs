//! Concurrent aggregation runs addressed by id.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use leadgen_common::{LeadgenError, Query, Snapshot};

use crate::orchestrator::{AggregationHandle, Aggregator};
use crate::traits::RegisteredSource;

/// Runs share one `Aggregator` but nothing else; each owns its own state
/// and convergence loop.
pub struct AggregationRegistry {
    aggregator: Aggregator,
    runs: RwLock<HashMap<Uuid, AggregationHandle>>,
}

impl AggregationRegistry {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator,
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn start(
        &self,
        query: Query,
        sources: Vec<RegisteredSource>,
    ) -> Result<Uuid, LeadgenError> {
        let handle = self.aggregator.start(query, sources)?;
        let id = handle.id();
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        Ok(id)
    }

    pub fn handle(&self, id: Uuid) -> Option<AggregationHandle> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn poll(&self, id: Uuid) -> Option<Arc<Snapshot>> {
        self.handle(id).map(|h| h.poll())
    }

    /// False for unknown ids and for runs with nothing left to cancel.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.handle(id) {
            Some(handle) => handle.cancel().await,
            None => false,
        }
    }

    /// Forget a run. Its sources keep running if it was not cancelled first.
    pub fn remove(&self, id: Uuid) -> Option<AggregationHandle> {
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Ids of runs whose latest snapshot is not yet complete.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|h| !h.is_complete())
            .map(AggregationHandle::id)
            .collect()
    }
}
