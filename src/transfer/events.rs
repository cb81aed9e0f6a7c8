//! Event Log
//!
//! Append-only audit trail per FTS request. Nothing in this crate reads it
//! to make decisions.

use std::sync::Arc;
use tracing::debug;

use super::error::TransferDbResult;
use super::store::TransferStore;
use super::types::{FtsReqId, LoggingEvent};

#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn TransferStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    pub async fn append_event(&self, fts_req_id: FtsReqId, event: &str) -> TransferDbResult<LoggingEvent> {
        let logged = self.store.insert_event(fts_req_id, event).await?;
        debug!(
            fts_req_id = fts_req_id,
            event_id = logged.event_id,
            event = event,
            "Event appended"
        );
        Ok(logged)
    }

    /// Events of one request in append order
    pub async fn events_for(&self, fts_req_id: FtsReqId) -> TransferDbResult<Vec<LoggingEvent>> {
        self.store.events_for(fts_req_id).await
    }
}
