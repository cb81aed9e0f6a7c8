//! Transfer Database
//!
//! Bookkeeping core for bulk file transfers between storage sites.
//!
//! # Architecture
//!
//! Files are queued per channel (a directed source/destination site pair).
//! An external scheduler loop asks the selector for a channel, pulls a batch
//! from the queue, submits it to FTS, records the FTS request in the ledger
//! and binds the files to it. The monitor loop then polls the ledger until
//! the request is terminal, records per-file outcomes, queues catalog
//! registrations and releases files gated on the completed channel.
//!
//! # Persistence
//!
//! Every component holds no state of its own and goes through the
//! [`TransferStore`] seam. [`PgTransferStore`] backs it with PostgreSQL and
//! [`MemoryTransferStore`] keeps it in process.
//!
//! # Atomicity
//!
//! 1. **Channel creation**: existence check and insert are one store step
//! 2. **Request ids**: allocated by the insert itself, never read back
//! 3. **Batches** (`dequeue`, `assign_files`, `record_tree`): not
//!    transactional; partial progress is reported, not rolled back

pub mod assignment;
pub mod channels;
pub mod db;
pub mod error;
pub mod events;
pub mod files;
pub mod ledger;
pub mod memory;
pub mod monitor;
pub mod queue;
pub mod registration;
pub mod selector;
pub mod state;
pub mod store;
pub mod tree;
pub mod types;


use std::sync::Arc;

// Re-exports for convenience
pub use assignment::FileAssignments;
pub use channels::ChannelRegistry;
pub use db::PgTransferStore;
pub use error::{TransferDbError, TransferDbResult};
pub use events::EventLog;
pub use files::FileNames;
pub use ledger::FtsLedger;
pub use memory::MemoryTransferStore;
pub use monitor::ThroughputMonitor;
pub use queue::TransferQueue;
pub use registration::CatalogRegistrations;
pub use selector::{ChannelCandidate, ChannelSelector};
pub use state::{AssignmentStatus, ChannelStatus, FtsStatus, QueueStatus, RegistrationStatus};
pub use store::TransferStore;
pub use tree::ReplicationTrees;
pub use types::*;

/// All transfer components over one shared store
#[derive(Clone)]
pub struct TransferDb {
    store: Arc<dyn TransferStore>,
    channels: ChannelRegistry,
    queue: TransferQueue,
    selector: ChannelSelector,
    ledger: FtsLedger,
    assignments: FileAssignments,
    monitor: ThroughputMonitor,
    trees: ReplicationTrees,
    registrations: CatalogRegistrations,
    events: EventLog,
    files: FileNames,
}

impl TransferDb {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self {
            channels: ChannelRegistry::new(store.clone()),
            queue: TransferQueue::new(store.clone()),
            selector: ChannelSelector::new(store.clone()),
            ledger: FtsLedger::new(store.clone()),
            assignments: FileAssignments::new(store.clone()),
            monitor: ThroughputMonitor::new(store.clone()),
            trees: ReplicationTrees::new(store.clone()),
            registrations: CatalogRegistrations::new(store.clone()),
            events: EventLog::new(store.clone()),
            files: FileNames::new(store.clone()),
            store,
        }
    }

    /// Transfer database backed by a fresh in-process store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTransferStore::new()))
    }

    /// Transfer database backed by PostgreSQL
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::new(Arc::new(PgTransferStore::new(pool)))
    }

    pub async fn health_check(&self) -> TransferDbResult<()> {
        self.store.health_check().await
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn queue(&self) -> &TransferQueue {
        &self.queue
    }

    pub fn selector(&self) -> &ChannelSelector {
        &self.selector
    }

    pub fn ledger(&self) -> &FtsLedger {
        &self.ledger
    }

    pub fn assignments(&self) -> &FileAssignments {
        &self.assignments
    }

    pub fn monitor(&self) -> &ThroughputMonitor {
        &self.monitor
    }

    pub fn trees(&self) -> &ReplicationTrees {
        &self.trees
    }

    pub fn registrations(&self) -> &CatalogRegistrations {
        &self.registrations
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn files(&self) -> &FileNames {
        &self.files
    }
}
