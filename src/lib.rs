//! TransferDB - bulk file transfer bookkeeping
//!
//! Tracks site-to-site transfer channels, the per-channel file queue, FTS
//! requests and their files, throughput, multi-hop replication gates and
//! pending catalog registrations. Scheduling and transfer execution live
//! outside this crate; it only exposes the state they decide on.
//!
//! # Modules
//!
//! - [`transfer`] - Components over the [`transfer::TransferStore`] seam
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod transfer;

// Convenient re-exports at crate root
pub use transfer::{
    ChannelCandidate, ChannelId, FileId, FtsReqId, FtsStatus, MemoryTransferStore,
    PgTransferStore, TransferDb, TransferDbError, TransferDbResult, TransferStore,
};
