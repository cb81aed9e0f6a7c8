//! Logical file names, keyed by file id and treated as opaque strings.

use std::sync::Arc;

use super::error::TransferDbResult;
use super::store::TransferStore;
use super::types::FileId;

#[derive(Clone)]
pub struct FileNames {
    store: Arc<dyn TransferStore>,
}

impl FileNames {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Insert or replace the LFN of a file
    pub async fn record(&self, file_id: FileId, lfn: &str) -> TransferDbResult<()> {
        self.store.record_lfn(file_id, lfn).await
    }

    pub async fn lfn(&self, file_id: FileId) -> TransferDbResult<Option<String>> {
        self.store.get_lfn(file_id).await
    }
}
