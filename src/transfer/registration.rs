//! Catalog Registration Queue
//!
//! Registrations pending after a successful transfer. An external worker
//! consumes Waiting rows; this module only guards the status moves.
//!
//! `mark_done` fires from Waiting, not from Executing. A worker therefore
//! takes a row Executing, hands it back to Waiting, then completes it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{TransferDbError, TransferDbResult};
use super::state::RegistrationStatus;
use super::store::TransferStore;
use super::types::{CatalogRegistration, ChannelId, FileId, NewRegistration};

#[derive(Clone)]
pub struct CatalogRegistrations {
    store: Arc<dyn TransferStore>,
}

impl CatalogRegistrations {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    pub async fn enqueue_registration(&self, registration: NewRegistration) -> TransferDbResult<()> {
        self.store.insert_registration(&registration).await?;
        debug!(
            channel_id = registration.channel_id,
            file_id = registration.file_id,
            storage_element = %registration.storage_element,
            "Catalog registration queued"
        );
        Ok(())
    }

    pub async fn list_waiting(&self) -> TransferDbResult<Vec<CatalogRegistration>> {
        self.store.list_registrations(RegistrationStatus::Waiting).await
    }

    pub async fn get_registration(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
    ) -> TransferDbResult<Option<CatalogRegistration>> {
        self.store.get_registration(channel_id, file_id).await
    }

    async fn transition(
        &self,
        channel_id: ChannelId,
        file_id: FileId,
        next: RegistrationStatus,
    ) -> TransferDbResult<()> {
        let expected = RegistrationStatus::required_predecessor(next);
        if self
            .store
            .update_registration_status_if(channel_id, file_id, expected, next)
            .await?
        {
            return Ok(());
        }

        match self.store.get_registration(channel_id, file_id).await? {
            Some(r) => {
                warn!(
                    channel_id = channel_id,
                    file_id = file_id,
                    from = %r.status,
                    to = %next,
                    "Rejected registration transition"
                );
                Err(TransferDbError::InvalidTransition(format!(
                    "registration of file {} on channel {}: {} -> {} requires {}",
                    file_id, channel_id, r.status, next, expected
                )))
            }
            None => Err(TransferDbError::NotFound(format!(
                "registration of file {} on channel {}",
                file_id, channel_id
            ))),
        }
    }

    /// Waiting -> Executing
    pub async fn mark_executing(&self, channel_id: ChannelId, file_id: FileId) -> TransferDbResult<()> {
        self.transition(channel_id, file_id, RegistrationStatus::Executing)
            .await?;
        debug!(channel_id = channel_id, file_id = file_id, "Registration executing");
        Ok(())
    }

    /// Executing -> Waiting
    pub async fn mark_waiting(&self, channel_id: ChannelId, file_id: FileId) -> TransferDbResult<()> {
        self.transition(channel_id, file_id, RegistrationStatus::Waiting)
            .await?;
        debug!(channel_id = channel_id, file_id = file_id, "Registration back to waiting");
        Ok(())
    }

    /// Waiting -> Done, stamping the completion time
    pub async fn mark_done(&self, channel_id: ChannelId, file_id: FileId) -> TransferDbResult<()> {
        self.transition(channel_id, file_id, RegistrationStatus::Done)
            .await?;
        info!(channel_id = channel_id, file_id = file_id, "Catalog registration done");
        Ok(())
    }
}
