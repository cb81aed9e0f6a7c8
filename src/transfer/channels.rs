//! Channel Registry
//!
//! One channel per directed (source, destination) site pair. Channels are
//! never deleted; they are switched Inactive instead.

use std::sync::Arc;
use tracing::{debug, info};

use super::error::{TransferDbError, TransferDbResult};
use super::state::ChannelStatus;
use super::store::TransferStore;
use super::types::{Channel, ChannelAttribute, ChannelAttributeName, ChannelCreation, ChannelId};

#[derive(Clone)]
pub struct ChannelRegistry {
    store: Arc<dyn TransferStore>,
}

impl ChannelRegistry {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Create the channel, or return the id of the existing one.
    ///
    /// Concurrent callers for the same pair all observe the same id.
    pub async fn create_channel(&self, source: &str, dest: &str) -> TransferDbResult<ChannelCreation> {
        let creation = self.store.create_channel(source, dest).await?;
        if creation.created {
            info!(
                channel_id = creation.channel_id,
                source = source,
                dest = dest,
                "Channel created"
            );
        } else {
            debug!(
                channel_id = creation.channel_id,
                source = source,
                dest = dest,
                "Channel already exists"
            );
        }
        Ok(creation)
    }

    pub async fn get_channel_id(&self, source: &str, dest: &str) -> TransferDbResult<ChannelId> {
        self.store
            .find_channel(source, dest)
            .await?
            .ok_or_else(|| TransferDbError::NotFound(format!("channel {} -> {}", source, dest)))
    }

    pub async fn get_channel(&self, channel_id: ChannelId) -> TransferDbResult<Channel> {
        self.store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| TransferDbError::NotFound(format!("channel {}", channel_id)))
    }

    pub async fn get_attribute(
        &self,
        channel_id: ChannelId,
        name: ChannelAttributeName,
    ) -> TransferDbResult<ChannelAttribute> {
        let channel = self.get_channel(channel_id).await?;
        Ok(ChannelAttribute::read(&channel, name))
    }

    pub async fn set_attribute(
        &self,
        channel_id: ChannelId,
        attribute: ChannelAttribute,
    ) -> TransferDbResult<()> {
        if !self.store.update_channel(channel_id, &attribute).await? {
            return Err(TransferDbError::NotFound(format!("channel {}", channel_id)));
        }
        debug!(channel_id = channel_id, attribute = ?attribute, "Channel attribute updated");
        Ok(())
    }

    pub async fn set_status(&self, channel_id: ChannelId, status: ChannelStatus) -> TransferDbResult<()> {
        self.set_attribute(channel_id, ChannelAttribute::Status(status))
            .await
    }

    /// All channels in id order
    pub async fn list_channels(&self) -> TransferDbResult<Vec<Channel>> {
        self.store.list_channels(None).await
    }

    pub async fn list_channels_by_status(
        &self,
        status: ChannelStatus,
    ) -> TransferDbResult<Vec<Channel>> {
        self.store.list_channels(Some(status)).await
    }
}
