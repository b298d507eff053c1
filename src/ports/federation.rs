use crate::domain::rendition::ChangeSet;
use crate::domain::video::ServerId;
use crate::error::FederationDeliveryError;
use async_trait::async_trait;

/// Carries origin changesets to one follower.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FederationTransport: Send + Sync {
    async fn deliver(
        &self,
        follower: &ServerId,
        changeset: &ChangeSet,
    ) -> Result<(), FederationDeliveryError>;
}
