use crate::application::registry::RenditionRegistry;
use crate::domain::rendition::ChangeSet;
use crate::domain::video::ServerId;
use crate::error::FederationDeliveryError;
use crate::ports::federation::FederationTransport;
use async_trait::async_trait;
use std::sync::Arc;

/// Applies changesets straight into a co-hosted peer's registry.
#[derive(Clone)]
pub struct InProcessTransport {
    peer: Arc<RenditionRegistry>,
}

impl InProcessTransport {
    pub fn new(peer: Arc<RenditionRegistry>) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl FederationTransport for InProcessTransport {
    async fn deliver(
        &self,
        follower: &ServerId,
        changeset: &ChangeSet,
    ) -> Result<(), FederationDeliveryError> {
        if follower != self.peer.server() {
            return Err(FederationDeliveryError::Apply(format!(
                "transport targets {} but was asked to reach {}",
                self.peer.server(),
                follower
            )));
        }
        self.peer
            .apply_replicated(changeset)
            .map(|_| ())
            .map_err(|e| FederationDeliveryError::Apply(e.to_string()))
    }
}
