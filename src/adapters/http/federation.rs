use crate::domain::rendition::ChangeSet;
use crate::domain::video::ServerId;
use crate::error::FederationDeliveryError;
use crate::ports::federation::FederationTransport;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Posts changesets to a remote follower's `/federation/inbox`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    inbox: String,
}

impl HttpTransport {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            inbox: format!("{}/federation/inbox", base_url.trim_end_matches('/')),
        }
    }

    pub fn default_client() -> Result<Client, reqwest::Error> {
        Client::builder().timeout(Duration::from_secs(10)).build()
    }
}

#[async_trait]
impl FederationTransport for HttpTransport {
    async fn deliver(
        &self,
        follower: &ServerId,
        changeset: &ChangeSet,
    ) -> Result<(), FederationDeliveryError> {
        let response = self
            .client
            .post(&self.inbox)
            .json(changeset)
            .send()
            .await
            .map_err(|e| FederationDeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FederationDeliveryError::Rejected {
                follower: follower.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
