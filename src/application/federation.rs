//! Pushes origin changesets to following servers.
//!
//! Each follower gets its own delivery task fed by an unbounded channel, so
//! changesets reach a follower in the order the origin produced them. A
//! failed delivery stays at the head of the follower's queue and is retried
//! with capped exponential backoff until it goes through; past
//! `escalate_after` attempts every failure is logged as an error. Delivery
//! problems never affect the origin's own registry.

use super::registry::ChangePublisher;
use crate::domain::rendition::ChangeSet;
use crate::domain::video::ServerId;
use crate::ports::federation::FederationTransport;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which delivery errors are logged at error level.
    pub escalate_after: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            escalate_after: 8,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// `follower` subscribes to rendition changes of `followed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationEdge {
    pub follower: ServerId,
    pub followed: ServerId,
}

struct FollowerLink {
    server: ServerId,
    tx: mpsc::UnboundedSender<ChangeSet>,
}

struct SyncInner {
    server: ServerId,
    retry: RetryPolicy,
    followers: RwLock<Vec<FollowerLink>>,
    in_flight: Arc<watch::Sender<usize>>,
    /// Delivery tasks stop retrying once this is gone.
    alive: Arc<()>,
}

#[derive(Clone)]
pub struct FederationSync {
    inner: Arc<SyncInner>,
}

impl FederationSync {
    pub fn new(server: ServerId, retry: RetryPolicy) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(SyncInner {
                server,
                retry,
                followers: RwLock::new(Vec::new()),
                in_flight: Arc::new(in_flight),
                alive: Arc::new(()),
            }),
        }
    }

    /// Start delivering to a follower. Must be called inside a tokio runtime.
    pub fn add_follower(&self, edge: FederationEdge, transport: Arc<dyn FederationTransport>) {
        if edge.followed != self.inner.server {
            warn!(
                follower = %edge.follower,
                followed = %edge.followed,
                server = %self.inner.server,
                "edge does not follow this server, ignoring"
            );
            return;
        }

        let mut followers = self.inner.followers.write();
        if followers.iter().any(|link| link.server == edge.follower) {
            debug!(follower = %edge.follower, "follower already registered");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(delivery_loop(
            edge.follower.clone(),
            transport,
            rx,
            self.inner.retry,
            self.inner.in_flight.clone(),
            Arc::downgrade(&self.inner.alive),
        ));
        info!(follower = %edge.follower, "follower registered");
        followers.push(FollowerLink {
            server: edge.follower,
            tx,
        });
    }

    pub fn followers(&self) -> Vec<ServerId> {
        self.inner
            .followers
            .read()
            .iter()
            .map(|link| link.server.clone())
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        *self.inner.in_flight.borrow() == 0
    }

    /// Resolves once every published changeset has reached every follower.
    pub async fn await_drain(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        loop {
            if *rx.borrow_and_update() == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl ChangePublisher for FederationSync {
    fn publish(&self, changeset: ChangeSet) {
        let followers = self.inner.followers.read();
        for link in followers.iter() {
            self.inner.in_flight.send_modify(|n| *n += 1);
            if link.tx.send(changeset.clone()).is_err() {
                self.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
                error!(follower = %link.server, "delivery task is gone, changeset dropped");
            }
        }
    }
}

async fn delivery_loop(
    follower: ServerId,
    transport: Arc<dyn FederationTransport>,
    mut rx: mpsc::UnboundedReceiver<ChangeSet>,
    retry: RetryPolicy,
    in_flight: Arc<watch::Sender<usize>>,
    alive: Weak<()>,
) {
    while let Some(changeset) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            match transport.deliver(&follower, &changeset).await {
                Ok(()) => {
                    debug!(
                        follower = %follower,
                        video = %changeset.video,
                        sequence = changeset.sequence,
                        attempt,
                        "changeset delivered"
                    );
                    break;
                }
                Err(e) if attempt >= retry.escalate_after => {
                    error!(
                        follower = %follower,
                        video = %changeset.video,
                        sequence = changeset.sequence,
                        attempt,
                        error = %e,
                        "follower unreachable, still retrying"
                    );
                }
                Err(e) => {
                    warn!(
                        follower = %follower,
                        video = %changeset.video,
                        sequence = changeset.sequence,
                        attempt,
                        error = %e,
                        "federation delivery failed"
                    );
                }
            }
            tokio::time::sleep(retry.backoff(attempt)).await;
            if alive.strong_count() == 0 {
                debug!(follower = %follower, "federation stopped, abandoning delivery");
                return;
            }
        }
        in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}
