//! Peer RPC client
//!
//! Queries the controller sidecars on other nodes for health, their opinion
//! of the current primary, and their newest oplog timestamp. Peers that do
//! not answer within the deadline are abstentions, never votes.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use mongoward_common::MongowardError;

use crate::model::{PeerHealth, PeerOplog, PeerPrimary};

const RPC_TIMEOUT: Duration = Duration::from_secs(3);
const SELF_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const SELF_CHECK_ATTEMPTS: u32 = 3;
const SELF_CHECK_DELAY: Duration = Duration::from_secs(2);

pub struct PeerClient {
    client: reqwest::Client,
    /// Port peers advertise externally.
    port: u16,
    /// Port this node's own admin server binds. The self-reachability check
    /// goes through the derived hostname, which resolves to loopback, where
    /// only the local bind port is listening.
    self_port: u16,
}

impl PeerClient {
    pub fn new(port: u16, self_port: u16) -> Result<Self, MongowardError> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| MongowardError::Peer(e.to_string()))?;
        Ok(PeerClient {
            client,
            port,
            self_port,
        })
    }

    fn url(&self, host: &str, endpoint: &str) -> String {
        format!("http://{}:{}/{}", host, self.port, endpoint)
    }

    pub async fn health(&self, host: &str) -> Result<PeerHealth, MongowardError> {
        self.client
            .get(self.url(host, "health"))
            .send()
            .await
            .map_err(|e| MongowardError::Peer(e.to_string()))?
            .error_for_status()
            .map_err(|e| MongowardError::Peer(e.to_string()))?
            .json()
            .await
            .map_err(|e| MongowardError::Peer(e.to_string()))
    }

    /// A peer's opinion of the current primary; `None` is an abstention.
    pub async fn primary_opinion(&self, host: &str) -> Option<PeerPrimary> {
        match self
            .client
            .get(self.url(host, "primary"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response.json().await.ok(),
            Err(err) => {
                debug!(host = %host, "primary opinion unavailable: {}", err);
                None
            }
        }
    }

    /// A peer's newest oplog timestamp; `None` when unreachable.
    pub async fn oplog(&self, host: &str) -> Option<PeerOplog> {
        match self
            .client
            .get(self.url(host, "oplog"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response.json().await.ok(),
            Err(err) => {
                debug!(host = %host, "oplog unavailable: {}", err);
                None
            }
        }
    }

    /// Fan out `/primary` to every host concurrently; abstentions dropped.
    pub async fn gather_primaries(&self, hosts: &[String]) -> Vec<PeerPrimary> {
        join_all(hosts.iter().map(|host| self.primary_opinion(host)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Fan out `/oplog` to every host concurrently; unreachable dropped.
    pub async fn gather_oplogs(&self, hosts: &[String]) -> Vec<PeerOplog> {
        join_all(hosts.iter().map(|host| self.oplog(host)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Whether a host's controller answers at all.
    pub async fn reachable(&self, host: &str) -> bool {
        self.health(host).await.is_ok()
    }

    /// Self-reachability: can this node route to its own admin endpoint via
    /// its own derived hostname? A node that cannot is ineligible to found
    /// the replica set.
    pub async fn check_self(&self, hostname: &str) -> bool {
        let url = format!("http://{}:{}/health", hostname, self.self_port);
        for attempt in 1..=SELF_CHECK_ATTEMPTS {
            let result = self
                .client
                .get(&url)
                .timeout(SELF_CHECK_TIMEOUT)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(_) => return true,
                Err(err) => {
                    warn!(
                        hostname = %hostname,
                        attempt,
                        "self-reachability check failed: {}",
                        err
                    );
                    if attempt < SELF_CHECK_ATTEMPTS {
                        tokio::time::sleep(SELF_CHECK_DELAY).await;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_formatting() {
        let client = PeerClient::new(3000, 3000).unwrap();
        assert_eq!(
            client.url("10.0.0.2", "oplog"),
            "http://10.0.0.2:3000/oplog"
        );
        assert_eq!(
            client.url("mongo-10-0-0-1.mongo-cluster", "health"),
            "http://mongo-10-0-0-1.mongo-cluster:3000/health"
        );
    }

    #[tokio::test]
    async fn test_unreachable_peer_abstains() {
        // Reserved TEST-NET-1 address: nothing listens there.
        let client = PeerClient::new(3000, 3000).unwrap();
        assert!(client.primary_opinion("192.0.2.1").await.is_none());
        assert!(client.oplog("192.0.2.1").await.is_none());
    }
}
