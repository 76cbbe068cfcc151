//! Bootstrap coordinator
//!
//! One-shot startup sequence: hosts entries, startup jitter, engine
//! connection, then a branch on observed state. A cold cluster runs
//! discovery-before-init and the founder election; an existing set is
//! joined and checked for stale primacy before the reconciler takes over.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use mongoward_common::{derive_hostname, sort_addresses, MongowardError};
use mongoward_engine::{EngineAdapter, EngineState, ProbeResult, ReplicaSetStatus};

use crate::model::NodeIdentity;
use crate::service::engine_err;
use crate::service::hosts::HostsFileManager;
use crate::service::peer::PeerClient;
use crate::service::recovery;
use crate::service::registry::RegistryClient;

/// Bootstrap timing and credentials.
#[derive(Clone, Debug)]
pub struct BootstrapSettings {
    pub root_username: Option<String>,
    pub root_password: Option<String>,
    /// Upper bound of the startup jitter applied when peers exist.
    pub jitter_max: Duration,
    /// How long to wait for another node's set to reach us, or for the
    /// founder to act, before re-evaluating.
    pub wait_timeout: Duration,
    pub wait_poll: Duration,
    /// Stale-primary step-down applied once at bootstrap when joining an
    /// existing set as primary.
    pub stale_step_down_secs: u32,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        BootstrapSettings {
            root_username: None,
            root_password: None,
            jitter_max: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(300),
            wait_poll: Duration::from_secs(10),
            stale_step_down_secs: 300,
        }
    }
}

pub struct BootstrapCoordinator {
    identity: NodeIdentity,
    engine: Arc<EngineAdapter>,
    registry: Arc<RegistryClient>,
    hosts: Arc<HostsFileManager>,
    peers: Arc<PeerClient>,
    settings: BootstrapSettings,
}

impl BootstrapCoordinator {
    pub fn new(
        identity: NodeIdentity,
        engine: Arc<EngineAdapter>,
        registry: Arc<RegistryClient>,
        hosts: Arc<HostsFileManager>,
        peers: Arc<PeerClient>,
        settings: BootstrapSettings,
    ) -> Self {
        BootstrapCoordinator {
            identity,
            engine,
            registry,
            hosts,
            peers,
            settings,
        }
    }

    /// Run the bootstrap sequence to completion. The reconciler must not
    /// start before this returns.
    pub async fn run(&self) -> Result<(), MongowardError> {
        self.hosts.ensure_self_entry(&self.identity)?;

        let members = match self.registry.fetch_members().await {
            Ok(members) => members,
            Err(err) => {
                warn!("registry unavailable during bootstrap: {}", err);
                Vec::new()
            }
        };
        self.hosts.ensure_peer_entries(&self.identity, &members)?;

        let peer_addresses: Vec<String> = members
            .iter()
            .filter(|address| *address != &self.identity.address)
            .cloned()
            .collect();

        // Desynchronize concurrent cold starts.
        if !peer_addresses.is_empty() {
            let jitter =
                Duration::from_millis(rand::rng().random_range(
                    0..self.settings.jitter_max.as_millis().max(1) as u64,
                ));
            info!(jitter = ?jitter, "applying startup jitter");
            sleep(jitter).await;
        }

        self.engine.connect().await.map_err(engine_err)?;

        match self.engine.status().await.map_err(engine_err)? {
            EngineState::NeedsAuth => {
                info!("replica set exists, upgrading to authenticated connection");
                self.engine.ensure_authenticated().await.map_err(engine_err)
            }
            EngineState::Initialized(status) => {
                self.join_existing_set(status, &peer_addresses).await
            }
            EngineState::NotInitialized => self.cold_start(&members, &peer_addresses).await,
        }
    }

    /// The engine already belongs to a set: make sure we are authenticated,
    /// run the stale-primary check once, and self-heal a marooned
    /// single-survivor set if that is what we woke into.
    async fn join_existing_set(
        &self,
        status: ReplicaSetStatus,
        peer_addresses: &[String],
    ) -> Result<(), MongowardError> {
        if self.settings.root_username.is_some() {
            if let Err(err) = self.engine.ensure_authenticated().await {
                warn!("authenticated upgrade failed at bootstrap: {}", err);
            }
        }

        if status.is_primary() && !peer_addresses.is_empty() {
            recovery::stale_primary_check(
                &self.engine,
                &self.peers,
                peer_addresses,
                self.settings.stale_step_down_secs,
            )
            .await?;
            return Ok(());
        }

        let self_host = self.identity.engine_host(self.engine.port());
        let marooned = !status.has_primary()
            && status
                .members
                .iter()
                .all(|member| member.is_self || !member.healthy);

        if marooned && status.members.len() > 1 {
            info!("woke into an existing set with no primary and no reachable peers");
            recovery::single_member_heal(&self.engine, &self_host, &self.peers, peer_addresses)
                .await?;
        }

        Ok(())
    }

    /// No local set: find out whether somebody else already founded one, and
    /// if nobody did, elect the founder by lowest address.
    async fn cold_start(
        &self,
        members: &[String],
        peer_addresses: &[String],
    ) -> Result<(), MongowardError> {
        for address in peer_addresses {
            let hostname = derive_hostname(address);
            if self.engine.probe(&hostname).await == ProbeResult::Initialized {
                info!(peer = %hostname, "peer already has a replica set, waiting to be added");
                if self.wait_for_set().await? {
                    return Ok(());
                }
                warn!("peer-led set never reached us, falling back to founder election");
                break;
            }
        }

        self.founder_election(members).await
    }

    /// Poll the local engine until the peer-led set reaches us or the wait
    /// expires. Returns whether the set arrived.
    async fn wait_for_set(&self) -> Result<bool, MongowardError> {
        let deadline = Instant::now() + self.settings.wait_timeout;
        while Instant::now() < deadline {
            match self.engine.status().await.map_err(engine_err)? {
                EngineState::Initialized(_) => {
                    info!("replica set reached this node");
                    if self.settings.root_username.is_some() {
                        self.engine.ensure_authenticated().await.map_err(engine_err)?;
                    }
                    return Ok(true);
                }
                EngineState::NeedsAuth => {
                    self.engine.ensure_authenticated().await.map_err(engine_err)?;
                    return Ok(true);
                }
                EngineState::NotInitialized => sleep(self.settings.wait_poll).await,
            }
        }
        Ok(false)
    }

    async fn founder_election(&self, members: &[String]) -> Result<(), MongowardError> {
        let mut all = members.to_vec();
        if !all.contains(&self.identity.address) {
            all.push(self.identity.address.clone());
        }
        let sorted = sort_addresses(all);

        if sorted.len() == 1 {
            info!("sole known member, founding single-node replica set");
            return self.found().await;
        }

        let self_reachable = self.peers.check_self(&self.identity.hostname).await;
        if !self_reachable {
            warn!(
                hostname = %self.identity.hostname,
                "cannot reach own admin endpoint via derived hostname, ceding founder role"
            );
        }

        if self_reachable && sorted.first() == Some(&self.identity.address) {
            info!(address = %self.identity.address, "smallest address and self-reachable, founding");
            return self.found().await;
        }

        info!(
            expected_founder = %sorted.first().cloned().unwrap_or_default(),
            "waiting for the founder to initialize the set"
        );

        loop {
            if self.wait_for_set().await? {
                return Ok(());
            }

            // The founder never showed. Re-probe reachability and take over
            // if we are the smallest address that can actually act.
            let mut reachable = Vec::new();
            let mut self_reachable = false;
            for address in &sorted {
                if address == &self.identity.address {
                    self_reachable = self.peers.check_self(&self.identity.hostname).await;
                    if self_reachable {
                        reachable.push(address.clone());
                    }
                } else if self.peers.reachable(address).await {
                    reachable.push(address.clone());
                }
            }

            if self_reachable && reachable.first() == Some(&self.identity.address) {
                warn!("founder wait expired and self is the smallest reachable address, taking over");
                return self.found().await;
            }

            warn!(
                reachable = reachable.len(),
                "founder wait expired but self is not the smallest reachable address, waiting again"
            );
        }
    }

    /// Initialize the set with self as sole member and create the root user.
    async fn found(&self) -> Result<(), MongowardError> {
        self.engine
            .initiate(&self.identity.hostname)
            .await
            .map_err(engine_err)?;

        // The engine needs a moment to elect itself primary of the one-member
        // set; user creation is rejected until then.
        for _ in 0..30 {
            if self.engine.is_primary().await {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }

        if let (Some(username), Some(password)) = (
            self.settings.root_username.as_deref(),
            self.settings.root_password.as_deref(),
        ) {
            self.engine
                .create_root_user(username, password)
                .await
                .map_err(engine_err)?;
        }

        info!(hostname = %self.identity.hostname, "replica set founded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_contract() {
        let settings = BootstrapSettings::default();
        assert_eq!(settings.jitter_max, Duration::from_secs(10));
        assert_eq!(settings.wait_timeout, Duration::from_secs(300));
        assert_eq!(settings.wait_poll, Duration::from_secs(10));
        assert_eq!(settings.stale_step_down_secs, 300);
    }

    #[test]
    fn test_founder_is_smallest_sorted_address() {
        let sorted = sort_addresses(vec![
            "10.0.0.3".to_string(),
            "10.0.0.1".to_string(),
            "10.0.0.2".to_string(),
        ]);
        assert_eq!(sorted.first().map(String::as_str), Some("10.0.0.1"));
    }
}
