//! Reconciler
//!
//! Steady-state loop: keep the replica set's membership aligned with the
//! registry, detect split-brain via peer consensus, detect stale primacy via
//! peer oplogs, and escalate to recovery when the engine reports a replica
//! set identity mismatch. Every cycle reads the world from scratch; nothing
//! carries over except counters.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use mongoward_common::{derive_hostname, MongowardError};
use mongoward_engine::{EngineAdapter, EngineError, EngineState};

use crate::model::{MembershipView, NodeIdentity, PeerPrimary};
use crate::service::engine_err;
use crate::service::hosts::HostsFileManager;
use crate::service::peer::PeerClient;
use crate::service::recovery::{self, NuclearOutcome};
use crate::service::registry::RegistryClient;

/// Reconciler timing and recovery knobs.
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    /// Step-down applied on split-brain detection.
    pub split_brain_step_down_secs: u32,
    /// Step-down applied when a peer holds newer data than this primary.
    pub stale_step_down_secs: u32,
    /// Engine data directory, wiped by the nuclear resync.
    pub data_dir: PathBuf,
    /// Grace between engine shutdown and the wipe.
    pub shutdown_grace: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            interval: Duration::from_secs(30),
            split_brain_step_down_secs: 60,
            stale_step_down_secs: 300,
            data_dir: PathBuf::from("/data/db"),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

pub struct Reconciler {
    identity: NodeIdentity,
    engine: Arc<EngineAdapter>,
    registry: Arc<RegistryClient>,
    hosts: Arc<HostsFileManager>,
    peers: Arc<PeerClient>,
    settings: ReconcilerSettings,
    cycles: AtomicU64,
}

impl Reconciler {
    pub fn new(
        identity: NodeIdentity,
        engine: Arc<EngineAdapter>,
        registry: Arc<RegistryClient>,
        hosts: Arc<HostsFileManager>,
        peers: Arc<PeerClient>,
        settings: ReconcilerSettings,
    ) -> Self {
        Reconciler {
            identity,
            engine,
            registry,
            hosts,
            peers,
            settings,
            cycles: AtomicU64::new(0),
        }
    }

    /// Completed cycle count, exposed through the admin surface.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Run until the shutdown signal fires. A cycle abandoned mid-way is
    /// harmless: the next one reconstructs its state from scratch.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval = ?self.settings.interval, "reconciler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.cycle().await {
                        warn!("reconciliation cycle failed: {}", err);
                    }
                    self.cycles.fetch_add(1, Ordering::Relaxed);
                }
                _ = shutdown.recv() => {
                    info!("reconciler stopping");
                    break;
                }
            }
        }
    }

    async fn cycle(&self) -> Result<(), MongowardError> {
        let members = match self.registry.fetch_members().await {
            Ok(members) if !members.is_empty() => members,
            Ok(_) => {
                warn!("registry returned no members, keeping last known state");
                return Ok(());
            }
            Err(err) => {
                warn!("registry unreachable, keeping last known state: {}", err);
                return Ok(());
            }
        };

        self.hosts.ensure_peer_entries(&self.identity, &members)?;

        let peer_addresses: Vec<String> = members
            .iter()
            .filter(|address| *address != &self.identity.address)
            .cloned()
            .collect();

        // The engine alone decides primacy; a secondary has nothing to do.
        if !self.engine.is_primary().await {
            debug!("not primary, skipping cycle");
            return Ok(());
        }

        let self_host = self.identity.engine_host(self.engine.port());

        if members.len() > 1 {
            let opinions = self.peers.gather_primaries(&peer_addresses).await;
            if let Some(rival) = consensus_rival(&self_host, &opinions, members.len()) {
                error!(
                    rival = %rival,
                    votes = opinions.len(),
                    "majority of peers name a different primary, entering split-brain recovery"
                );
                return self.recover_split_brain(&peer_addresses).await;
            }

            // Compensates for partitions where every peer is unreachable and
            // the consensus check above cannot fire.
            if recovery::stale_primary_check(
                &self.engine,
                &self.peers,
                &peer_addresses,
                self.settings.stale_step_down_secs,
            )
            .await?
            {
                return Ok(());
            }
        }

        self.sync_membership(&members, &peer_addresses, &self_host)
            .await
    }

    async fn sync_membership(
        &self,
        members: &[String],
        peer_addresses: &[String],
        self_host: &str,
    ) -> Result<(), MongowardError> {
        let config = self.engine.get_config().await.map_err(engine_err)?;

        let mut desired: BTreeSet<String> = members.iter().map(|a| derive_hostname(a)).collect();
        desired.insert(self.identity.hostname.clone());

        let current: BTreeSet<String> = config
            .member_hosts()
            .iter()
            .map(|host| host_hostname(host).to_string())
            .collect();

        let view = MembershipView::new(desired, current);
        if view.is_converged(&self.identity.hostname) {
            debug!("membership converged");
            return Ok(());
        }

        // Primary status may have been lost while we gathered state;
        // re-verify immediately before mutating.
        if !self.engine.is_primary().await {
            debug!("primary lost mid-cycle, aborting membership sync");
            return Ok(());
        }

        let to_add = view.to_add();
        let to_remove = view.to_remove(&self.identity.hostname);

        let mut next = config;
        for hostname in &to_add {
            next.add_member(&format!("{}:{}", hostname, self.engine.port()));
        }
        for hostname in &to_remove {
            let configured = next
                .member_hosts()
                .into_iter()
                .find(|host| host_hostname(host) == hostname);
            if let Some(host) = configured {
                next.remove_member(&host);
            }
        }
        next.bump_version();
        let version = next.version();

        match self.engine.reconfigure(next, false).await {
            Ok(()) => {
                info!(
                    added = to_add.len(),
                    removed = to_remove.len(),
                    version,
                    "replica set reconfigured"
                );
                Ok(())
            }
            Err(EngineError::NotPrimary) => {
                debug!("primary lost during reconfigure, cycle abandoned");
                Ok(())
            }
            Err(EngineError::ReplicaSetMismatch(message)) => {
                error!(
                    "replica set identity mismatch ({}), escalating to nuclear resync",
                    message
                );
                self.nuclear_resync(peer_addresses).await
            }
            Err(err) => Err(engine_err(err)),
        }
    }

    /// Split-brain recovery, phase one: step down, reconnect, and give the
    /// engine a few seconds to rejoin the legitimate set. Phase two is the
    /// nuclear resync.
    async fn recover_split_brain(&self, peer_addresses: &[String]) -> Result<(), MongowardError> {
        self.engine
            .step_down(self.settings.split_brain_step_down_secs)
            .await
            .map_err(engine_err)?;
        self.engine.close().await;
        self.engine.connect().await.map_err(engine_err)?;

        for _ in 0..5 {
            if let Ok(EngineState::Initialized(status)) = self.engine.status().await {
                if status.has_primary() {
                    info!(
                        primary = ?status.primary,
                        "split-brain recovery succeeded, set has a primary again"
                    );
                    return Ok(());
                }
            }
            sleep(Duration::from_secs(1)).await;
        }

        warn!("step-down did not restore a healthy set, escalating to nuclear resync");
        self.nuclear_resync(peer_addresses).await
    }

    async fn nuclear_resync(&self, peer_addresses: &[String]) -> Result<(), MongowardError> {
        match recovery::nuclear_resync(
            &self.engine,
            &self.peers,
            peer_addresses,
            &self.settings.data_dir,
            self.settings.shutdown_grace,
        )
        .await?
        {
            NuclearOutcome::Aborted => Ok(()),
            NuclearOutcome::Wiped => {
                info!("data wiped, exiting for supervisor restart");
                std::process::exit(1);
            }
        }
    }
}

/// Hostname part of a `hostname:port` member host.
fn host_hostname(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

/// The host a majority of peers name as primary, when it is not us. `None`
/// means no split-brain: either the peers agree with us, or too few answered
/// to form a majority. Unreachable peers abstain rather than vote.
fn consensus_rival<'a>(
    self_host: &str,
    opinions: &'a [PeerPrimary],
    known_nodes: usize,
) -> Option<&'a str> {
    let threshold = known_nodes / 2 + 1;
    let mut votes: HashMap<&str, usize> = HashMap::new();
    for opinion in opinions {
        if let Some(primary) = opinion.primary.as_deref() {
            *votes.entry(primary).or_insert(0) += 1;
        }
    }

    votes
        .into_iter()
        .filter(|(host, count)| *host != self_host && *count >= threshold)
        .max_by_key(|(_, count)| *count)
        .map(|(host, _)| host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opinion(primary: Option<&str>) -> PeerPrimary {
        PeerPrimary {
            primary: primary.map(str::to_string),
            is_primary: false,
        }
    }

    const SELF: &str = "mongo-10-0-0-1.mongo-cluster:27017";
    const RIVAL: &str = "mongo-10-0-0-2.mongo-cluster:27017";

    #[test]
    fn test_majority_naming_rival_detected() {
        // Three known nodes, both peers name the rival: 2 >= ⌊3/2⌋+1.
        let opinions = vec![opinion(Some(RIVAL)), opinion(Some(RIVAL))];
        assert_eq!(consensus_rival(SELF, &opinions, 3), Some(RIVAL));
    }

    #[test]
    fn test_minority_is_not_split_brain() {
        let opinions = vec![opinion(Some(RIVAL)), opinion(None)];
        assert_eq!(consensus_rival(SELF, &opinions, 4), None);
    }

    #[test]
    fn test_agreement_with_self_is_not_split_brain() {
        let opinions = vec![opinion(Some(SELF)), opinion(Some(SELF))];
        assert_eq!(consensus_rival(SELF, &opinions, 3), None);
    }

    #[test]
    fn test_abstentions_never_vote() {
        // Both peers unreachable: no opinions gathered, no majority possible.
        let opinions: Vec<PeerPrimary> = Vec::new();
        assert_eq!(consensus_rival(SELF, &opinions, 3), None);
    }

    #[test]
    fn test_split_vote_below_threshold() {
        let other = "mongo-10-0-0-3.mongo-cluster:27017";
        let opinions = vec![opinion(Some(RIVAL)), opinion(Some(other))];
        assert_eq!(consensus_rival(SELF, &opinions, 3), None);
    }

    #[test]
    fn test_five_node_threshold() {
        let opinions = vec![
            opinion(Some(RIVAL)),
            opinion(Some(RIVAL)),
            opinion(Some(RIVAL)),
            opinion(None),
        ];
        // ⌊5/2⌋+1 = 3 votes required.
        assert_eq!(consensus_rival(SELF, &opinions, 5), Some(RIVAL));
    }

    #[test]
    fn test_host_hostname() {
        assert_eq!(
            host_hostname("mongo-10-0-0-1.mongo-cluster:27017"),
            "mongo-10-0-0-1.mongo-cluster"
        );
        assert_eq!(host_hostname("plain-host"), "plain-host");
    }

    #[test]
    fn test_default_settings_match_contract() {
        let settings = ReconcilerSettings::default();
        assert_eq!(settings.interval, Duration::from_secs(30));
        assert_eq!(settings.split_brain_step_down_secs, 60);
        assert_eq!(settings.stale_step_down_secs, 300);
        assert_eq!(settings.shutdown_grace, Duration::from_secs(5));
    }
}
