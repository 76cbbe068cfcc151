//! Recovery actions
//!
//! The destructive and semi-destructive paths shared by bootstrap and the
//! reconciler: the stale-primary step-down, the single-member self-heal, and
//! the nuclear resync. Every destructive action is gated on explicit
//! evidence that a peer holds strictly newer data; when evidence is
//! ambiguous the controller waits.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use mongoward_common::MongowardError;
use mongoward_engine::{EngineAdapter, OplogTimestamp};

use crate::model::PeerOplog;
use crate::service::engine_err;
use crate::service::peer::PeerClient;

/// Outcome of a nuclear resync attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NuclearOutcome {
    /// Local data is the newest visible; nothing was destroyed.
    Aborted,
    /// Local data was wiped; the process must exit so the supervisor
    /// restarts it into a fresh bootstrap.
    Wiped,
}

/// The peer holding an oplog timestamp strictly greater than the local one,
/// if any. A local `None` loses to any peer that has a timestamp; peers
/// without one never win.
pub fn newer_peer<'a>(
    local: Option<OplogTimestamp>,
    peers: &'a [PeerOplog],
) -> Option<&'a PeerOplog> {
    peers
        .iter()
        .filter(|peer| match (peer.timestamp, local) {
            (Some(theirs), Some(ours)) => theirs > ours,
            (Some(_), None) => true,
            (None, _) => false,
        })
        .max_by_key(|peer| peer.timestamp)
}

/// Stale-primary self-check: a returning primary whose oplog trails a peer
/// must not clobber writes the new primary accepted. Steps down for
/// `step_down_secs` when a peer demonstrably holds newer data. Returns
/// whether a step-down happened.
pub async fn stale_primary_check(
    engine: &EngineAdapter,
    peers: &PeerClient,
    peer_addresses: &[String],
    step_down_secs: u32,
) -> Result<bool, MongowardError> {
    if peer_addresses.is_empty() {
        return Ok(false);
    }

    let local = match engine.latest_oplog().await {
        Ok(ts) => ts,
        Err(err) => {
            warn!("cannot read local oplog, skipping stale-primary check: {}", err);
            return Ok(false);
        }
    };

    let oplogs = peers.gather_oplogs(peer_addresses).await;
    if let Some(peer) = newer_peer(local, &oplogs) {
        warn!(
            peer = %peer.hostname,
            local = ?local,
            remote = ?peer.timestamp,
            "peer holds newer oplog while self is primary, stepping down for {}s",
            step_down_secs
        );
        engine.step_down(step_down_secs).await.map_err(engine_err)?;
        return Ok(true);
    }
    Ok(false)
}

/// Single-member self-heal: force-reconfigure down to self when this node
/// woke into an existing set with no reachable peers and no primary. Gated
/// on the same oplog evidence as the nuclear resync. Returns whether the
/// reconfigure was submitted.
pub async fn single_member_heal(
    engine: &EngineAdapter,
    self_host: &str,
    peers: &PeerClient,
    peer_addresses: &[String],
) -> Result<bool, MongowardError> {
    let local = match engine.latest_oplog().await {
        Ok(ts) => ts,
        Err(err) => {
            warn!("cannot read local oplog, skipping self-heal: {}", err);
            return Ok(false);
        }
    };

    let oplogs = peers.gather_oplogs(peer_addresses).await;
    if let Some(peer) = newer_peer(local, &oplogs) {
        info!(
            peer = %peer.hostname,
            "peer holds newer data, waiting for re-admission instead of self-healing"
        );
        return Ok(false);
    }

    let mut config = engine.get_config().await.map_err(engine_err)?;
    config.retain_only(self_host);
    config.bump_version();
    engine.reconfigure(config, true).await.map_err(engine_err)?;
    info!(host = %self_host, "force-reconfigured to single-member set");
    Ok(true)
}

/// Nuclear resync: terminate the engine, destroy the local data directory,
/// and let the supervisor restart us into a full sync from a surviving peer.
/// Aborts unless some responsive peer holds strictly newer data than self.
pub async fn nuclear_resync(
    engine: &EngineAdapter,
    peers: &PeerClient,
    peer_addresses: &[String],
    data_dir: &Path,
    grace: Duration,
) -> Result<NuclearOutcome, MongowardError> {
    let local = match engine.latest_oplog().await {
        Ok(ts) => ts,
        Err(err) => {
            warn!("cannot read local oplog, refusing nuclear resync: {}", err);
            return Ok(NuclearOutcome::Aborted);
        }
    };

    let oplogs = peers.gather_oplogs(peer_addresses).await;
    let Some(peer) = newer_peer(local, &oplogs) else {
        warn!(
            local = ?local,
            responsive_peers = oplogs.len(),
            "local oplog is the newest visible, aborting nuclear resync"
        );
        return Ok(NuclearOutcome::Aborted);
    };

    warn!(
        peer = %peer.hostname,
        local = ?local,
        remote = ?peer.timestamp,
        "nuclear resync: wiping local data to resync from peer"
    );

    engine.shutdown_engine().await.map_err(engine_err)?;
    engine.close().await;
    tokio::time::sleep(grace).await;

    wipe_data_dir(data_dir)?;
    Ok(NuclearOutcome::Wiped)
}

/// Delete the data directory's contents and recreate it empty.
pub fn wipe_data_dir(data_dir: &Path) -> Result<(), MongowardError> {
    if data_dir.exists() {
        std::fs::remove_dir_all(data_dir)?;
    }
    std::fs::create_dir_all(data_dir)?;
    info!(path = %data_dir.display(), "data directory wiped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(time: u32, counter: u32) -> Option<OplogTimestamp> {
        Some(OplogTimestamp { time, counter })
    }

    fn peer(hostname: &str, timestamp: Option<OplogTimestamp>) -> PeerOplog {
        PeerOplog {
            hostname: hostname.to_string(),
            ip: "10.0.0.9".to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_newer_peer_strictly_greater_wins() {
        let peers = vec![peer("a", ts(100, 5)), peer("b", ts(101, 0))];
        let found = newer_peer(ts(100, 5), &peers).unwrap();
        assert_eq!(found.hostname, "b");
    }

    #[test]
    fn test_equal_timestamp_is_not_newer() {
        let peers = vec![peer("a", ts(100, 5))];
        assert!(newer_peer(ts(100, 5), &peers).is_none());
    }

    #[test]
    fn test_local_maximum_aborts() {
        let peers = vec![peer("a", ts(99, 9)), peer("b", ts(100, 4))];
        assert!(newer_peer(ts(100, 5), &peers).is_none());
    }

    #[test]
    fn test_counter_breaks_second_ties() {
        let peers = vec![peer("a", ts(100, 6))];
        assert_eq!(newer_peer(ts(100, 5), &peers).unwrap().hostname, "a");
    }

    #[test]
    fn test_missing_local_oplog_loses_to_any_peer() {
        let peers = vec![peer("a", ts(1, 0))];
        assert_eq!(newer_peer(None, &peers).unwrap().hostname, "a");
    }

    #[test]
    fn test_silent_peers_never_win() {
        let peers = vec![peer("a", None), peer("b", None)];
        assert!(newer_peer(None, &peers).is_none());
        assert!(newer_peer(ts(5, 0), &peers).is_none());
    }

    #[test]
    fn test_wipe_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("db");
        std::fs::create_dir_all(data.join("journal")).unwrap();
        std::fs::write(data.join("WiredTiger.wt"), b"x").unwrap();

        wipe_data_dir(&data).unwrap();
        assert!(data.exists());
        assert_eq!(std::fs::read_dir(&data).unwrap().count(), 0);
    }
}
