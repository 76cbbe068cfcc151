//! Core data model
//!
//! Node identity, the per-cycle membership view, and the peer RPC wire
//! formats shared by the client here and the server handlers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use mongoward_common::derive_hostname;
use mongoward_engine::OplogTimestamp;

/// This node's identity, fixed at startup and immutable thereafter.
#[derive(Clone, Debug)]
pub struct NodeIdentity {
    /// Externally routable IPv4 address as reported by the registry or probes.
    pub address: String,
    /// Derived stable hostname; used everywhere in engine configuration.
    pub hostname: String,
    /// Local-testing mode: self resolves to a private interface address
    /// instead of loopback.
    pub local_testing: bool,
}

impl NodeIdentity {
    pub fn new(address: String, local_testing: bool) -> Self {
        let hostname = derive_hostname(&address);
        NodeIdentity {
            address,
            hostname,
            local_testing,
        }
    }

    /// `hostname:port` as it appears in replica-set member documents.
    pub fn engine_host(&self, port: u16) -> String {
        format!("{}:{}", self.hostname, port)
    }
}

/// Membership view recomputed each reconciliation cycle, never persisted.
#[derive(Clone, Debug, Default)]
pub struct MembershipView {
    /// Hostnames the registry says should be members, self included.
    pub desired: BTreeSet<String>,
    /// Hostnames currently in the replica-set configuration.
    pub current: BTreeSet<String>,
}

impl MembershipView {
    pub fn new(desired: BTreeSet<String>, current: BTreeSet<String>) -> Self {
        MembershipView { desired, current }
    }

    /// Hostnames to append this cycle.
    pub fn to_add(&self) -> Vec<String> {
        self.desired.difference(&self.current).cloned().collect()
    }

    /// Hostnames to splice out this cycle. Self is never removed, even when
    /// the registry omits it.
    pub fn to_remove(&self, self_hostname: &str) -> Vec<String> {
        self.current
            .difference(&self.desired)
            .filter(|hostname| hostname.as_str() != self_hostname)
            .cloned()
            .collect()
    }

    pub fn is_converged(&self, self_hostname: &str) -> bool {
        self.to_add().is_empty() && self.to_remove(self_hostname).is_empty()
    }
}

/// `GET /health` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHealth {
    pub status: String,
    pub timestamp: i64,
}

/// `GET /primary` response: this peer's opinion of the current primary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPrimary {
    /// `hostname:port` of the primary this peer sees, if any.
    pub primary: Option<String>,
    pub is_primary: bool,
}

/// `GET /oplog` response: this peer's newest oplog timestamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerOplog {
    pub hostname: String,
    pub ip: String,
    pub timestamp: Option<OplogTimestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(desired: &[&str], current: &[&str]) -> MembershipView {
        MembershipView::new(
            desired.iter().map(|s| s.to_string()).collect(),
            current.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_identity_derives_hostname() {
        let identity = NodeIdentity::new("10.0.0.1".to_string(), false);
        assert_eq!(identity.hostname, "mongo-10-0-0-1.mongo-cluster");
        assert_eq!(
            identity.engine_host(27017),
            "mongo-10-0-0-1.mongo-cluster:27017"
        );
    }

    #[test]
    fn test_membership_diff() {
        let view = view(&["a", "b", "c"], &["a", "d"]);
        assert_eq!(view.to_add(), vec!["b", "c"]);
        assert_eq!(view.to_remove("self"), vec!["d"]);
    }

    #[test]
    fn test_self_never_removed() {
        let view = view(&["a"], &["a", "self"]);
        assert!(view.to_remove("self").is_empty());
        assert!(view.is_converged("self"));
    }

    #[test]
    fn test_converged_view_is_noop() {
        let view = view(&["a", "b"], &["a", "b"]);
        assert!(view.is_converged("a"));
    }
}
