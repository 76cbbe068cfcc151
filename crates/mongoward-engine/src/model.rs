//! Engine state models
//!
//! Typed views over the engine's status and configuration documents. The
//! configuration keeps its raw document alongside the typed accessors so a
//! read-modify-write cycle preserves fields the controller does not touch.

use mongodb::bson::{doc, Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Engine state as observable by the controller.
#[derive(Clone, Debug)]
pub enum EngineState {
    /// No replica set exists yet.
    NotInitialized,
    /// A replica set exists but the current connection is unauthenticated.
    NeedsAuth,
    /// A replica set exists and answered the status query.
    Initialized(ReplicaSetStatus),
}

/// Replica-set member states reported by the status command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    Startup,
    Primary,
    Secondary,
    Recovering,
    Startup2,
    Unknown,
    Arbiter,
    Down,
    Rollback,
    Removed,
}

impl MemberState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => MemberState::Startup,
            1 => MemberState::Primary,
            2 => MemberState::Secondary,
            3 => MemberState::Recovering,
            5 => MemberState::Startup2,
            7 => MemberState::Arbiter,
            8 => MemberState::Down,
            9 => MemberState::Rollback,
            10 => MemberState::Removed,
            _ => MemberState::Unknown,
        }
    }
}

/// Health of one replica-set member, from the status command.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberHealth {
    /// `hostname:port` as configured.
    pub name: String,
    pub state: MemberState,
    pub healthy: bool,
    pub is_self: bool,
}

/// Parsed replica-set status.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetStatus {
    pub set_name: String,
    pub self_state: MemberState,
    /// `hostname:port` of the primary, if any member reports one.
    pub primary: Option<String>,
    pub members: Vec<MemberHealth>,
}

impl ReplicaSetStatus {
    /// Parse the document returned by the status command.
    pub fn from_document(doc: &Document) -> Result<Self, EngineError> {
        let set_name = doc
            .get_str("set")
            .map_err(|_| EngineError::Malformed("status missing 'set'".to_string()))?
            .to_string();

        let self_state = doc
            .get_i32("myState")
            .map(MemberState::from_code)
            .unwrap_or(MemberState::Unknown);

        let mut members = Vec::new();
        if let Ok(raw_members) = doc.get_array("members") {
            for entry in raw_members.iter().filter_map(Bson::as_document) {
                let name = match entry.get_str("name") {
                    Ok(name) => name.to_string(),
                    Err(_) => continue,
                };
                let state = entry
                    .get_i32("state")
                    .map(MemberState::from_code)
                    .unwrap_or(MemberState::Unknown);
                let healthy = match entry.get("health") {
                    Some(Bson::Double(h)) => *h > 0.0,
                    Some(Bson::Int32(h)) => *h > 0,
                    Some(Bson::Int64(h)) => *h > 0,
                    _ => false,
                };
                let is_self = entry.get_bool("self").unwrap_or(false);
                members.push(MemberHealth {
                    name,
                    state,
                    healthy,
                    is_self,
                });
            }
        }

        let primary = members
            .iter()
            .find(|m| m.state == MemberState::Primary)
            .map(|m| m.name.clone());

        Ok(ReplicaSetStatus {
            set_name,
            self_state,
            primary,
            members,
        })
    }

    pub fn is_primary(&self) -> bool {
        self.self_state == MemberState::Primary
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Members the status command could reach, self included.
    pub fn healthy_members(&self) -> Vec<&MemberHealth> {
        self.members.iter().filter(|m| m.healthy).collect()
    }
}

/// Timestamp of an oplog entry: seconds since epoch plus an intra-second
/// counter. Derives lexicographic order, which is the engine's own ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OplogTimestamp {
    pub time: u32,
    pub counter: u32,
}

impl From<Timestamp> for OplogTimestamp {
    fn from(ts: Timestamp) -> Self {
        OplogTimestamp {
            time: ts.time,
            counter: ts.increment,
        }
    }
}

/// Replica-set configuration document with typed access to the parts the
/// controller mutates. The raw document is preserved so untouched fields
/// (settings, protocol version, write concern defaults) round-trip intact.
#[derive(Clone, Debug)]
pub struct ReplicaSetConfig {
    raw: Document,
}

impl ReplicaSetConfig {
    pub fn from_document(raw: Document) -> Result<Self, EngineError> {
        if !raw.contains_key("members") || !raw.contains_key("version") {
            return Err(EngineError::Malformed(
                "config missing 'members' or 'version'".to_string(),
            ));
        }
        Ok(ReplicaSetConfig { raw })
    }

    /// Build the initial single-member configuration used by initiate and by
    /// the single-member self-heal.
    pub fn single_member(set_name: &str, host: &str) -> Self {
        ReplicaSetConfig {
            raw: doc! {
                "_id": set_name,
                "version": 1,
                "members": [ { "_id": 0, "host": host } ],
            },
        }
    }

    pub fn into_document(self) -> Document {
        self.raw
    }

    pub fn set_name(&self) -> &str {
        self.raw.get_str("_id").unwrap_or_default()
    }

    pub fn version(&self) -> i64 {
        match self.raw.get("version") {
            Some(Bson::Int32(v)) => *v as i64,
            Some(Bson::Int64(v)) => *v,
            _ => 0,
        }
    }

    /// Member `host` values (`hostname:port`) in document order.
    pub fn member_hosts(&self) -> Vec<String> {
        self.raw
            .get_array("members")
            .map(|members| {
                members
                    .iter()
                    .filter_map(Bson::as_document)
                    .filter_map(|m| m.get_str("host").ok())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Member `_id` values in document order.
    pub fn member_ids(&self) -> Vec<i32> {
        self.raw
            .get_array("members")
            .map(|members| {
                members
                    .iter()
                    .filter_map(Bson::as_document)
                    .filter_map(|m| m.get_i32("_id").ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a member with `_id = max(existing) + 1`. Existing ids are never
    /// reused or renumbered; the engine rejects `_id` changes for members it
    /// already knows.
    pub fn add_member(&mut self, host: &str) {
        let next_id = self.member_ids().into_iter().max().map_or(0, |id| id + 1);
        if let Ok(members) = self.raw.get_array_mut("members") {
            members.push(Bson::Document(doc! { "_id": next_id, "host": host }));
        }
    }

    /// Splice out the member with the given `host`. Returns whether a member
    /// was removed.
    pub fn remove_member(&mut self, host: &str) -> bool {
        if let Ok(members) = self.raw.get_array_mut("members") {
            let before = members.len();
            members.retain(|m| {
                m.as_document()
                    .and_then(|d| d.get_str("host").ok())
                    .map(|h| h != host)
                    .unwrap_or(true)
            });
            return members.len() != before;
        }
        false
    }

    /// Replace the member list with a single member, keeping its `_id`.
    pub fn retain_only(&mut self, host: &str) {
        if let Ok(members) = self.raw.get_array_mut("members") {
            members.retain(|m| {
                m.as_document()
                    .and_then(|d| d.get_str("host").ok())
                    .map(|h| h == host)
                    .unwrap_or(false)
            });
        }
    }

    pub fn bump_version(&mut self) {
        let next = self.version() + 1;
        self.raw.insert("version", Bson::Int64(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_member_config() -> ReplicaSetConfig {
        ReplicaSetConfig::from_document(doc! {
            "_id": "rs0",
            "version": 3,
            "protocolVersion": 1,
            "members": [
                { "_id": 0, "host": "mongo-10-0-0-1.mongo-cluster:27017" },
                { "_id": 1, "host": "mongo-10-0-0-2.mongo-cluster:27017" },
                { "_id": 4, "host": "mongo-10-0-0-3.mongo-cluster:27017" },
            ],
            "settings": { "electionTimeoutMillis": 10000 },
        })
        .unwrap()
    }

    #[test]
    fn test_add_member_uses_max_plus_one() {
        let mut config = three_member_config();
        config.add_member("mongo-10-0-0-4.mongo-cluster:27017");
        assert_eq!(config.member_ids(), vec![0, 1, 4, 5]);
    }

    #[test]
    fn test_remove_member_preserves_ids() {
        let mut config = three_member_config();
        assert!(config.remove_member("mongo-10-0-0-2.mongo-cluster:27017"));
        assert_eq!(config.member_ids(), vec![0, 4]);
        assert!(!config.remove_member("mongo-10-0-0-9.mongo-cluster:27017"));
    }

    #[test]
    fn test_removed_id_never_reused() {
        let mut config = three_member_config();
        config.remove_member("mongo-10-0-0-3.mongo-cluster:27017");
        config.add_member("mongo-10-0-0-5.mongo-cluster:27017");
        // max existing id was 1 after removing 4, so the new member gets 2;
        // ids present before the cycle are untouched.
        assert_eq!(config.member_ids(), vec![0, 1, 2]);
    }

    #[test]
    fn test_bump_version_monotonic() {
        let mut config = three_member_config();
        let before = config.version();
        config.bump_version();
        assert_eq!(config.version(), before + 1);
    }

    #[test]
    fn test_untouched_fields_round_trip() {
        let mut config = three_member_config();
        config.add_member("mongo-10-0-0-4.mongo-cluster:27017");
        config.bump_version();
        let doc = config.into_document();
        assert_eq!(doc.get_i32("protocolVersion").unwrap(), 1);
        assert!(doc.get_document("settings").is_ok());
    }

    #[test]
    fn test_single_member_config() {
        let config = ReplicaSetConfig::single_member("rs0", "mongo-10-0-0-1.mongo-cluster:27017");
        assert_eq!(config.set_name(), "rs0");
        assert_eq!(config.version(), 1);
        assert_eq!(
            config.member_hosts(),
            vec!["mongo-10-0-0-1.mongo-cluster:27017"]
        );
    }

    #[test]
    fn test_oplog_timestamp_ordering() {
        let older = OplogTimestamp {
            time: 100,
            counter: 9,
        };
        let newer = OplogTimestamp {
            time: 101,
            counter: 1,
        };
        assert!(newer > older);

        let same_second = OplogTimestamp {
            time: 100,
            counter: 10,
        };
        assert!(same_second > older);
    }

    #[test]
    fn test_status_parsing() {
        let status = ReplicaSetStatus::from_document(&doc! {
            "set": "rs0",
            "myState": 1,
            "members": [
                {
                    "name": "mongo-10-0-0-1.mongo-cluster:27017",
                    "state": 1,
                    "health": 1.0,
                    "self": true,
                },
                {
                    "name": "mongo-10-0-0-2.mongo-cluster:27017",
                    "state": 2,
                    "health": 1.0,
                },
                {
                    "name": "mongo-10-0-0-3.mongo-cluster:27017",
                    "state": 8,
                    "health": 0.0,
                },
            ],
        })
        .unwrap();

        assert!(status.is_primary());
        assert_eq!(
            status.primary.as_deref(),
            Some("mongo-10-0-0-1.mongo-cluster:27017")
        );
        assert_eq!(status.members.len(), 3);
        assert_eq!(status.healthy_members().len(), 2);
        assert!(status.members[0].is_self);
    }

    #[test]
    fn test_status_without_primary() {
        let status = ReplicaSetStatus::from_document(&doc! {
            "set": "rs0",
            "myState": 2,
            "members": [
                { "name": "mongo-10-0-0-1.mongo-cluster:27017", "state": 2, "health": 1.0, "self": true },
            ],
        })
        .unwrap();

        assert!(!status.is_primary());
        assert!(!status.has_primary());
    }
}
