//! Hosts-file manager
//!
//! Maintains the local name→address mappings that make the hostname
//! indirection work: this node's own hostname resolves to loopback (NAT
//! hairpinning fails on most hosts), peers' hostnames resolve to their
//! external addresses. Entries are append-only and idempotent; existing
//! lines are never edited.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use mongoward_common::{derive_hostname, MongowardError};

use crate::model::NodeIdentity;

const LOOPBACK: &str = "127.0.0.1";

pub struct HostsFileManager {
    hosts_path: PathBuf,
    nsswitch_path: PathBuf,
    /// Hostnames already written or found, to skip file scans on the hot
    /// path. The file remains the source of truth.
    known: DashMap<String, String>,
}

impl HostsFileManager {
    pub fn new(hosts_path: impl Into<PathBuf>, nsswitch_path: impl Into<PathBuf>) -> Self {
        HostsFileManager {
            hosts_path: hosts_path.into(),
            nsswitch_path: nsswitch_path.into(),
            known: DashMap::new(),
        }
    }

    /// Manager for the system's real configuration files.
    pub fn system() -> Self {
        Self::new("/etc/hosts", "/etc/nsswitch.conf")
    }

    /// Map this node's own hostname. Loopback in production; the private
    /// interface address in local testing, where hairpinning is not a
    /// problem and loopback would break cross-container traffic.
    pub fn ensure_self_entry(&self, identity: &NodeIdentity) -> Result<(), MongowardError> {
        let address = if identity.local_testing {
            identity.address.as_str()
        } else {
            LOOPBACK
        };
        self.ensure_entry(address, &identity.hostname)?;
        Ok(())
    }

    /// Map each peer address to its derived hostname. Self is skipped: its
    /// mapping must stay on loopback.
    pub fn ensure_peer_entries(
        &self,
        identity: &NodeIdentity,
        addresses: &[String],
    ) -> Result<(), MongowardError> {
        for address in addresses {
            if address == &identity.address {
                continue;
            }
            self.ensure_entry(address, &derive_hostname(address))?;
        }
        Ok(())
    }

    /// Append `<ip> <hostname>` unless the hostname is already present.
    /// Returns whether a line was written.
    pub fn ensure_entry(&self, address: &str, hostname: &str) -> Result<bool, MongowardError> {
        if self.known.contains_key(hostname) || self.file_contains(hostname)? {
            self.known
                .entry(hostname.to_string())
                .or_insert_with(|| address.to_string());
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.hosts_path)
            .map_err(|e| MongowardError::HostsFile(e.to_string()))?;
        writeln!(file, "{} {}", address, hostname)
            .map_err(|e| MongowardError::HostsFile(e.to_string()))?;

        self.known
            .insert(hostname.to_string(), address.to_string());
        info!(address = %address, hostname = %hostname, "hosts entry added");
        Ok(true)
    }

    fn file_contains(&self, hostname: &str) -> Result<bool, MongowardError> {
        let file = match File::open(&self.hosts_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(MongowardError::HostsFile(e.to_string())),
        };

        let reader = BufReader::new(file);
        for line in reader.lines().map_while(Result::ok) {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.split_whitespace().skip(1).any(|name| name == hostname) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// One-shot rewrite of the name-service switch so the hosts file is
    /// consulted before DNS. Safe to call when the file is absent.
    pub fn prefer_hosts_lookup(&self) -> Result<(), MongowardError> {
        let content = match std::fs::read_to_string(&self.nsswitch_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.nsswitch_path.display(), "nsswitch config missing, creating");
                String::new()
            }
            Err(e) => return Err(MongowardError::HostsFile(e.to_string())),
        };

        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let mut rewritten = false;
        let mut found = false;

        for line in lines.iter_mut() {
            if !line.trim_start().starts_with("hosts:") {
                continue;
            }
            found = true;
            if !hosts_line_prefers_files(line) {
                *line = "hosts: files dns".to_string();
                rewritten = true;
            }
        }

        if !found {
            lines.push("hosts: files dns".to_string());
            rewritten = true;
        }

        if rewritten {
            std::fs::write(&self.nsswitch_path, lines.join("\n") + "\n")
                .map_err(|e| MongowardError::HostsFile(e.to_string()))?;
            info!(path = %self.nsswitch_path.display(), "name-service switch set to prefer hosts file");
        } else {
            debug!("name-service switch already prefers hosts file");
        }
        Ok(())
    }

    pub fn hosts_path(&self) -> &Path {
        &self.hosts_path
    }
}

/// Whether a `hosts:` line lists `files` before `dns`.
fn hosts_line_prefers_files(line: &str) -> bool {
    let sources: Vec<&str> = line
        .trim_start()
        .trim_start_matches("hosts:")
        .split_whitespace()
        .collect();
    match (
        sources.iter().position(|s| *s == "files"),
        sources.iter().position(|s| *s == "dns"),
    ) {
        (Some(files), Some(dns)) => files < dns,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &tempfile::TempDir) -> HostsFileManager {
        HostsFileManager::new(dir.path().join("hosts"), dir.path().join("nsswitch.conf"))
    }

    fn identity() -> NodeIdentity {
        NodeIdentity::new("10.0.0.1".to_string(), false)
    }

    #[test]
    fn test_entry_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = manager(&dir);

        assert!(hosts
            .ensure_entry("10.0.0.2", "mongo-10-0-0-2.mongo-cluster")
            .unwrap());
        assert!(!hosts
            .ensure_entry("10.0.0.2", "mongo-10-0-0-2.mongo-cluster")
            .unwrap());

        let content = std::fs::read_to_string(hosts.hosts_path()).unwrap();
        assert_eq!(
            content
                .lines()
                .filter(|l| l.contains("mongo-10-0-0-2"))
                .count(),
            1
        );
    }

    #[test]
    fn test_existing_lines_never_edited() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = manager(&dir);
        std::fs::write(
            hosts.hosts_path(),
            "127.0.0.1 localhost\n10.0.0.9 mongo-10-0-0-9.mongo-cluster\n",
        )
        .unwrap();

        // Present under a different address: no rewrite, no duplicate.
        assert!(!hosts
            .ensure_entry("10.9.9.9", "mongo-10-0-0-9.mongo-cluster")
            .unwrap());
        let content = std::fs::read_to_string(hosts.hosts_path()).unwrap();
        assert!(content.contains("10.0.0.9 mongo-10-0-0-9.mongo-cluster"));
        assert!(!content.contains("10.9.9.9"));
    }

    #[test]
    fn test_self_maps_to_loopback_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = manager(&dir);
        let identity = identity();

        hosts.ensure_self_entry(&identity).unwrap();
        hosts
            .ensure_peer_entries(
                &identity,
                &["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            )
            .unwrap();

        let content = std::fs::read_to_string(hosts.hosts_path()).unwrap();
        let loopback_lines: Vec<&str> = content
            .lines()
            .filter(|l| l.starts_with("127.0.0.1"))
            .collect();
        assert_eq!(loopback_lines, vec!["127.0.0.1 mongo-10-0-0-1.mongo-cluster"]);
        assert!(content.contains("10.0.0.2 mongo-10-0-0-2.mongo-cluster"));
    }

    #[test]
    fn test_local_testing_self_entry_uses_private_address() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = manager(&dir);
        let identity = NodeIdentity::new("192.168.1.20".to_string(), true);

        hosts.ensure_self_entry(&identity).unwrap();
        let content = std::fs::read_to_string(hosts.hosts_path()).unwrap();
        assert!(content.contains("192.168.1.20 mongo-192-168-1-20.mongo-cluster"));
        assert!(!content.contains("127.0.0.1"));
    }

    #[test]
    fn test_nsswitch_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = manager(&dir);
        std::fs::write(
            dir.path().join("nsswitch.conf"),
            "passwd: files\nhosts: dns files\n",
        )
        .unwrap();

        hosts.prefer_hosts_lookup().unwrap();
        let content = std::fs::read_to_string(dir.path().join("nsswitch.conf")).unwrap();
        assert!(content.contains("hosts: files dns"));
        assert!(content.contains("passwd: files"));
    }

    #[test]
    fn test_nsswitch_untouched_when_correct() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = manager(&dir);
        let original = "hosts:      files dns\n";
        std::fs::write(dir.path().join("nsswitch.conf"), original).unwrap();

        hosts.prefer_hosts_lookup().unwrap();
        let content = std::fs::read_to_string(dir.path().join("nsswitch.conf")).unwrap();
        assert_eq!(content, original);
    }

    #[test]
    fn test_hosts_line_prefers_files() {
        assert!(hosts_line_prefers_files("hosts: files dns"));
        assert!(hosts_line_prefers_files("hosts: files"));
        assert!(!hosts_line_prefers_files("hosts: dns files"));
        assert!(!hosts_line_prefers_files("hosts: dns"));
    }
}
