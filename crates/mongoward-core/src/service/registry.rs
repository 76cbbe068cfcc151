//! Registry client
//!
//! Fetches the authoritative list of cluster member addresses from the
//! external registry. Failures are transient by design: callers keep their
//! last known state when a fetch comes back empty-handed.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use mongoward_common::{sort_addresses, MongowardError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RegistryResponse {
    status: String,
    #[serde(default)]
    data: Vec<RegistryEntry>,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    ip: String,
}

/// Client for the cluster-location registry.
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    app_name: String,
}

impl RegistryClient {
    pub fn new(base_url: String, app_name: String) -> Result<Self, MongowardError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .map_err(|e| MongowardError::Registry(e.to_string()))?;

        Ok(RegistryClient {
            client,
            base_url,
            app_name,
        })
    }

    fn location_url(&self) -> String {
        format!(
            "{}/apps/location/{}",
            self.base_url.trim_end_matches('/'),
            self.app_name
        )
    }

    /// Fetch the current member addresses: deduplicated and sorted into the
    /// total order the founder election depends on.
    pub async fn fetch_members(&self) -> Result<Vec<String>, MongowardError> {
        let url = self.location_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MongowardError::Registry(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MongowardError::Registry(format!(
                "registry returned status {}",
                response.status()
            )));
        }

        let body: RegistryResponse = response
            .json()
            .await
            .map_err(|e| MongowardError::Registry(e.to_string()))?;

        if body.status != "success" {
            return Err(MongowardError::Registry(format!(
                "registry responded with status '{}'",
                body.status
            )));
        }

        let addresses = parse_addresses(body.data);
        debug!(count = addresses.len(), url = %url, "registry members fetched");
        Ok(addresses)
    }
}

/// Strip optional ports, drop empties, deduplicate, and sort.
fn parse_addresses(entries: Vec<RegistryEntry>) -> Vec<String> {
    let addresses = entries
        .into_iter()
        .filter_map(|entry| {
            let ip = entry.ip.split(':').next().unwrap_or_default().trim();
            if ip.is_empty() {
                None
            } else {
                Some(ip.to_string())
            }
        })
        .collect();
    sort_addresses(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(ips: &[&str]) -> Vec<RegistryEntry> {
        ips.iter()
            .map(|ip| RegistryEntry { ip: ip.to_string() })
            .collect()
    }

    #[test]
    fn test_parse_addresses_strips_ports() {
        let parsed = parse_addresses(entries(&["10.0.0.2:16127", "10.0.0.1"]));
        assert_eq!(parsed, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_parse_addresses_dedupes() {
        let parsed = parse_addresses(entries(&["10.0.0.1:16127", "10.0.0.1", "10.0.0.1:16137"]));
        assert_eq!(parsed, vec!["10.0.0.1"]);
    }

    #[test]
    fn test_parse_addresses_drops_empty() {
        let parsed = parse_addresses(entries(&["", "10.0.0.3"]));
        assert_eq!(parsed, vec!["10.0.0.3"]);
    }

    #[test]
    fn test_envelope_deserialization() {
        let body: RegistryResponse = serde_json::from_str(
            r#"{"status":"success","data":[{"ip":"10.0.0.1:16127"},{"ip":"10.0.0.2"}]}"#,
        )
        .unwrap();
        assert_eq!(body.status, "success");
        assert_eq!(parse_addresses(body.data), vec!["10.0.0.1", "10.0.0.2"]);
    }
}
