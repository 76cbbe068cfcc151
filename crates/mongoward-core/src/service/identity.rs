//! Identity resolver
//!
//! Determines this node's externally routable address at startup. The
//! address is then fixed for the life of the process; only the derived
//! hostname circulates in engine configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{info, warn};

use mongoward_common::{is_local_address, local_ip, MongowardError};

use crate::model::NodeIdentity;
use crate::service::registry::RegistryClient;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Public endpoints that echo the caller's address, tried in order.
const PUBLIC_IP_PROBES: [&str; 2] = ["https://api.ipify.org", "https://ifconfig.me/ip"];

/// Identity resolution settings.
#[derive(Clone, Debug, Default)]
pub struct IdentitySettings {
    /// Local-testing mode: skip public probes and use a private interface.
    pub local_testing: bool,
    /// Operator override, used verbatim when set.
    pub override_address: Option<String>,
}

pub struct IdentityResolver {
    settings: IdentitySettings,
    client: reqwest::Client,
}

impl IdentityResolver {
    pub fn new(settings: IdentitySettings) -> Result<Self, MongowardError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| MongowardError::Identity(e.to_string()))?;
        Ok(IdentityResolver { settings, client })
    }

    /// Resolve this node's identity. Priority: local-testing interface,
    /// operator override, public probes, registry fallback. A node that
    /// cannot determine its own address cannot safely participate, so the
    /// last resort is fatal.
    pub async fn resolve(&self, registry: &RegistryClient) -> Result<NodeIdentity, MongowardError> {
        if self.settings.local_testing {
            let address = local_ip();
            info!(address = %address, "identity resolved from local interface (local testing)");
            return Ok(NodeIdentity::new(address, true));
        }

        if let Some(address) = &self.settings.override_address {
            info!(address = %address, "identity resolved from operator override");
            return Ok(NodeIdentity::new(address.clone(), false));
        }

        for url in PUBLIC_IP_PROBES {
            match self.probe(url).await {
                Ok(address) => {
                    info!(address = %address, probe = url, "identity resolved from public probe");
                    return Ok(NodeIdentity::new(address, false));
                }
                Err(err) => warn!(probe = url, "public ip probe failed: {}", err),
            }
        }

        self.resolve_from_registry(registry).await
    }

    async fn probe(&self, url: &str) -> Result<String, MongowardError> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MongowardError::Identity(e.to_string()))?
            .text()
            .await
            .map_err(|e| MongowardError::Identity(e.to_string()))?;

        let candidate = body.trim();
        candidate
            .parse::<Ipv4Addr>()
            .map(|_| candidate.to_string())
            .map_err(|_| MongowardError::Identity(format!("probe returned '{}'", candidate)))
    }

    /// Last resort: a single-member registry names us unambiguously; with
    /// multiple members we accept only an address carried by a local
    /// interface. Anything else is unresolvable.
    async fn resolve_from_registry(
        &self,
        registry: &RegistryClient,
    ) -> Result<NodeIdentity, MongowardError> {
        let members = registry.fetch_members().await?;

        match members.as_slice() {
            [] => Err(MongowardError::Identity(
                "registry returned no members".to_string(),
            )),
            [only] => {
                info!(address = %only, "identity resolved from single-member registry");
                Ok(NodeIdentity::new(only.clone(), false))
            }
            many => match many.iter().find(|address| is_local_address(address)) {
                Some(address) => {
                    info!(address = %address, "identity resolved from registry via local interface match");
                    Ok(NodeIdentity::new(address.clone(), false))
                }
                None => Err(MongowardError::Identity(format!(
                    "registry lists {} members and none matches a local interface",
                    many.len()
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_testing_short_circuits() {
        let resolver = IdentityResolver::new(IdentitySettings {
            local_testing: true,
            override_address: Some("203.0.113.9".to_string()),
        })
        .unwrap();
        let registry = RegistryClient::new(
            "http://registry.invalid".to_string(),
            "mongo-cluster".to_string(),
        )
        .unwrap();

        // Local-testing wins over the override and never touches the network.
        let identity = resolver.resolve(&registry).await.unwrap();
        assert!(identity.local_testing);
        assert_ne!(identity.address, "203.0.113.9");
    }

    #[tokio::test]
    async fn test_override_used_verbatim() {
        let resolver = IdentityResolver::new(IdentitySettings {
            local_testing: false,
            override_address: Some("203.0.113.9".to_string()),
        })
        .unwrap();
        let registry = RegistryClient::new(
            "http://registry.invalid".to_string(),
            "mongo-cluster".to_string(),
        )
        .unwrap();

        let identity = resolver.resolve(&registry).await.unwrap();
        assert_eq!(identity.address, "203.0.113.9");
        assert_eq!(identity.hostname, "mongo-203-0-113-9.mongo-cluster");
        assert!(!identity.local_testing);
    }
}
