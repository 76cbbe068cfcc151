// Application configuration and shared state
// Configuration reads the deployment environment once at startup; AppState is
// the value threaded through handlers and background tasks.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};

use mongoward_core::{NodeIdentity, Reconciler};
use mongoward_engine::EngineAdapter;

const DEFAULT_APP_NAME: &str = "mongo-cluster";
const DEFAULT_REPLICA_SET_NAME: &str = "rs0";
const DEFAULT_ENGINE_PORT: u16 = 27017;
const DEFAULT_API_PORT: u16 = 3000;
const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 30_000;
const DEFAULT_REGISTRY_URL: &str = "https://api.runonflux.io";
const DEFAULT_DATA_DIR: &str = "/data/db";
const DEFAULT_KEYFILE_PATH: &str = "/data/mongo-keyfile";

#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

#[derive(Debug, Parser)]
#[command(name = "mongoward", about = "Replica-set sidecar controller")]
struct Cli {
    /// Alternate registry URL; also enables local-testing mode
    #[arg(short = 'r', long = "registry")]
    registry: Option<String>,
    /// Force local-testing mode without overriding the registry
    #[arg(short = 'l', long = "local", default_value_t = false)]
    local: bool,
}

impl Configuration {
    pub fn new() -> Self {
        let args = Cli::parse();
        Self::build(args.registry, args.local)
    }

    fn build(registry: Option<String>, local: bool) -> Self {
        let mut builder = Config::builder().add_source(Environment::default());

        if let Some(url) = registry {
            builder = builder
                .set_override("flux_api_override", url)
                .expect("failed to set registry override");
        }
        if local {
            builder = builder
                .set_override("local_testing", true)
                .expect("failed to set local-testing override");
        }

        let config = builder.build().expect("failed to read environment");
        Configuration { config }
    }

    /// Registry query key for this deployment.
    pub fn app_name(&self) -> String {
        self.config
            .get_string("app_name")
            .unwrap_or_else(|_| DEFAULT_APP_NAME.to_string())
    }

    pub fn replica_set_name(&self) -> String {
        self.config
            .get_string("mongo_replica_set_name")
            .unwrap_or_else(|_| DEFAULT_REPLICA_SET_NAME.to_string())
    }

    pub fn engine_port(&self) -> u16 {
        self.config
            .get_int("mongo_port")
            .map(|p| p as u16)
            .unwrap_or(DEFAULT_ENGINE_PORT)
    }

    pub fn root_username(&self) -> Option<String> {
        self.config.get_string("mongo_initdb_root_username").ok()
    }

    pub fn root_password(&self) -> Option<String> {
        self.config.get_string("mongo_initdb_root_password").ok()
    }

    pub fn keyfile_passphrase(&self) -> Option<String> {
        self.config.get_string("mongo_keyfile_passphrase").ok()
    }

    pub fn keyfile_salt(&self) -> Option<String> {
        self.config.get_string("mongo_keyfile_salt").ok()
    }

    pub fn keyfile_content(&self) -> Option<String> {
        self.config.get_string("mongo_keyfile_content").ok()
    }

    pub fn keyfile_path(&self) -> String {
        self.config
            .get_string("mongo_keyfile_path")
            .unwrap_or_else(|_| DEFAULT_KEYFILE_PATH.to_string())
    }

    pub fn reconcile_interval(&self) -> Duration {
        let millis = self
            .config
            .get_int("reconcile_interval")
            .map(|ms| ms.max(1) as u64)
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL_MS);
        Duration::from_millis(millis)
    }

    /// Port the admin server binds locally.
    pub fn api_port(&self) -> u16 {
        self.config
            .get_int("api_port")
            .map(|p| p as u16)
            .unwrap_or(DEFAULT_API_PORT)
    }

    /// Port peers are reachable on; differs from `api_port` behind a port
    /// mapper.
    pub fn external_api_port(&self) -> u16 {
        self.config
            .get_int("external_api_port")
            .map(|p| p as u16)
            .unwrap_or_else(|_| self.api_port())
    }

    pub fn registry_url(&self) -> String {
        self.config
            .get_string("flux_api_override")
            .unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string())
    }

    /// A registry override implies a local test rig.
    pub fn is_local_testing(&self) -> bool {
        self.config.get_string("flux_api_override").is_ok()
            || self.config.get_bool("local_testing").unwrap_or(false)
    }

    pub fn node_public_ip(&self) -> Option<String> {
        self.config.get_string("node_public_ip").ok()
    }

    pub fn data_dir(&self) -> String {
        self.config
            .get_string("mongo_data_dir")
            .unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string())
    }
}

/// Shared application state for handlers and background tasks.
pub struct AppState {
    pub configuration: Configuration,
    pub identity: NodeIdentity,
    pub engine: Arc<EngineAdapter>,
    pub reconciler: Arc<Reconciler>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let configuration = Configuration::build(None, false);
        assert_eq!(configuration.app_name(), "mongo-cluster");
        assert_eq!(configuration.replica_set_name(), "rs0");
        assert_eq!(configuration.engine_port(), 27017);
        assert_eq!(configuration.api_port(), 3000);
        assert_eq!(configuration.external_api_port(), 3000);
        assert_eq!(
            configuration.reconcile_interval(),
            Duration::from_millis(30_000)
        );
        assert_eq!(configuration.registry_url(), DEFAULT_REGISTRY_URL);
        assert_eq!(configuration.data_dir(), "/data/db");
        assert!(!configuration.is_local_testing());
    }

    #[test]
    fn test_registry_override_enables_local_testing() {
        let configuration =
            Configuration::build(Some("http://127.0.0.1:8123".to_string()), false);
        assert_eq!(configuration.registry_url(), "http://127.0.0.1:8123");
        assert!(configuration.is_local_testing());
    }

    #[test]
    fn test_local_flag_without_registry_override() {
        let configuration = Configuration::build(None, true);
        assert_eq!(configuration.registry_url(), DEFAULT_REGISTRY_URL);
        assert!(configuration.is_local_testing());
    }
}
