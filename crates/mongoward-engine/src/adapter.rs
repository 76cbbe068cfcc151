//! Engine adapter
//!
//! Owns the connection to the co-located engine process and exposes the
//! admin commands the controller needs. Connection mode (authenticated or
//! not) is an internal concern: the adapter starts authenticated when
//! credentials are configured, falls back to the engine's localhost
//! exception before the first user exists, and upgrades transparently after
//! the root user is created.

use std::time::Duration;

use mongodb::{
    bson::{doc, Bson, Document},
    options::{ClientOptions, Credential, ServerAddress},
    Client,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::model::{EngineState, OplogTimestamp, ReplicaSetConfig, ReplicaSetStatus};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SELECTION_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const APP_NAME: &str = "mongoward";

/// Connection settings for the local engine.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Host the engine listens on, `localhost` for the co-located process.
    pub host: String,
    pub port: u16,
    pub replica_set_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl EngineSettings {
    fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Outcome of a remote engine probe during discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    /// The peer affirmatively reported a replica set.
    Initialized,
    /// The peer answered and has no replica set.
    NotInitialized,
    /// Unreachable or could not authenticate; not evidence either way.
    Inconclusive,
}

/// Adapter over the local engine's admin command interface.
pub struct EngineAdapter {
    settings: EngineSettings,
    client: RwLock<Option<Client>>,
    authenticated: RwLock<bool>,
}

impl EngineAdapter {
    pub fn new(settings: EngineSettings) -> Self {
        EngineAdapter {
            settings,
            client: RwLock::new(None),
            authenticated: RwLock::new(false),
        }
    }

    pub fn replica_set_name(&self) -> &str {
        &self.settings.replica_set_name
    }

    pub fn port(&self) -> u16 {
        self.settings.port
    }

    pub async fn is_authenticated(&self) -> bool {
        *self.authenticated.read().await
    }

    fn build_client(&self, authenticated: bool) -> Result<Client, EngineError> {
        let credential = if authenticated {
            Some(
                Credential::builder()
                    .username(self.settings.username.clone())
                    .password(self.settings.password.clone())
                    .source("admin".to_string())
                    .build(),
            )
        } else {
            None
        };

        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: self.settings.host.clone(),
                port: Some(self.settings.port),
            }])
            .app_name(APP_NAME.to_string())
            .direct_connection(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .server_selection_timeout(SELECTION_TIMEOUT)
            .credential(credential)
            .build();

        Client::with_options(options).map_err(EngineError::from)
    }

    /// Open the connection to the local engine. Tries authenticated first
    /// when credentials are configured; on authentication failure retries
    /// unauthenticated, which succeeds under the localhost exception until
    /// the first user is created. Records which mode won.
    pub async fn connect(&self) -> Result<(), EngineError> {
        if self.settings.has_credentials() {
            let client = self.build_client(true)?;
            match ping(&client).await {
                Ok(()) => {
                    info!("engine connection established (authenticated)");
                    *self.client.write().await = Some(client);
                    *self.authenticated.write().await = true;
                    return Ok(());
                }
                Err(EngineError::AuthRequired(message)) => {
                    debug!(
                        "authenticated connect rejected ({}), retrying unauthenticated",
                        message
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let client = self.build_client(false)?;
        ping(&client).await?;
        info!("engine connection established (unauthenticated)");
        *self.client.write().await = Some(client);
        *self.authenticated.write().await = false;
        Ok(())
    }

    /// Drop and reopen the connection in the current mode.
    pub async fn reconnect(&self) -> Result<(), EngineError> {
        let authenticated = *self.authenticated.read().await;
        let client = self.build_client(authenticated)?;
        ping(&client).await?;
        *self.client.write().await = Some(client);
        Ok(())
    }

    /// Upgrade to an authenticated connection if not already on one.
    pub async fn ensure_authenticated(&self) -> Result<(), EngineError> {
        if *self.authenticated.read().await {
            return Ok(());
        }
        if !self.settings.has_credentials() {
            return Err(EngineError::AuthRequired(
                "no credentials configured".to_string(),
            ));
        }
        let client = self.build_client(true)?;
        ping(&client).await?;
        info!("engine connection upgraded to authenticated");
        *self.client.write().await = Some(client);
        *self.authenticated.write().await = true;
        Ok(())
    }

    /// Drop the connection without replacing it.
    pub async fn close(&self) {
        *self.client.write().await = None;
    }

    async fn current_client(&self) -> Result<Client, EngineError> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }
        self.connect().await?;
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| EngineError::Unreachable("connection not established".to_string()))
    }

    async fn run_admin(&self, command: Document) -> Result<Document, EngineError> {
        let client = self.current_client().await?;
        client
            .database("admin")
            .run_command(command)
            .await
            .map_err(EngineError::from)
    }

    /// Liveness probe against the local engine.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.run_admin(doc! { "ping": 1 }).await.map(|_| ())
    }

    /// Observe the engine's replica-set state.
    pub async fn status(&self) -> Result<EngineState, EngineError> {
        match self.run_admin(doc! { "replSetGetStatus": 1 }).await {
            Ok(response) => Ok(EngineState::Initialized(ReplicaSetStatus::from_document(
                &response,
            )?)),
            Err(EngineError::NotInitialized) => Ok(EngineState::NotInitialized),
            Err(EngineError::AuthRequired(_)) => Ok(EngineState::NeedsAuth),
            Err(err) => Err(err),
        }
    }

    /// Whether the engine currently reports itself writable primary. On a
    /// connection error, one reconnect is attempted before answering false.
    pub async fn is_primary(&self) -> bool {
        match self.hello_is_primary().await {
            Ok(primary) => primary,
            Err(EngineError::Unreachable(message)) => {
                warn!("hello probe failed ({}), reconnecting once", message);
                if self.reconnect().await.is_err() {
                    return false;
                }
                self.hello_is_primary().await.unwrap_or(false)
            }
            Err(_) => false,
        }
    }

    async fn hello_is_primary(&self) -> Result<bool, EngineError> {
        let response = self.run_admin(doc! { "hello": 1 }).await?;
        Ok(response
            .get_bool("isWritablePrimary")
            .or_else(|_| response.get_bool("ismaster"))
            .unwrap_or(false))
    }

    /// Initialize the replica set with this node as sole member. Idempotent
    /// when the set already exists.
    pub async fn initiate(&self, hostname: &str) -> Result<(), EngineError> {
        let host = format!("{}:{}", hostname, self.settings.port);
        let config = ReplicaSetConfig::single_member(&self.settings.replica_set_name, &host);
        match self
            .run_admin(doc! { "replSetInitiate": config.into_document() })
            .await
        {
            Ok(_) => {
                info!(host = %host, "replica set initiated");
                Ok(())
            }
            Err(EngineError::AlreadyInitialized) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Read the full replica-set configuration.
    pub async fn get_config(&self) -> Result<ReplicaSetConfig, EngineError> {
        let response = self.run_admin(doc! { "replSetGetConfig": 1 }).await?;
        let config = response
            .get_document("config")
            .map_err(|_| EngineError::Malformed("replSetGetConfig missing 'config'".to_string()))?;
        ReplicaSetConfig::from_document(config.clone())
    }

    /// Submit a replica-set configuration. The caller is responsible for
    /// having bumped the version.
    pub async fn reconfigure(
        &self,
        config: ReplicaSetConfig,
        force: bool,
    ) -> Result<(), EngineError> {
        self.run_admin(doc! {
            "replSetReconfig": config.into_document(),
            "force": force,
        })
        .await
        .map(|_| ())
    }

    /// Create the initial administrative user, then reconnect authenticated.
    pub async fn create_root_user(&self, name: &str, password: &str) -> Result<(), EngineError> {
        self.run_admin(doc! {
            "createUser": name,
            "pwd": password,
            "roles": [ { "role": "root", "db": "admin" } ],
        })
        .await?;
        info!(user = %name, "root user created");
        self.ensure_authenticated().await
    }

    /// Ask the engine to relinquish primary for `seconds`. Not being primary
    /// counts as success, and so does the connection drop the engine performs
    /// as part of stepping down.
    pub async fn step_down(&self, seconds: u32) -> Result<(), EngineError> {
        match self
            .run_admin(doc! { "replSetStepDown": seconds as i64 })
            .await
        {
            Ok(_) | Err(EngineError::NotPrimary) => Ok(()),
            Err(EngineError::Unreachable(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Timestamp of the most recent oplog entry, if the oplog exists.
    pub async fn latest_oplog(&self) -> Result<Option<OplogTimestamp>, EngineError> {
        let client = self.current_client().await?;
        let entry = client
            .database("local")
            .collection::<Document>("oplog.rs")
            .find_one(doc! {})
            .sort(doc! { "$natural": -1 })
            .await
            .map_err(EngineError::from)?;

        Ok(entry.and_then(|doc| match doc.get("ts") {
            Some(Bson::Timestamp(ts)) => Some(OplogTimestamp::from(*ts)),
            _ => None,
        }))
    }

    /// Terminate the engine process via its shutdown command. The engine
    /// drops the connection instead of replying, so unreachable is success.
    pub async fn shutdown_engine(&self) -> Result<(), EngineError> {
        match self.run_admin(doc! { "shutdown": 1, "force": true }).await {
            Ok(_) | Err(EngineError::Unreachable(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Probe a peer's engine over its derived hostname during discovery.
    /// Only an affirmative status report counts as an initialized set; an
    /// authentication rejection is inconclusive because a keyfile-enforcing
    /// engine rejects remote clients before and after initialization alike.
    pub async fn probe(&self, hostname: &str) -> ProbeResult {
        let credential = if self.settings.has_credentials() {
            Some(
                Credential::builder()
                    .username(self.settings.username.clone())
                    .password(self.settings.password.clone())
                    .source("admin".to_string())
                    .build(),
            )
        } else {
            None
        };

        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: hostname.to_string(),
                port: Some(self.settings.port),
            }])
            .app_name(APP_NAME.to_string())
            .direct_connection(true)
            .connect_timeout(PROBE_TIMEOUT)
            .server_selection_timeout(PROBE_TIMEOUT)
            .credential(credential)
            .build();

        let client = match Client::with_options(options) {
            Ok(client) => client,
            Err(_) => return ProbeResult::Inconclusive,
        };

        let result = client
            .database("admin")
            .run_command(doc! { "replSetGetStatus": 1 })
            .await;
        // Shut the monitoring tasks down before dropping the client.
        let outcome = match result {
            Ok(_) => ProbeResult::Initialized,
            Err(err) => match EngineError::from(err) {
                EngineError::NotInitialized => ProbeResult::NotInitialized,
                _ => ProbeResult::Inconclusive,
            },
        };
        client.shutdown().await;
        outcome
    }
}

async fn ping(client: &Client) -> Result<(), EngineError> {
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map(|_| ())
        .map_err(EngineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EngineSettings {
        EngineSettings {
            host: "localhost".to_string(),
            port: 27017,
            replica_set_name: "rs0".to_string(),
            username: Some("root".to_string()),
            password: Some("secret".to_string()),
        }
    }

    #[test]
    fn test_has_credentials() {
        assert!(settings().has_credentials());

        let mut anonymous = settings();
        anonymous.password = None;
        assert!(!anonymous.has_credentials());
    }

    #[tokio::test]
    async fn test_adapter_starts_unauthenticated() {
        let adapter = EngineAdapter::new(settings());
        assert!(!adapter.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_ensure_authenticated_requires_credentials() {
        let mut anonymous = settings();
        anonymous.username = None;
        anonymous.password = None;
        let adapter = EngineAdapter::new(anonymous);
        assert!(matches!(
            adapter.ensure_authenticated().await,
            Err(EngineError::AuthRequired(_))
        ));
    }
}
