//! Main entry point for the mongoward sidecar controller.
//!
//! Startup order matters: identity and hosts entries first, then the admin
//! server (the founder election needs our own /health reachable), then the
//! one-shot bootstrap, and only then the reconciler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use mongoward_common::keyfile;
use mongoward_core::{
    BootstrapCoordinator, BootstrapSettings, HostsFileManager, IdentityResolver, IdentitySettings,
    PeerClient, Reconciler, ReconcilerSettings, RegistryClient,
};
use mongoward_engine::{EngineAdapter, EngineSettings};
use mongoward_server::{
    model::{self, common::AppState},
    startup,
};

const ENGINE_WAIT_ATTEMPTS: u32 = 150;
const ENGINE_WAIT_DELAY: Duration = Duration::from_secs(2);

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configuration = model::common::Configuration::new();

    let logging_config = startup::LoggingConfig::from_env();
    let _logging_guard = startup::init_logging(&logging_config)?;

    write_keyfile_material(&configuration);

    let registry = Arc::new(RegistryClient::new(
        configuration.registry_url(),
        configuration.app_name(),
    )?);

    let resolver = IdentityResolver::new(IdentitySettings {
        local_testing: configuration.is_local_testing(),
        override_address: configuration.node_public_ip(),
    })?;

    // Identity failure is unrecoverable: a node that cannot name itself
    // cannot safely join or found a replica set.
    let identity = match resolver.resolve(&registry).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("identity resolution failed: {}", err);
            std::process::exit(1);
        }
    };
    info!(
        address = %identity.address,
        hostname = %identity.hostname,
        local_testing = identity.local_testing,
        "node identity resolved"
    );

    let hosts = Arc::new(HostsFileManager::system());
    hosts.ensure_self_entry(&identity)?;
    if let Err(err) = hosts.prefer_hosts_lookup() {
        warn!("could not rewrite name-service switch: {}", err);
    }

    let engine = Arc::new(EngineAdapter::new(EngineSettings {
        host: "localhost".to_string(),
        port: configuration.engine_port(),
        replica_set_name: configuration.replica_set_name(),
        username: configuration.root_username(),
        password: configuration.root_password(),
    }));
    wait_for_engine(&engine).await?;

    let peers = Arc::new(PeerClient::new(
        configuration.external_api_port(),
        configuration.api_port(),
    )?);

    let reconciler = Arc::new(Reconciler::new(
        identity.clone(),
        engine.clone(),
        registry.clone(),
        hosts.clone(),
        peers.clone(),
        ReconcilerSettings {
            interval: configuration.reconcile_interval(),
            data_dir: configuration.data_dir().into(),
            ..ReconcilerSettings::default()
        },
    ));

    let app_state = Arc::new(AppState {
        configuration: configuration.clone(),
        identity: identity.clone(),
        engine: engine.clone(),
        reconciler: reconciler.clone(),
        started_at: chrono::Utc::now(),
    });

    let shutdown_signal = startup::wait_for_shutdown_signal().await;

    // The admin server must be listening before bootstrap: the founder
    // election checks self-reachability through it.
    let server = startup::admin_server(app_state, configuration.api_port())?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let bootstrap = BootstrapCoordinator::new(
        identity,
        engine.clone(),
        registry,
        hosts,
        peers,
        BootstrapSettings {
            root_username: configuration.root_username(),
            root_password: configuration.root_password(),
            ..BootstrapSettings::default()
        },
    );

    // Bootstrap can wait minutes for a founder; let a termination signal cut
    // it short instead of holding the container open.
    let mut bootstrap_shutdown = shutdown_signal.subscribe();
    tokio::select! {
        result = bootstrap.run() => result?,
        _ = bootstrap_shutdown.recv() => {
            info!("shutdown during bootstrap");
            server_handle.stop(true).await;
            engine.close().await;
            return Ok(());
        }
    }
    info!("bootstrap complete, starting reconciler");

    let reconciler_task = tokio::spawn(reconciler.run(shutdown_signal.subscribe()));

    let mut shutdown_rx = shutdown_signal.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("shutting down");
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => info!("admin server stopped"),
                Ok(Err(err)) => error!("admin server error: {}", err),
                Err(err) => error!("admin server task failed: {}", err),
            }
            shutdown_signal.shutdown();
        }
    }

    server_handle.stop(true).await;
    let _ = reconciler_task.await;
    engine.close().await;

    info!("mongoward shutdown complete");
    Ok(())
}

/// Write the intra-cluster auth keyfile when material is configured. The
/// boot wrapper points the engine at the same path; failure here is only
/// fatal to nodes that have not been provisioned another way.
fn write_keyfile_material(configuration: &model::common::Configuration) {
    let content = match (
        configuration.keyfile_content(),
        configuration.keyfile_passphrase(),
    ) {
        (Some(content), _) => Some(content),
        (None, Some(passphrase)) => {
            match keyfile::derive_content(&passphrase, configuration.keyfile_salt().as_deref()) {
                Ok(content) => Some(content),
                Err(err) => {
                    warn!("keyfile derivation failed: {}", err);
                    None
                }
            }
        }
        (None, None) => None,
    };

    if let Some(content) = content {
        let path = configuration.keyfile_path();
        match keyfile::write_keyfile(Path::new(&path), &content) {
            Ok(()) => info!(path = %path, "keyfile material written"),
            Err(err) => warn!(path = %path, "could not write keyfile: {}", err),
        }
    }
}

/// Block until the co-located engine answers pings. The engine and the
/// controller are scheduled independently; give the engine time to come up
/// before declaring the node broken.
async fn wait_for_engine(engine: &EngineAdapter) -> Result<(), Box<dyn std::error::Error>> {
    for attempt in 1..=ENGINE_WAIT_ATTEMPTS {
        match engine.ping().await {
            Ok(()) => {
                info!("engine is reachable");
                return Ok(());
            }
            Err(err) => {
                if attempt % 10 == 0 {
                    warn!(attempt, "engine not reachable yet: {}", err);
                }
                tokio::time::sleep(ENGINE_WAIT_DELAY).await;
            }
        }
    }
    Err("engine never became reachable".into())
}
