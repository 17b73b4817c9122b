//! CLI command implementations
//!
//! `serve` wires the engine in dependency order: metrics, store, registry,
//! service, sessions, then the background tasks and the HTTP server. On
//! ctrl-c the shutdown signal stops the server and background tasks, and the
//! registry is drained so parked long-polls resolve.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use crate::http_server::{AppState, HttpServer};
use crate::observability::{Logger, MetricsRegistry, ObservationScope};
use crate::service::SyncService;
use crate::session::{SessionCache, StaticIdentityResolver};
use crate::shutdown;
use crate::store::{DocumentStore, MemoryDocumentStore};
use crate::sync::{BlockDocument, InstanceRegistry};
use crate::watcher::{EntityWatcher, MemoryChangeQueue};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Validate a configuration file and print its effective settings
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let mut summary = serde_json::to_value(&config)?;
    // Credentials never leave the process.
    if let Some(identities) = summary.get_mut("identities").and_then(|v| v.as_array_mut()) {
        for identity in identities {
            identity["token"] = json!("***");
        }
    }
    let response = json!({ "status": "ok", "data": summary });
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

/// Everything `serve` runs, built from configuration
pub struct Components {
    pub config: Config,
    pub metrics: Arc<MetricsRegistry>,
    pub store: Arc<MemoryDocumentStore<BlockDocument>>,
    pub registry: Arc<InstanceRegistry<BlockDocument>>,
    pub service: Arc<SyncService<BlockDocument>>,
    pub sessions: Arc<SessionCache>,
    pub queue: Arc<MemoryChangeQueue>,
    pub watcher: Arc<EntityWatcher<BlockDocument>>,
    pub state: Arc<AppState>,
}

/// Build the engine from configuration
pub fn build_components(config: Config) -> Components {
    let metrics = Arc::new(MetricsRegistry::new());
    let store = Arc::new(MemoryDocumentStore::<BlockDocument>::new());
    let dyn_store: Arc<dyn DocumentStore<BlockDocument>> = store.clone();

    let registry = Arc::new(InstanceRegistry::new(
        config.registry_config(),
        dyn_store.clone(),
        metrics.clone(),
    ));
    let service = Arc::new(SyncService::new(
        config.service_config(),
        registry.clone(),
        dyn_store,
    ));
    let resolver = Arc::new(StaticIdentityResolver::new(&config.identities));
    let sessions = Arc::new(SessionCache::new(
        config.session_config(),
        resolver,
        metrics.clone(),
    ));
    let queue = Arc::new(MemoryChangeQueue::new());
    let watcher = Arc::new(EntityWatcher::new(
        config.watcher_config(),
        registry.clone(),
        queue.clone(),
        metrics.clone(),
    ));
    let state = Arc::new(AppState {
        service: service.clone(),
        sessions: sessions.clone(),
        metrics: metrics.clone(),
    });

    Components {
        config,
        metrics,
        store,
        registry,
        service,
        sessions,
        queue,
        watcher,
        state,
    }
}

/// Start the HTTP server and background tasks; returns after ctrl-c
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.http.port = port;
    }
    Logger::set_min_severity(config.severity()?);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(run_server(build_components(config)))
}

async fn run_server(components: Components) -> CliResult<()> {
    let scope = ObservationScope::new("SERVE");
    if components.config.identities.is_empty() {
        Logger::warn("NO_IDENTITIES_CONFIGURED", &[("effect", "every request is rejected")]);
    }

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let sweeper = components
        .service
        .clone()
        .spawn_sweeper(Some(components.sessions.clone()), shutdown_rx.clone());
    let watcher = components
        .config
        .watcher
        .enabled
        .then(|| components.watcher.clone().spawn(shutdown_rx.clone()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            Logger::info("SHUTDOWN_REQUESTED", &[]);
        }
        let _ = shutdown_tx.send(true);
    });

    let server = HttpServer::new(components.config.http.clone(), components.state.clone());
    let served = server.start(shutdown_rx).await;

    components.service.shutdown();
    components.sessions.clear();
    let _ = sweeper.await;
    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }

    match served {
        Ok(()) => {
            scope.complete();
            Ok(())
        }
        Err(e) => {
            scope.fail(&e.to_string());
            Err(CliError::boot_failed(format!("HTTP server failed: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use uuid::Uuid;

    #[test]
    fn test_check_config_accepts_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"http": {{"port": 9001}}, "log_level": "warn"}}"#).unwrap();

        assert!(check_config(file.path()).is_ok());
    }

    #[test]
    fn test_check_config_rejects_missing_file() {
        let err = check_config(Path::new("/nonexistent/docsync.json")).unwrap_err();
        assert_eq!(err.code_str(), "DOCSYNC_CLI_CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_components_share_one_registry() {
        let config = Config::from_json(&format!(
            r#"{{"identities": [{{"token": "t", "user_id": "{}", "shortname": "a", "display_name": "A"}}]}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        let components = build_components(config);

        assert!(Arc::ptr_eq(components.service.registry(), &components.registry));
        assert!(components.sessions.resolve("t").await.is_ok());
    }
}
