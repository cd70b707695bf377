use std::sync::Arc;

use tracing::{info, warn};

use crate::agents::CliAgentConnector;
use crate::api;
use crate::cli::commands::ServeArgs;
use crate::cli::{escalation_channel, load_settings};
use crate::db::Database;
use crate::discovery::ProcessDiscovery;
use crate::errors::OrchestraError;
use crate::health::AgentHealthMonitor;
use crate::notifications::{BroadcastHub, ProgressTracker};
use crate::pipeline::{Collaborators, Orchestrator};

pub async fn handle_serve(args: ServeArgs, config: Option<&str>) -> Result<(), OrchestraError> {
    let mut settings = load_settings(config).await?;
    if let Some(port) = args.port {
        settings.server_port = port;
    }
    if let Some(host) = args.host {
        settings.server_host = host;
    }
    if let Some(db) = args.db {
        settings.database_path = db.into();
    }

    let db_path = settings.database_path.to_string_lossy().to_string();
    let store = Arc::new(Database::new(&db_path)?);
    let hub = BroadcastHub::default();
    let discovery = (!args.no_discovery)
        .then(|| Arc::new(ProcessDiscovery::with_default_inspector(settings.discovery.clone())));

    let orchestrator = Arc::new(Orchestrator::new(
        &settings,
        Collaborators {
            store,
            connector: Arc::new(CliAgentConnector::new(settings.connector.clone())),
            notifier: Arc::new(hub.clone()),
            escalation: escalation_channel(&settings),
            progress: Arc::new(ProgressTracker::with_hub(hub)),
            discovery,
        },
    ));

    match orchestrator.restore().await {
        Ok((tasks, agents)) => info!(tasks, agents, db = %db_path, "Resumed from database"),
        Err(e) => warn!(error = %e, "Could not restore previous state"),
    }

    let dispatcher = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_dispatcher().await })
    };
    let health = {
        let monitor = AgentHealthMonitor::new(orchestrator.directory().clone(), settings.health.clone())
            .with_store(orchestrator.store().clone());
        let cancel = orchestrator.cancel_token();
        tokio::spawn(async move { monitor.run(cancel).await })
    };
    let sync = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_discovery_sync().await })
    };

    let app = api::build_router(api::AppState::new(orchestrator.clone()));
    let addr = format!("{}:{}", settings.server_host, settings.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Listening");

    let shutdown = {
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for shutdown signal");
                return;
            }
            orchestrator.shutdown();
        }
    };
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| OrchestraError::Unexpected(format!("Server error: {}", e)));

    orchestrator.shutdown();
    for handle in [dispatcher, health, sync] {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background loop ended abnormally");
        }
    }
    served
}
