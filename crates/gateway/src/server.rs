//! Host shell: store construction, router assembly, listener bind with
//! port scan, background tasks, and graceful shutdown.

use std::{net::Ipv4Addr, sync::Arc, time::Instant};

use {
    axum::{
        Json, Router,
        extract::State,
        routing::{any, get, post, put},
    },
    tokio::{net::TcpListener, sync::mpsc},
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use {
    mcphost_config::HostConfig,
    mcphost_events::EventBus,
    mcphost_store::{
        ExpiredSession, PermissionStore, ProfileStore, SecretStore, ServerStore, SessionStore,
        WorkspaceStore,
    },
    mcphost_supervisor::{PortAllocator, ProcessSupervisor},
};

use crate::{api, proxy, state::HostState, ws};

/// Construct every store and subsystem from the config. Stores load
/// eagerly so a corrupt data directory fails startup instead of the first
/// request.
pub fn build_state(config: HostConfig) -> anyhow::Result<Arc<HostState>> {
    std::fs::create_dir_all(&config.data_dir)?;

    let servers = Arc::new(ServerStore::open(&config.store_path("servers"))?);
    let workspaces = Arc::new(WorkspaceStore::open(&config.store_path("workspaces"))?);
    let secrets = Arc::new(SecretStore::open(&config.store_path("secrets"))?);
    let permissions = Arc::new(PermissionStore::open(&config.store_path("permissions"))?);
    let profile = Arc::new(ProfileStore::open(&config.store_path("user-profile"))?);
    let sessions = Arc::new(SessionStore::new(config.sessions.clone()));
    let events = EventBus::new();
    let ports = Arc::new(PortAllocator::new(config.ports, config.port_release_grace));

    let supervisor = ProcessSupervisor::new(
        config.supervisor.clone(),
        config.data_dir.clone(),
        ports,
        Arc::clone(&servers),
        Arc::clone(&workspaces),
        Arc::clone(&secrets),
        Arc::clone(&permissions),
        Arc::clone(&profile),
        events.clone(),
    );

    Ok(Arc::new(HostState {
        config,
        servers,
        workspaces,
        secrets,
        permissions,
        profile,
        sessions,
        supervisor,
        events,
        http: reqwest::Client::new(),
        started_at: Instant::now(),
    }))
}

/// Assemble the full router. Exposed for integration tests.
pub fn build_router(state: Arc<HostState>) -> Router {
    Router::new()
        .route("/health", get(host_health))
        .route("/events", get(ws::events_handler))
        // Server catalog
        .route(
            "/api/servers",
            get(api::servers::list).post(api::servers::create),
        )
        .route(
            "/api/servers/{id}",
            axum::routing::patch(api::servers::update).delete(api::servers::delete),
        )
        .route("/api/servers/{id}/update", post(api::servers::install_update))
        .route(
            "/api/servers/{id}/check-update",
            get(api::servers::check_update),
        )
        // Permission profiles
        .route(
            "/api/servers/{id}/permissions",
            get(api::permissions::get_profile)
                .put(api::permissions::put_profile)
                .delete(api::permissions::delete_profile),
        )
        .route(
            "/api/servers/{id}/permissions/{ws_id}",
            get(api::permissions::get_override)
                .put(api::permissions::put_override)
                .delete(api::permissions::delete_override),
        )
        // Workspaces
        .route(
            "/api/workspaces",
            get(api::workspaces::list).post(api::workspaces::create),
        )
        .route(
            "/api/workspaces/{id}",
            axum::routing::patch(api::workspaces::update).delete(api::workspaces::delete),
        )
        .route("/api/workspaces/{id}/reset", post(api::workspaces::reset))
        .route(
            "/api/workspaces/{ws_id}/servers",
            get(api::workspaces::server_map),
        )
        .route(
            "/api/workspaces/{ws_id}/servers/{id}",
            put(api::workspaces::put_server_config),
        )
        .route(
            "/api/workspaces/{ws_id}/servers/{id}/config",
            get(api::workspaces::get_config_override).put(api::workspaces::put_config_override),
        )
        // Instances
        .route("/api/instances", get(api::instances::list))
        .route("/api/instances/start", post(api::instances::start))
        .route("/api/instances/stop", post(api::instances::stop))
        .route("/api/instances/restart", post(api::instances::restart))
        .route(
            "/api/instances/restart-all",
            post(api::instances::restart_all),
        )
        .route(
            "/api/instances/{server_id}/{workspace_id}/health",
            get(api::instances::health),
        )
        .route(
            "/api/instances/{server_id}/{workspace_id}/metadata",
            get(api::instances::metadata),
        )
        .route(
            "/api/instances/{server_id}/{workspace_id}/logs",
            get(api::instances::logs),
        )
        // Secrets
        .route(
            "/api/secrets",
            get(api::secrets::list)
                .put(api::secrets::set)
                .delete(api::secrets::delete),
        )
        // Local identity
        .route("/api/auth/profile", get(api::auth::get_profile))
        .route("/api/auth/login", post(api::auth::login))
        .route("/api/auth/logout", post(api::auth::logout))
        // MCP reverse proxy
        .route("/mcp/{server_id}", any(proxy::root))
        .route("/mcp/{server_id}/{*rest}", any(proxy::with_path))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn host_health(State(state): State<Arc<HostState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "instances": state.supervisor.list().await.len(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

/// Bind the loopback listener: the preferred port first, then the scan
/// range.
pub async fn bind_listener(config: &HostConfig) -> anyhow::Result<TcpListener> {
    let mut candidates = vec![config.listen_port];
    candidates.extend(
        (config.listen_port..=config.listen_port_max).filter(|p| *p != config.listen_port),
    );
    for port in candidates {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => {
                if port != config.listen_port {
                    warn!(
                        preferred = config.listen_port,
                        port, "preferred port taken, using fallback"
                    );
                }
                return Ok(listener);
            },
            Err(_) => continue,
        }
    }
    anyhow::bail!(
        "no free listen port in {}-{}",
        config.listen_port,
        config.listen_port_max
    )
}

/// Start the host and block until interrupted.
pub async fn start_host(config: HostConfig) -> anyhow::Result<()> {
    let state = build_state(config)?;

    // Session sweep and the auto-cleanup consumer it feeds.
    let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
    state.sessions.set_expiry_channel(expiry_tx).await;
    tokio::spawn(Arc::clone(&state.sessions).run_sweeper());
    tokio::spawn(run_auto_cleanup(Arc::clone(&state), expiry_rx));

    let listener = bind_listener(&state.config).await?;
    let addr = listener.local_addr()?;
    info!(%addr, data_dir = %state.config.data_dir.display(), "host listening");

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, stopping all instances");
    state.supervisor.stop_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Consume expired sessions: when the last session of an auto-cleanup
/// workspace goes idle, stop its instances and delete the workspace.
pub async fn run_auto_cleanup(
    state: Arc<HostState>,
    mut expired: mpsc::UnboundedReceiver<ExpiredSession>,
) {
    while let Some(session) = expired.recv().await {
        let Some(workspace) = state.workspaces.get(&session.workspace_id).await else {
            continue;
        };
        if workspace.is_global() || !workspace.auto_cleanup {
            continue;
        }
        if state.sessions.count_for(&workspace.id).await > 0 {
            continue;
        }
        info!(workspace = %workspace.id, "auto-cleanup: last session expired");
        if let Err(e) = state.remove_workspace(&workspace.id).await {
            warn!(workspace = %workspace.id, error = %e, "auto-cleanup failed");
        }
    }
}
