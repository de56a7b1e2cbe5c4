//! `/api/instances` — lifecycle operations and diagnostics.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State},
    },
    serde::Deserialize,
    serde_json::json,
};

use {
    mcphost_common::Error,
    mcphost_store::GLOBAL_WORKSPACE,
    mcphost_supervisor::{InstanceKey, InstanceStatus, probe},
};

use crate::{
    response::{ApiResult, success},
    state::HostState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceBody {
    pub server_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

impl InstanceBody {
    fn key(&self) -> InstanceKey {
        InstanceKey::new(
            self.server_id.clone(),
            self.workspace_id
                .clone()
                .unwrap_or_else(|| GLOBAL_WORKSPACE.to_string()),
        )
    }
}

pub async fn list(State(state): State<Arc<HostState>>) -> ApiResult {
    let instances = state.supervisor.list().await;
    Ok(success(json!({ "instances": instances })))
}

/// `POST /api/instances/start`.
pub async fn start(
    State(state): State<Arc<HostState>>,
    Json(body): Json<InstanceBody>,
) -> ApiResult {
    let instance = state.supervisor.start(&body.key()).await?;
    Ok(success(json!({ "instance": instance })))
}

/// `POST /api/instances/stop`.
pub async fn stop(
    State(state): State<Arc<HostState>>,
    Json(body): Json<InstanceBody>,
) -> ApiResult {
    state.supervisor.stop(&body.key()).await?;
    Ok(success(json!({})))
}

/// `POST /api/instances/restart`.
pub async fn restart(
    State(state): State<Arc<HostState>>,
    Json(body): Json<InstanceBody>,
) -> ApiResult {
    let instance = state.supervisor.restart(&body.key()).await?;
    Ok(success(json!({ "instance": instance })))
}

/// `POST /api/instances/restart-all` — restart every running instance.
pub async fn restart_all(State(state): State<Arc<HostState>>) -> ApiResult {
    let mut restarted = Vec::new();
    let mut failed = Vec::new();
    for instance in state.supervisor.list().await {
        if instance.status != InstanceStatus::Running {
            continue;
        }
        let key = InstanceKey::new(instance.server_id, instance.workspace_id);
        match state.supervisor.restart(&key).await {
            Ok(_) => restarted.push(json!({
                "serverId": key.server_id,
                "workspaceId": key.workspace_id,
            })),
            Err(e) => failed.push(json!({
                "serverId": key.server_id,
                "workspaceId": key.workspace_id,
                "error": e.to_string(),
                "code": e.code(),
            })),
        }
    }
    Ok(success(json!({ "restarted": restarted, "failed": failed })))
}

/// `GET /api/instances/{serverId}/{workspaceId}/health` — a live probe
/// against the instance, proxied for the UI.
pub async fn health(
    State(state): State<Arc<HostState>>,
    Path((server_id, workspace_id)): Path<(String, String)>,
) -> ApiResult {
    let key = InstanceKey::new(server_id, workspace_id);
    let instance = state
        .supervisor
        .get(&key)
        .await
        .ok_or_else(|| Error::not_found(format!("no instance for {key}")))?;
    let healthy = probe::check_health(
        &state.http,
        instance.port,
        state.config.supervisor.health_timeout,
    )
    .await;
    Ok(success(json!({
        "healthy": healthy,
        "status": instance.status,
        "port": instance.port,
    })))
}

/// `GET /api/instances/{serverId}/{workspaceId}/metadata` — cached.
pub async fn metadata(
    State(state): State<Arc<HostState>>,
    Path((server_id, workspace_id)): Path<(String, String)>,
) -> ApiResult {
    let key = InstanceKey::new(server_id, workspace_id);
    state
        .supervisor
        .get(&key)
        .await
        .ok_or_else(|| Error::not_found(format!("no instance for {key}")))?;
    let metadata = state.supervisor.metadata(&key).await;
    Ok(success(json!({ "metadata": metadata })))
}

/// `GET /api/instances/{serverId}/{workspaceId}/logs` — stdio ring
/// snapshots, most recent last.
pub async fn logs(
    State(state): State<Arc<HostState>>,
    Path((server_id, workspace_id)): Path<(String, String)>,
) -> ApiResult {
    let key = InstanceKey::new(server_id, workspace_id);
    let (stdout, stderr) = state
        .supervisor
        .stdio_logs(&key)
        .await
        .ok_or_else(|| Error::not_found(format!("no instance for {key}")))?;
    Ok(success(json!({ "stdout": stdout, "stderr": stderr })))
}
