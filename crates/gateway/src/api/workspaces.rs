//! `/api/workspaces` — workspace CRUD, reset, and per-workspace server
//! configuration.

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
    mcphost_events::{AppEventKind, ServerEventKind},
    mcphost_store::{NewWorkspace, ServerConfigPatch, WorkspacePatch},
    mcphost_supervisor::InstanceKey,
};

use crate::{
    response::{ApiResult, success},
    state::HostState,
};

pub async fn list(State(state): State<Arc<HostState>>) -> ApiResult {
    let workspaces = state.workspaces.list().await;
    Ok(success(json!({ "workspaces": workspaces })))
}

pub async fn create(
    State(state): State<Arc<HostState>>,
    Json(input): Json<NewWorkspace>,
) -> ApiResult {
    let workspace = state.workspaces.create(input).await?;
    state.events.emit_app(
        AppEventKind::WorkspaceCreated,
        json!({ "workspace": workspace }),
    );
    Ok(success(json!({ "workspace": workspace })))
}

pub async fn update(
    State(state): State<Arc<HostState>>,
    Path(id): Path<String>,
    Json(patch): Json<WorkspacePatch>,
) -> ApiResult {
    let workspace = state.workspaces.update(&id, patch).await?;
    state.events.emit_app(
        AppEventKind::WorkspaceUpdated,
        json!({ "workspace": workspace }),
    );
    Ok(success(json!({ "workspace": workspace })))
}

pub async fn delete(State(state): State<Arc<HostState>>, Path(id): Path<String>) -> ApiResult {
    state.workspaces.require(&id).await?;
    state.remove_workspace(&id).await?;
    Ok(success(json!({})))
}

/// `POST /api/workspaces/{id}/reset` — stop instances and drop per-server
/// config and scoped secrets, keeping the workspace itself.
pub async fn reset(State(state): State<Arc<HostState>>, Path(id): Path<String>) -> ApiResult {
    state.workspaces.require(&id).await?;
    state.reset_workspace(&id).await?;
    Ok(success(json!({})))
}

/// `GET /api/workspaces/{wsId}/servers` — the enable map: every server in
/// the catalog with its effective per-workspace settings.
pub async fn server_map(
    State(state): State<Arc<HostState>>,
    Path(workspace_id): Path<String>,
) -> ApiResult {
    state.workspaces.require(&workspace_id).await?;
    let configured = state.workspaces.server_configs(&workspace_id).await;
    let mut servers = serde_json::Map::new();
    for record in state.servers.list().await {
        let config = configured.get(&record.id).cloned().unwrap_or_default();
        servers.insert(
            record.id.clone(),
            json!({
                "enabled": config.enabled,
                "contextHeaders": config.context_headers,
            }),
        );
    }
    Ok(success(json!({ "servers": servers })))
}

/// `PUT /api/workspaces/{wsId}/servers/{id}` — enable flag and context
/// header values. Disabling stops a live instance.
pub async fn put_server_config(
    State(state): State<Arc<HostState>>,
    Path((workspace_id, server_id)): Path<(String, String)>,
    Json(patch): Json<ServerConfigPatch>,
) -> ApiResult {
    state.servers.require(&server_id).await?;
    let disabling = patch.enabled == Some(false);
    let config = state
        .workspaces
        .patch_server_config(&workspace_id, &server_id, patch)
        .await?;
    if disabling {
        state
            .supervisor
            .stop(&InstanceKey::new(server_id.clone(), workspace_id.clone()))
            .await?;
    }
    state.events.emit_server(
        ServerEventKind::ConfigChanged,
        &server_id,
        Some(workspace_id),
        Some(json!({ "enabled": config.enabled })),
    );
    Ok(success(json!({ "config": config })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrideBody {
    pub config: Option<serde_json::Value>,
}

/// `GET /api/workspaces/{wsId}/servers/{id}/config` — the stored override
/// plus the effective merge over the template default.
pub async fn get_config_override(
    State(state): State<Arc<HostState>>,
    Path((workspace_id, server_id)): Path<(String, String)>,
) -> ApiResult {
    let record = state.servers.require(&server_id).await?;
    state.workspaces.require(&workspace_id).await?;
    let stored = state
        .workspaces
        .server_config(&workspace_id, &server_id)
        .await
        .and_then(|c| c.config);
    let effective = merge_config(&record.default_config, stored.as_ref());
    Ok(success(json!({
        "config": stored,
        "effectiveConfig": effective,
    })))
}

/// `PUT /api/workspaces/{wsId}/servers/{id}/config`.
pub async fn put_config_override(
    State(state): State<Arc<HostState>>,
    Path((workspace_id, server_id)): Path<(String, String)>,
    Json(body): Json<ConfigOverrideBody>,
) -> ApiResult {
    state.servers.require(&server_id).await?;
    let config = state
        .workspaces
        .set_config_override(&workspace_id, &server_id, body.config)
        .await?;
    state.events.emit_server(
        ServerEventKind::ConfigChanged,
        &server_id,
        Some(workspace_id),
        None,
    );
    Ok(success(json!({ "config": config.config })))
}

/// Shallow merge: override keys win over the template default.
fn merge_config(
    default: &serde_json::Value,
    overlay: Option<&serde_json::Value>,
) -> serde_json::Value {
    match (default, overlay) {
        (serde_json::Value::Object(base), Some(serde_json::Value::Object(over))) => {
            let mut merged = base.clone();
            for (k, v) in over {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        },
        (_, Some(overlay)) => overlay.clone(),
        (default, None) => default.clone(),
    }
}
