//! `/api/servers/{id}/permissions` — profiles and per-workspace overrides.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State},
    },
    serde_json::json,
};

use {
    mcphost_events::AppEventKind,
    mcphost_store::{PermissionOverride, PermissionProfile},
};

use crate::{
    response::{ApiResult, success},
    state::HostState,
};

/// `GET /api/servers/{id}/permissions` — the stored profile, with a
/// `legacy` marker when none exists so UIs can warn.
pub async fn get_profile(
    State(state): State<Arc<HostState>>,
    Path(server_id): Path<String>,
) -> ApiResult {
    state.servers.require(&server_id).await?;
    let profile = state.permissions.profile(&server_id).await;
    Ok(success(json!({
        "legacy": profile.is_none(),
        "profile": profile,
    })))
}

pub async fn put_profile(
    State(state): State<Arc<HostState>>,
    Path(server_id): Path<String>,
    Json(profile): Json<PermissionProfile>,
) -> ApiResult {
    state.servers.require(&server_id).await?;
    state.permissions.set_profile(&server_id, profile).await?;
    state.events.emit_app(
        AppEventKind::ProfileUpdated,
        json!({ "serverId": server_id }),
    );
    Ok(success(json!({})))
}

pub async fn delete_profile(
    State(state): State<Arc<HostState>>,
    Path(server_id): Path<String>,
) -> ApiResult {
    let removed = state.permissions.delete_profile(&server_id).await?;
    if removed {
        state.events.emit_app(
            AppEventKind::ProfileUpdated,
            json!({ "serverId": server_id }),
        );
    }
    Ok(success(json!({ "removed": removed })))
}

/// `GET /api/servers/{id}/permissions/{wsId}` — the workspace override
/// plus the resolved effective profile for that pair.
pub async fn get_override(
    State(state): State<Arc<HostState>>,
    Path((server_id, workspace_id)): Path<(String, String)>,
) -> ApiResult {
    state.servers.require(&server_id).await?;
    let stored = state
        .permissions
        .override_for(&workspace_id, &server_id)
        .await;
    let effective = state
        .permissions
        .effective(&workspace_id, &server_id)
        .await;
    let (legacy, effective_profile) = match effective {
        mcphost_store::EffectiveProfile::Legacy => (true, None),
        mcphost_store::EffectiveProfile::Profile(profile) => (false, Some(profile)),
    };
    Ok(success(json!({
        "override": stored,
        "legacy": legacy,
        "effective": effective_profile,
    })))
}

pub async fn put_override(
    State(state): State<Arc<HostState>>,
    Path((server_id, workspace_id)): Path<(String, String)>,
    Json(value): Json<PermissionOverride>,
) -> ApiResult {
    state.servers.require(&server_id).await?;
    state.workspaces.require(&workspace_id).await?;
    state
        .permissions
        .set_override(&workspace_id, &server_id, value)
        .await?;
    state.events.emit_app(
        AppEventKind::ProfileUpdated,
        json!({ "serverId": server_id, "workspaceId": workspace_id }),
    );
    Ok(success(json!({})))
}

pub async fn delete_override(
    State(state): State<Arc<HostState>>,
    Path((server_id, workspace_id)): Path<(String, String)>,
) -> ApiResult {
    let removed = state
        .permissions
        .delete_override(&workspace_id, &server_id)
        .await?;
    if removed {
        state.events.emit_app(
            AppEventKind::ProfileUpdated,
            json!({ "serverId": server_id, "workspaceId": workspace_id }),
        );
    }
    Ok(success(json!({ "removed": removed })))
}
