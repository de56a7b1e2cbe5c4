//! `/api/servers` — server catalog CRUD, install/update, update checks.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, Query, State},
    },
    serde::Deserialize,
    serde_json::json,
    tracing::warn,
};

use {
    mcphost_common::Error,
    mcphost_events::AppEventKind,
    mcphost_store::{GLOBAL_WORKSPACE, InstallType, NewServer, ServerPatch, ServerRecord},
    mcphost_supervisor::{InstanceKey, InstanceStatus, install},
};

use crate::{
    response::{ApiResult, success},
    state::HostState,
    version_check,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    workspace_id: Option<String>,
}

/// `GET /api/servers[?workspaceId=…]` — catalog with live status for the
/// given workspace (default global).
pub async fn list(
    State(state): State<Arc<HostState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let workspace_id = query
        .workspace_id
        .unwrap_or_else(|| GLOBAL_WORKSPACE.to_string());
    let mut servers = Vec::new();
    for record in state.servers.list().await {
        let key = InstanceKey::new(record.id.clone(), workspace_id.clone());
        let instance = state.supervisor.get(&key).await;
        let mut entry = serde_json::to_value(&record)
            .map_err(|e| Error::Internal(format!("serialization failed: {e}")))?;
        if let serde_json::Value::Object(map) = &mut entry {
            let status = instance
                .as_ref()
                .map_or(InstanceStatus::Stopped, |i| i.status);
            map.insert(
                "status".into(),
                serde_json::to_value(status).unwrap_or_default(),
            );
            if let Some(instance) = instance {
                map.insert("port".into(), json!(instance.port));
            }
        }
        servers.push(entry);
    }
    Ok(success(json!({ "servers": servers })))
}

/// `POST /api/servers` — the add-server flow. `npm`-type servers are
/// installed immediately; the fetch itself is an opaque capability.
pub async fn create(
    State(state): State<Arc<HostState>>,
    Json(input): Json<NewServer>,
) -> ApiResult {
    let record = state.servers.create(input).await?;
    let record = match install_if_needed(&state, &record).await {
        Ok(record) => record,
        Err(e) => {
            // Roll the half-created record back so a failed install does
            // not leave an unstartable server in the catalog.
            let _ = state.servers.delete(&record.id).await;
            return Err(e.into());
        },
    };
    state.events.emit_app(
        AppEventKind::ServerAdded,
        json!({ "serverId": record.id, "name": record.name }),
    );
    Ok(success(json!({ "server": record })))
}

async fn install_if_needed(
    state: &HostState,
    record: &ServerRecord,
) -> Result<ServerRecord, Error> {
    if record.install_type != InstallType::Npm {
        return Ok(record.clone());
    }
    let root = state.config.server_root(&record.id);
    match install::install_package(record, &root).await? {
        Some(version) => state.servers.set_version(&record.id, &version).await,
        None => Ok(record.clone()),
    }
}

/// `PATCH /api/servers/{id}` — metadata update.
pub async fn update(
    State(state): State<Arc<HostState>>,
    Path(id): Path<String>,
    Json(patch): Json<ServerPatch>,
) -> ApiResult {
    let record = state.servers.update(&id, patch).await?;
    state.events.emit_server(
        mcphost_events::ServerEventKind::Updated,
        &id,
        None,
        Some(json!({ "name": record.name })),
    );
    Ok(success(json!({ "server": record })))
}

/// `DELETE /api/servers/{id}` — stops every instance first, then removes
/// the record and everything scoped to it.
pub async fn delete(State(state): State<Arc<HostState>>, Path(id): Path<String>) -> ApiResult {
    state.servers.require(&id).await?;
    state.remove_server(&id).await?;
    Ok(success(json!({})))
}

/// `POST /api/servers/{id}/update` — install the latest version and
/// restart running instances of the server.
pub async fn install_update(
    State(state): State<Arc<HostState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let record = state.servers.require(&id).await?;
    let package = match (&record.install_type, record.package_name.as_deref()) {
        (InstallType::Local, _) => {
            return Err(Error::invalid("local servers are not updated through the registry").into());
        },
        (_, Some(package)) => package.to_string(),
        (_, None) => return Err(Error::invalid("server has no package name").into()),
    };

    let latest = version_check::latest_version(&state.http, &package).await?;
    let record = if record.install_type == InstallType::Npm {
        let mut refreshed = record.clone();
        refreshed.package_version = Some(latest.clone());
        let root = state.config.server_root(&record.id);
        let installed = install::install_package(&refreshed, &root)
            .await?
            .unwrap_or(latest.clone());
        state.servers.set_version(&id, &installed).await?
    } else {
        // Runner types resolve the package at spawn; recording the new
        // version is enough.
        state.servers.set_version(&id, &latest).await?
    };
    state.servers.set_latest_version(&id, &latest).await?;

    // Restart whatever is currently running on the old version.
    let mut restarted = Vec::new();
    for instance in state.supervisor.list().await {
        if instance.server_id == id && instance.status == InstanceStatus::Running {
            let key = InstanceKey::new(instance.server_id, instance.workspace_id);
            match state.supervisor.restart(&key).await {
                Ok(_) => restarted.push(key.workspace_id.clone()),
                Err(e) => warn!(instance = %key, error = %e, "restart after update failed"),
            }
        }
    }

    state.events.emit_server(
        mcphost_events::ServerEventKind::Updated,
        &id,
        None,
        Some(json!({ "version": record.package_version })),
    );
    Ok(success(json!({ "server": record, "restarted": restarted })))
}

/// `GET /api/servers/{id}/check-update`.
pub async fn check_update(
    State(state): State<Arc<HostState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let record = state.servers.require(&id).await?;
    let Some(package) = record.package_name.clone() else {
        return Ok(success(json!({
            "hasUpdate": false,
            "currentVersion": serde_json::Value::Null,
            "latestVersion": serde_json::Value::Null,
        })));
    };
    if record.install_type == InstallType::Local {
        return Ok(success(json!({
            "hasUpdate": false,
            "currentVersion": record.package_version,
            "latestVersion": record.package_version,
        })));
    }

    let latest = version_check::latest_version(&state.http, &package).await?;
    state.servers.set_latest_version(&id, &latest).await?;
    let current = record.package_version.clone().unwrap_or_default();
    Ok(success(json!({
        "hasUpdate": version_check::is_newer_version(&latest, &current),
        "currentVersion": record.package_version,
        "latestVersion": latest,
    })))
}
