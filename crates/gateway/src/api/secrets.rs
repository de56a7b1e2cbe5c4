//! `/api/secrets` — scoped secret management. Values travel in request
//! bodies only and are never echoed back or logged.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Query, State},
    },
    serde::Deserialize,
    serde_json::json,
};

use {mcphost_common::Error, mcphost_store::Scope};

use crate::{
    response::{ApiResult, success},
    state::HostState,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeParams {
    pub scope: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
}

impl ScopeParams {
    fn resolve(&self) -> Result<Scope, Error> {
        match self.scope.as_str() {
            "global" => Ok(Scope::Global),
            "workspace" => {
                let workspace_id = self
                    .workspace_id
                    .clone()
                    .ok_or_else(|| Error::invalid("workspace scope requires workspaceId"))?;
                Ok(Scope::Workspace(workspace_id))
            },
            "server" => {
                let workspace_id = self
                    .workspace_id
                    .clone()
                    .ok_or_else(|| Error::invalid("server scope requires workspaceId"))?;
                let server_id = self
                    .server_id
                    .clone()
                    .ok_or_else(|| Error::invalid("server scope requires serverId"))?;
                Ok(Scope::Server {
                    workspace_id,
                    server_id,
                })
            },
            other => Err(Error::invalid(format!(
                "unknown scope '{other}' (expected global, workspace, or server)"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSecretBody {
    #[serde(flatten)]
    pub scope: ScopeParams,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSecretBody {
    #[serde(flatten)]
    pub scope: ScopeParams,
    pub name: String,
}

/// `GET /api/secrets?scope=…` — names only.
pub async fn list(
    State(state): State<Arc<HostState>>,
    Query(params): Query<ScopeParams>,
) -> ApiResult {
    let scope = params.resolve()?;
    let names = state.secrets.names(&scope).await;
    Ok(success(json!({ "names": names })))
}

/// `PUT /api/secrets` — set a secret; the response carries the normalized
/// name, never the value.
pub async fn set(
    State(state): State<Arc<HostState>>,
    Json(body): Json<SetSecretBody>,
) -> ApiResult {
    let scope = body.scope.resolve()?;
    let name = state.secrets.set(scope, &body.name, body.value).await?;
    Ok(success(json!({ "name": name })))
}

/// `DELETE /api/secrets` — idempotent.
pub async fn delete(
    State(state): State<Arc<HostState>>,
    Json(body): Json<DeleteSecretBody>,
) -> ApiResult {
    let scope = body.scope.resolve()?;
    let removed = state.secrets.delete(scope, &body.name).await?;
    Ok(success(json!({ "removed": removed })))
}
