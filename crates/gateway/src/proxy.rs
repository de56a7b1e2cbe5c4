//! Reverse proxy for MCP client traffic.
//!
//! `ANY /mcp/{serverId}/{workspaceId}/…` forwards to the live instance for
//! that pair, starting it on demand. The shorthand `/mcp/{serverId}/…`
//! resolves to the global workspace; a second path segment is treated as a
//! workspace id only when such a workspace exists.

use std::sync::Arc;

use {
    axum::{
        body::Body,
        extract::{Path, Request, State},
        http::{HeaderMap, HeaderName, StatusCode},
        response::{IntoResponse, Response},
    },
    tracing::{debug, warn},
};

use {
    mcphost_common::Error,
    mcphost_store::GLOBAL_WORKSPACE,
    mcphost_supervisor::{InstanceKey, InstanceStatus},
};

use crate::{response::ApiError, state::HostState};

/// Headers that never cross the proxy, per RFC 9110 connection semantics.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Prefix for declared context headers injected on upstream requests.
const CONTEXT_HEADER_PREFIX: &str = "X-MCP-CTX-";

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// `ANY /mcp/{serverId}` — global workspace, empty path suffix.
pub async fn root(
    State(state): State<Arc<HostState>>,
    Path(server_id): Path<String>,
    request: Request,
) -> Response {
    forward(state, server_id, GLOBAL_WORKSPACE.to_string(), String::new(), request).await
}

/// `ANY /mcp/{serverId}/{*rest}` — workspace-qualified or global shorthand.
pub async fn with_path(
    State(state): State<Arc<HostState>>,
    Path((server_id, rest)): Path<(String, String)>,
    request: Request,
) -> Response {
    let (workspace_id, suffix) = resolve_workspace(&state, &rest).await;
    forward(state, server_id, workspace_id, suffix, request).await
}

/// Split `rest` into `(workspaceId, path-suffix)`. The first segment is a
/// workspace id only when a workspace with that id exists; otherwise the
/// whole suffix belongs to the global workspace.
async fn resolve_workspace(state: &HostState, rest: &str) -> (String, String) {
    let (first, remainder) = match rest.split_once('/') {
        Some((first, remainder)) => (first, remainder.to_string()),
        None => (rest, String::new()),
    };
    if state.workspaces.get(first).await.is_some() {
        (first.to_string(), remainder)
    } else {
        (GLOBAL_WORKSPACE.to_string(), rest.to_string())
    }
}

async fn forward(
    state: Arc<HostState>,
    server_id: String,
    workspace_id: String,
    suffix: String,
    request: Request,
) -> Response {
    match try_forward(state, server_id, workspace_id, suffix, request).await {
        Ok(response) => response,
        Err(e) => ApiError(e).into_response(),
    }
}

async fn try_forward(
    state: Arc<HostState>,
    server_id: String,
    workspace_id: String,
    suffix: String,
    request: Request,
) -> Result<Response, Error> {
    let server = state.servers.require(&server_id).await?;
    let workspace = state.workspaces.require(&workspace_id).await?;
    if !workspace.is_global() && !state.workspaces.is_enabled(&workspace_id, &server_id).await {
        return Err(Error::ServerDisabledForWorkspace {
            server_id,
            workspace_id,
        });
    }

    // On-demand start; `start` is idempotent and waits through readiness.
    let key = InstanceKey::new(server_id.clone(), workspace_id.clone());
    let instance = match state.supervisor.status(&key).await {
        Some(InstanceStatus::Running) => match state.supervisor.get(&key).await {
            Some(instance) => instance,
            None => state.supervisor.start(&key).await?,
        },
        _ => state.supervisor.start(&key).await?,
    };

    let ttl = state.session_ttl(&workspace);
    state.sessions.touch(&workspace_id, Some(ttl)).await;

    // Compose the outbound request.
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let url = format!("http://127.0.0.1:{}/{}{}", instance.port, suffix, query);
    let method = request.method().clone();

    let mut headers = HeaderMap::new();
    for (name, value) in request.headers() {
        if is_hop_by_hop(name.as_str())
            || name == http::header::HOST
            || name == http::header::CONTENT_LENGTH
        {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }
    // Declared context headers, valued from the workspace's server config.
    if !server.context_headers.is_empty() {
        let config = state
            .workspaces
            .server_config(&workspace_id, &server_id)
            .await
            .unwrap_or_default();
        for declared in &server.context_headers {
            if let Some(value) = config.context_headers.get(declared)
                && let Ok(name) =
                    HeaderName::try_from(format!("{CONTEXT_HEADER_PREFIX}{declared}"))
                && let Ok(value) = value.parse()
            {
                headers.insert(name, value);
            }
        }
    }

    debug!(method = %method, url = %url, "proxying request");
    let body_stream = request.into_body().into_data_stream();
    let upstream_result = state
        .http
        .request(method, &url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body_stream))
        .send()
        .await;

    let upstream = match upstream_result {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(instance = %key, error = %e, "upstream connect failed");
            state.supervisor.note_upstream_failure(&key).await;
            return Ok(bad_gateway(&key));
        },
    };

    // Relay status, headers (minus hop-by-hop), and the streamed body.
    let status = upstream.status();
    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            response_headers.insert(name.clone(), value.clone());
        }
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| Error::Internal(format!("failed to assemble proxy response: {e}")))
}

fn bad_gateway(key: &InstanceKey) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        axum::Json(serde_json::json!({
            "success": false,
            "error": "upstream instance is unreachable",
            "code": "UpstreamUnavailable",
            "serverId": key.server_id,
            "workspaceId": key.workspace_id,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_filtered() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(is_hop_by_hop("TE"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("authorization"));
        assert!(!is_hop_by_hop("x-mcp-ctx-tenant"));
    }
}
