#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the HTTP API, the events WebSocket, and the
//! gateway's enabled-workspace enforcement, against a real listener.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {futures::StreamExt, tokio::net::TcpListener, tokio_tungstenite::connect_async};

use {
    mcphost_config::{HostConfig, PortRange, SupervisorTimings},
    mcphost_gateway::{HostState, build_router, server::build_state},
};

/// Build a host on a temp data dir and serve it on an ephemeral port.
async fn start_test_host(port_low: u16) -> (SocketAddr, Arc<HostState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = HostConfig {
        data_dir: dir.path().to_path_buf(),
        ports: PortRange {
            low: port_low,
            high: port_low + 49,
        },
        supervisor: SupervisorTimings {
            readiness_deadline: Duration::from_millis(300),
            readiness_initial_interval: Duration::from_millis(20),
            retry_max_attempts: 0,
            key_lock_timeout: Duration::from_secs(2),
            ..Default::default()
        },
        ..Default::default()
    };
    let state = build_state(config).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(Arc::clone(&state));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, state, dir)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn create_workspace(client: &reqwest::Client, addr: SocketAddr, label: &str) -> String {
    let body: serde_json::Value = client
        .post(format!("http://{addr}/api/workspaces"))
        .json(&serde_json::json!({ "label": label, "projectRoot": "/projects/app" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    body["workspace"]["id"].as_str().unwrap().to_string()
}

async fn create_local_server(client: &reqwest::Client, addr: SocketAddr, dir: &std::path::Path) -> String {
    let server_dir = dir.join("srv");
    std::fs::create_dir_all(&server_dir).unwrap();
    let body: serde_json::Value = client
        .post(format!("http://{addr}/api/servers"))
        .json(&serde_json::json!({
            "installType": "local",
            "localPath": server_dir,
            "name": "files",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true, "body: {body}");
    body["server"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn host_health_reports_ok() {
    let (addr, _state, _dir) = start_test_host(44_000).await;
    let body: serde_json::Value = client()
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["instances"], 0);
}

#[tokio::test]
async fn workspace_crud_and_event_stream() {
    let (addr, _state, _dir) = start_test_host(44_050).await;

    // Subscribe first so the creation event is observed.
    let (mut ws, _) = connect_async(format!("ws://{addr}/events")).await.unwrap();
    let hello = ws.next().await.unwrap().unwrap();
    let hello: serde_json::Value = serde_json::from_str(hello.to_text().unwrap()).unwrap();
    assert_eq!(hello["type"], "connected");

    let http = client();
    let ws_id = create_workspace(&http, addr, "App").await;

    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(event["type"], "app-event");
    assert_eq!(event["kind"], "workspace-created");
    assert_eq!(event["data"]["workspace"]["id"], ws_id.as_str());

    // Listing includes global plus the new workspace.
    let body: serde_json::Value = http
        .get(format!("http://{addr}/api/workspaces"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let workspaces = body["workspaces"].as_array().unwrap();
    assert_eq!(workspaces.len(), 2);
    assert_eq!(workspaces[0]["id"], "global");

    // Deleting the global workspace is refused.
    let response = http
        .delete(format!("http://{addr}/api/workspaces/global"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn server_catalog_lists_with_status() {
    let (addr, _state, dir) = start_test_host(44_100).await;
    let http = client();
    let server_id = create_local_server(&http, addr, dir.path()).await;

    let body: serde_json::Value = http
        .get(format!("http://{addr}/api/servers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let servers = body["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["id"], server_id.as_str());
    assert_eq!(servers[0]["status"], "stopped");
    assert_eq!(servers[0]["installType"], "local");
}

#[tokio::test]
async fn start_unknown_server_is_404_with_code() {
    let (addr, _state, _dir) = start_test_host(44_150).await;
    let response = client()
        .post(format!("http://{addr}/api/instances/start"))
        .json(&serde_json::json!({ "serverId": "ghost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NotFound");
}

#[tokio::test]
async fn disabled_workspace_rejects_start_and_proxy() {
    let (addr, _state, dir) = start_test_host(44_200).await;
    let http = client();
    let server_id = create_local_server(&http, addr, dir.path()).await;
    let ws_id = create_workspace(&http, addr, "App").await;

    // Disable the server for the workspace.
    let response = http
        .put(format!("http://{addr}/api/workspaces/{ws_id}/servers/{server_id}"))
        .json(&serde_json::json!({ "enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // API start: 409 with the stable token.
    let response = http
        .post(format!("http://{addr}/api/instances/start"))
        .json(&serde_json::json!({ "serverId": server_id, "workspaceId": ws_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "ServerDisabledForWorkspace");

    // Gateway: same refusal.
    let response = http
        .get(format!("http://{addr}/mcp/{server_id}/{ws_id}/anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "ServerDisabledForWorkspace");
}

#[tokio::test]
async fn proxy_unknown_server_is_404() {
    let (addr, _state, _dir) = start_test_host(44_250).await;
    let response = client()
        .get(format!("http://{addr}/mcp/ghost/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NotFound");
}

#[tokio::test]
async fn secrets_roundtrip_without_leaking_values() {
    let (addr, _state, _dir) = start_test_host(44_300).await;
    let http = client();

    let body: serde_json::Value = http
        .put(format!("http://{addr}/api/secrets"))
        .json(&serde_json::json!({
            "scope": "global",
            "name": "token",
            "value": "super-sensitive",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["name"], "SECRET_TOKEN");

    let body: serde_json::Value = http
        .get(format!("http://{addr}/api/secrets?scope=global"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["names"], serde_json::json!(["SECRET_TOKEN"]));
    assert!(!body.to_string().contains("super-sensitive"));

    // Invalid names are rejected with the specific token.
    let response = http
        .put(format!("http://{addr}/api/secrets"))
        .json(&serde_json::json!({
            "scope": "global",
            "name": "has space",
            "value": "x",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "InvalidSecretName");

    let body: serde_json::Value = http
        .delete(format!("http://{addr}/api/secrets"))
        .json(&serde_json::json!({ "scope": "global", "name": "TOKEN" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["removed"], true);
}

#[tokio::test]
async fn permission_profile_lifecycle() {
    let (addr, _state, dir) = start_test_host(44_350).await;
    let http = client();
    let server_id = create_local_server(&http, addr, dir.path()).await;

    // No profile stored: legacy.
    let body: serde_json::Value = http
        .get(format!("http://{addr}/api/servers/{server_id}/permissions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["legacy"], true);

    // Store one, read it back.
    let response = http
        .put(format!("http://{addr}/api/servers/{server_id}/permissions"))
        .json(&serde_json::json!({
            "env": { "allowPath": true, "customAllowlist": ["EDITOR"] },
            "context": { "allowWorkspaceId": true },
            "secrets": { "mode": "all" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = http
        .get(format!("http://{addr}/api/servers/{server_id}/permissions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["legacy"], false);
    assert_eq!(body["profile"]["env"]["allowPath"], true);
    assert_eq!(body["profile"]["secrets"]["mode"], "all");
}

#[tokio::test]
async fn user_profile_login_logout() {
    let (addr, _state, _dir) = start_test_host(44_400).await;
    let http = client();

    let body: serde_json::Value = http
        .post(format!("http://{addr}/api/auth/login"))
        .json(&serde_json::json!({ "fullName": "Ada", "email": "ada@example.com" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["profile"]["email"], "ada@example.com");

    let body: serde_json::Value = http
        .get(format!("http://{addr}/api/auth/profile"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["profile"]["fullName"], "Ada");

    http.post(format!("http://{addr}/api/auth/logout"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = http
        .get(format!("http://{addr}/api/auth/profile"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["profile"].is_null());
}

#[tokio::test]
async fn server_delete_cascades() {
    let (addr, state, dir) = start_test_host(44_450).await;
    let http = client();
    let server_id = create_local_server(&http, addr, dir.path()).await;
    let ws_id = create_workspace(&http, addr, "App").await;

    // Attach workspace config and a server-scoped secret.
    http.put(format!("http://{addr}/api/workspaces/{ws_id}/servers/{server_id}"))
        .json(&serde_json::json!({ "enabled": false }))
        .send()
        .await
        .unwrap();
    http.put(format!("http://{addr}/api/secrets"))
        .json(&serde_json::json!({
            "scope": "server",
            "workspaceId": ws_id,
            "serverId": server_id,
            "name": "KEY",
            "value": "v",
        }))
        .send()
        .await
        .unwrap();

    let response = http
        .delete(format!("http://{addr}/api/servers/{server_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Record, config, scoped secrets, instances: all gone.
    assert!(state.servers.get(&server_id).await.is_none());
    assert!(
        state
            .workspaces
            .server_config(&ws_id, &server_id)
            .await
            .is_none()
    );
    assert!(state.secrets.effective(&ws_id, &server_id).await.is_empty());
    assert!(state.supervisor.list().await.is_empty());
}
