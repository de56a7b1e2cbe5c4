//! Shared host runtime state and the cross-store orchestration helpers
//! used by both the API layer and the background cleanup tasks.

use std::{sync::Arc, time::Instant};

use tracing::info;

use {
    mcphost_common::Result,
    mcphost_config::HostConfig,
    mcphost_events::{AppEventKind, EventBus},
    mcphost_store::{
        PermissionStore, ProfileStore, SecretStore, ServerStore, SessionStore, Workspace,
        WorkspaceStore,
    },
    mcphost_supervisor::ProcessSupervisor,
};

/// Everything a request handler can reach, behind one `Arc`. Constructed
/// once by the shell, torn down on shutdown.
pub struct HostState {
    pub config: HostConfig,
    pub servers: Arc<ServerStore>,
    pub workspaces: Arc<WorkspaceStore>,
    pub secrets: Arc<SecretStore>,
    pub permissions: Arc<PermissionStore>,
    pub profile: Arc<ProfileStore>,
    pub sessions: Arc<SessionStore>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub events: EventBus,
    pub http: reqwest::Client,
    pub started_at: Instant,
}

impl HostState {
    /// Session TTL for a workspace, honoring its override.
    #[must_use]
    pub fn session_ttl(&self, workspace: &Workspace) -> std::time::Duration {
        workspace
            .session_ttl_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or(self.config.sessions.default_ttl)
    }

    /// Delete a server and everything hanging off it: live instances
    /// first, then per-workspace configs, scoped secrets, and permission
    /// profiles.
    pub async fn remove_server(&self, server_id: &str) -> Result<bool> {
        self.supervisor.stop_server(server_id).await?;
        self.workspaces.remove_server(server_id).await?;
        self.secrets.remove_server(server_id).await?;
        self.permissions.remove_server(server_id).await?;
        let removed = self.servers.delete(server_id).await?;
        if removed {
            self.events.emit_app(
                AppEventKind::ServerDeleted,
                serde_json::json!({ "serverId": server_id }),
            );
        }
        Ok(removed)
    }

    /// Delete a workspace and everything rooted at it: live instances
    /// first, then per-server configs, scoped secrets, permission
    /// overrides, and sessions.
    pub async fn remove_workspace(&self, workspace_id: &str) -> Result<bool> {
        self.supervisor.stop_workspace(workspace_id).await?;
        self.secrets.remove_workspace(workspace_id).await?;
        self.permissions.remove_workspace(workspace_id).await?;
        self.sessions.remove_workspace(workspace_id).await;
        let removed = self.workspaces.delete(workspace_id).await?;
        if removed {
            self.events.emit_app(
                AppEventKind::WorkspaceDeleted,
                serde_json::json!({ "workspaceId": workspace_id }),
            );
            info!(workspace = %workspace_id, "workspace removed");
        }
        Ok(removed)
    }

    /// Reset a workspace in place: stop its instances and drop its
    /// per-server configs and scoped secrets, keeping the record.
    pub async fn reset_workspace(&self, workspace_id: &str) -> Result<()> {
        self.supervisor.stop_workspace(workspace_id).await?;
        self.workspaces.clear_server_configs(workspace_id).await?;
        self.secrets.remove_workspace(workspace_id).await?;
        self.permissions.remove_workspace(workspace_id).await?;
        self.events.emit_app(
            AppEventKind::WorkspaceUpdated,
            serde_json::json!({ "workspaceId": workspace_id, "reset": true }),
        );
        Ok(())
    }
}
