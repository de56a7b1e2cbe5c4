//! Persisted workspaces and their per-server configuration.
//!
//! The distinguished `global` workspace always exists and can never be
//! deleted. Per-`(workspace, server)` configuration only exists for
//! non-global workspaces; a missing entry means "enabled with defaults".

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::info,
};

use mcphost_common::{Error, Result, now_ms};

use crate::persist;

/// Id of the workspace every server is implicitly a member of.
pub const GLOBAL_WORKSPACE: &str = "global";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub label: String,
    /// Absent only for the global pseudo-workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
    #[serde(default)]
    pub auto_cleanup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Session idle TTL override, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ttl_secs: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Workspace {
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.id == GLOBAL_WORKSPACE
    }
}

/// Per-`(workspace, server)` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-workspace config override, merged over the template default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// Values for the context headers the server declares.
    #[serde(default)]
    pub context_headers: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Default for WorkspaceServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config: None,
            context_headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkspace {
    pub label: String,
    pub project_root: PathBuf,
    #[serde(default)]
    pub auto_cleanup: bool,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePatch {
    pub label: Option<String>,
    pub project_root: Option<PathBuf>,
    pub auto_cleanup: Option<bool>,
    pub session_ttl_secs: Option<u64>,
}

/// Patch for a `(workspace, server)` pair.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfigPatch {
    pub enabled: Option<bool>,
    pub context_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkspacesFile {
    #[serde(default)]
    workspaces: HashMap<String, Workspace>,
    /// workspaceId → serverId → config.
    #[serde(default)]
    server_configs: HashMap<String, HashMap<String, WorkspaceServerConfig>>,
}

/// Persisted workspace catalog.
pub struct WorkspaceStore {
    path: PathBuf,
    inner: RwLock<WorkspacesFile>,
}

impl WorkspaceStore {
    /// Open the store, creating the `global` workspace if missing.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file: WorkspacesFile = persist::load_json(path)?;
        if !file.workspaces.contains_key(GLOBAL_WORKSPACE) {
            let now = now_ms();
            file.workspaces.insert(GLOBAL_WORKSPACE.into(), Workspace {
                id: GLOBAL_WORKSPACE.into(),
                label: "Global".into(),
                project_root: None,
                auto_cleanup: false,
                source: None,
                session_ttl_secs: None,
                created_at: now,
                updated_at: now,
            });
            persist::save_json(path, &file)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(file),
        })
    }

    pub async fn list(&self) -> Vec<Workspace> {
        let inner = self.inner.read().await;
        let mut workspaces: Vec<_> = inner.workspaces.values().cloned().collect();
        // Global first, then by label.
        workspaces.sort_by(|a, b| {
            b.is_global()
                .cmp(&a.is_global())
                .then_with(|| a.label.cmp(&b.label))
        });
        workspaces
    }

    pub async fn get(&self, id: &str) -> Option<Workspace> {
        self.inner.read().await.workspaces.get(id).cloned()
    }

    pub async fn require(&self, id: &str) -> Result<Workspace> {
        self.get(id)
            .await
            .ok_or_else(|| Error::not_found(format!("workspace '{id}' not found")))
    }

    pub async fn create(&self, input: NewWorkspace) -> Result<Workspace> {
        if !input.project_root.is_absolute() {
            return Err(Error::invalid("projectRoot must be an absolute path"));
        }
        let now = now_ms();
        let workspace = Workspace {
            id: uuid::Uuid::new_v4().to_string(),
            label: input.label,
            project_root: Some(input.project_root),
            auto_cleanup: input.auto_cleanup,
            source: input.source,
            session_ttl_secs: input.session_ttl_secs,
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.write().await;
        inner
            .workspaces
            .insert(workspace.id.clone(), workspace.clone());
        persist::save_json(&self.path, &*inner)?;
        info!(workspace = %workspace.id, label = %workspace.label, "created workspace");
        Ok(workspace)
    }

    pub async fn update(&self, id: &str, patch: WorkspacePatch) -> Result<Workspace> {
        let mut inner = self.inner.write().await;
        let workspace = inner
            .workspaces
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("workspace '{id}' not found")))?;

        if let Some(label) = patch.label {
            workspace.label = label;
        }
        if let Some(root) = patch.project_root {
            if workspace.is_global() {
                return Err(Error::invalid("the global workspace has no project root"));
            }
            if !root.is_absolute() {
                return Err(Error::invalid("projectRoot must be an absolute path"));
            }
            workspace.project_root = Some(root);
        }
        if let Some(auto) = patch.auto_cleanup {
            workspace.auto_cleanup = auto;
        }
        if let Some(ttl) = patch.session_ttl_secs {
            workspace.session_ttl_secs = Some(ttl);
        }
        workspace.updated_at = now_ms();

        let updated = workspace.clone();
        persist::save_json(&self.path, &*inner)?;
        Ok(updated)
    }

    /// Remove a workspace and all its per-server configuration. The global
    /// workspace is never deleted.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if id == GLOBAL_WORKSPACE {
            return Err(Error::invalid("the global workspace cannot be deleted"));
        }
        let mut inner = self.inner.write().await;
        let removed = inner.workspaces.remove(id).is_some();
        inner.server_configs.remove(id);
        if removed {
            persist::save_json(&self.path, &*inner)?;
            info!(workspace = %id, "deleted workspace");
        }
        Ok(removed)
    }

    // ── Per-server configuration ────────────────────────────────────────

    pub async fn server_config(
        &self,
        workspace_id: &str,
        server_id: &str,
    ) -> Option<WorkspaceServerConfig> {
        self.inner
            .read()
            .await
            .server_configs
            .get(workspace_id)
            .and_then(|m| m.get(server_id))
            .cloned()
    }

    /// Whether a server may run in a workspace. The global workspace and
    /// unconfigured pairs default to enabled.
    pub async fn is_enabled(&self, workspace_id: &str, server_id: &str) -> bool {
        if workspace_id == GLOBAL_WORKSPACE {
            return true;
        }
        self.server_config(workspace_id, server_id)
            .await
            .is_none_or(|c| c.enabled)
    }

    /// The full enable map for one workspace.
    pub async fn server_configs(&self, workspace_id: &str) -> HashMap<String, WorkspaceServerConfig> {
        self.inner
            .read()
            .await
            .server_configs
            .get(workspace_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn patch_server_config(
        &self,
        workspace_id: &str,
        server_id: &str,
        patch: ServerConfigPatch,
    ) -> Result<WorkspaceServerConfig> {
        if workspace_id == GLOBAL_WORKSPACE {
            return Err(Error::invalid(
                "per-server configuration does not apply to the global workspace",
            ));
        }
        let mut inner = self.inner.write().await;
        if !inner.workspaces.contains_key(workspace_id) {
            return Err(Error::not_found(format!(
                "workspace '{workspace_id}' not found"
            )));
        }
        let config = inner
            .server_configs
            .entry(workspace_id.to_string())
            .or_default()
            .entry(server_id.to_string())
            .or_default();
        if let Some(enabled) = patch.enabled {
            config.enabled = enabled;
        }
        if let Some(headers) = patch.context_headers {
            config.context_headers = headers;
        }
        let updated = config.clone();
        persist::save_json(&self.path, &*inner)?;
        Ok(updated)
    }

    /// Set or clear the per-workspace config override for a server.
    pub async fn set_config_override(
        &self,
        workspace_id: &str,
        server_id: &str,
        config: Option<serde_json::Value>,
    ) -> Result<WorkspaceServerConfig> {
        if workspace_id == GLOBAL_WORKSPACE {
            return Err(Error::invalid(
                "per-server configuration does not apply to the global workspace",
            ));
        }
        let mut inner = self.inner.write().await;
        if !inner.workspaces.contains_key(workspace_id) {
            return Err(Error::not_found(format!(
                "workspace '{workspace_id}' not found"
            )));
        }
        let entry = inner
            .server_configs
            .entry(workspace_id.to_string())
            .or_default()
            .entry(server_id.to_string())
            .or_default();
        entry.config = config;
        let updated = entry.clone();
        persist::save_json(&self.path, &*inner)?;
        Ok(updated)
    }

    /// Drop every workspace's configuration for one server (server delete).
    pub async fn remove_server(&self, server_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let mut changed = false;
        for configs in inner.server_configs.values_mut() {
            changed |= configs.remove(server_id).is_some();
        }
        if changed {
            persist::save_json(&self.path, &*inner)?;
        }
        Ok(())
    }

    /// Drop all per-server configuration of one workspace (reset).
    pub async fn clear_server_configs(&self, workspace_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.server_configs.remove(workspace_id).is_some() {
            persist::save_json(&self.path, &*inner)?;
        }
        Ok(())
    }
}
