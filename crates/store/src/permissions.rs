//! Per-server permission profiles with per-workspace overrides.
//!
//! A server with no stored profile resolves to [`EffectiveProfile::Legacy`],
//! which the environment composer treats as an unfiltered parent
//! environment. Overrides replace whole sections (`env`, `context`,
//! `secrets`) when present.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::info,
};

use mcphost_common::{Error, Result};

use crate::persist;

/// Which host environment variables a child may see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvPermissions {
    #[serde(default)]
    pub allow_path: bool,
    #[serde(default)]
    pub allow_home: bool,
    #[serde(default)]
    pub allow_lang: bool,
    #[serde(default)]
    pub allow_temp: bool,
    #[serde(default)]
    pub allow_node: bool,
    /// Extra parent variables to copy, by exact uppercase name.
    #[serde(default)]
    pub custom_allowlist: Vec<String>,
}

/// Which context values the host injects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPermissions {
    #[serde(default)]
    pub allow_project_root: bool,
    #[serde(default)]
    pub allow_workspace_id: bool,
    #[serde(default)]
    pub allow_user_profile: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretMode {
    #[default]
    None,
    Allowlist,
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretPermissions {
    #[serde(default)]
    pub mode: SecretMode,
    /// Secret names visible in `allowlist` mode (normalized form).
    #[serde(default)]
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionProfile {
    #[serde(default)]
    pub env: EnvPermissions,
    #[serde(default)]
    pub context: ContextPermissions,
    #[serde(default)]
    pub secrets: SecretPermissions,
    /// AI-assistant knobs; carried through but ignored by the host core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<serde_json::Value>,
}

/// A workspace's partial override of a server profile. Sections replace
/// the server-level section wholesale when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvPermissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextPermissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SecretPermissions>,
}

impl PermissionOverride {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.env.is_none() && self.context.is_none() && self.secrets.is_none()
    }
}

/// The policy the environment composer receives.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectiveProfile {
    /// No stored profile anywhere: pass the parent environment through
    /// unfiltered, preserving pre-profile behavior.
    Legacy,
    Profile(PermissionProfile),
}

impl EffectiveProfile {
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PermissionsFile {
    /// serverId → profile.
    #[serde(default)]
    servers: HashMap<String, PermissionProfile>,
    /// workspaceId → serverId → override.
    #[serde(default)]
    overrides: HashMap<String, HashMap<String, PermissionOverride>>,
}

/// Persisted permission profiles.
pub struct PermissionStore {
    path: PathBuf,
    inner: RwLock<PermissionsFile>,
}

impl PermissionStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file: PermissionsFile = persist::load_json(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(file),
        })
    }

    pub async fn profile(&self, server_id: &str) -> Option<PermissionProfile> {
        self.inner.read().await.servers.get(server_id).cloned()
    }

    pub async fn set_profile(&self, server_id: &str, profile: PermissionProfile) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.servers.insert(server_id.to_string(), profile);
        persist::save_json(&self.path, &*inner)?;
        info!(server = %server_id, "stored permission profile");
        Ok(())
    }

    pub async fn delete_profile(&self, server_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.servers.remove(server_id).is_some();
        if removed {
            persist::save_json(&self.path, &*inner)?;
        }
        Ok(removed)
    }

    pub async fn override_for(
        &self,
        workspace_id: &str,
        server_id: &str,
    ) -> Option<PermissionOverride> {
        self.inner
            .read()
            .await
            .overrides
            .get(workspace_id)
            .and_then(|m| m.get(server_id))
            .cloned()
    }

    pub async fn set_override(
        &self,
        workspace_id: &str,
        server_id: &str,
        value: PermissionOverride,
    ) -> Result<()> {
        if value.is_empty() {
            return Err(Error::invalid("permission override must set at least one section"));
        }
        let mut inner = self.inner.write().await;
        inner
            .overrides
            .entry(workspace_id.to_string())
            .or_default()
            .insert(server_id.to_string(), value);
        persist::save_json(&self.path, &*inner)
    }

    pub async fn delete_override(&self, workspace_id: &str, server_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .overrides
            .get_mut(workspace_id)
            .is_some_and(|m| m.remove(server_id).is_some());
        if removed {
            persist::save_json(&self.path, &*inner)?;
        }
        Ok(removed)
    }

    /// Resolve the profile a spawn of `(workspace, server)` runs under.
    pub async fn effective(&self, workspace_id: &str, server_id: &str) -> EffectiveProfile {
        let inner = self.inner.read().await;
        let base = inner.servers.get(server_id);
        let ws_override = inner
            .overrides
            .get(workspace_id)
            .and_then(|m| m.get(server_id));

        match (base, ws_override) {
            (None, None) => EffectiveProfile::Legacy,
            (base, ws_override) => {
                let mut profile = base.cloned().unwrap_or_default();
                if let Some(o) = ws_override {
                    if let Some(env) = &o.env {
                        profile.env = env.clone();
                    }
                    if let Some(context) = &o.context {
                        profile.context = context.clone();
                    }
                    if let Some(secrets) = &o.secrets {
                        profile.secrets = secrets.clone();
                    }
                }
                EffectiveProfile::Profile(profile)
            },
        }
    }

    /// Drop the profile and every override for a server.
    pub async fn remove_server(&self, server_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let mut changed = inner.servers.remove(server_id).is_some();
        for overrides in inner.overrides.values_mut() {
            changed |= overrides.remove(server_id).is_some();
        }
        if changed {
            persist::save_json(&self.path, &*inner)?;
        }
        Ok(())
    }

    /// Drop every override rooted at a workspace.
    pub async fn remove_workspace(&self, workspace_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.overrides.remove(workspace_id).is_some() {
            persist::save_json(&self.path, &*inner)?;
        }
        Ok(())
    }
}
