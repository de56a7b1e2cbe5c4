//! Layered secret storage.
//!
//! Secrets live at one of three scopes; resolution for a spawn merges
//! global, then workspace, then server values, later scopes winning.
//! Names are normalized to uppercase with a `SECRET_` prefix before
//! persistence. Values are opaque and never logged.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::info,
};

use mcphost_common::{Error, Result};

use crate::{persist, workspaces::GLOBAL_WORKSPACE};

/// Where a secret is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global,
    Workspace(String),
    Server {
        workspace_id: String,
        server_id: String,
    },
}

const SECRET_PREFIX: &str = "SECRET_";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SecretsFile {
    #[serde(default)]
    global: BTreeMap<String, String>,
    /// workspaceId → name → value.
    #[serde(default)]
    workspaces: BTreeMap<String, BTreeMap<String, String>>,
    /// workspaceId → serverId → name → value.
    #[serde(default)]
    servers: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

/// Persisted layered secret map.
pub struct SecretStore {
    path: PathBuf,
    inner: RwLock<SecretsFile>,
}

/// Normalize a secret name: validate the character set, uppercase, and add
/// the `SECRET_` prefix when missing.
pub fn normalize_name(name: &str) -> Result<String> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidSecretName(format!(
            "'{name}' (allowed: letters, digits, '_', '-')"
        )));
    }
    let upper = name.to_ascii_uppercase();
    if upper.starts_with(SECRET_PREFIX) {
        Ok(upper)
    } else {
        Ok(format!("{SECRET_PREFIX}{upper}"))
    }
}

impl SecretStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file: SecretsFile = persist::load_json(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(file),
        })
    }

    fn validate_scope(scope: &Scope) -> Result<()> {
        match scope {
            Scope::Workspace(ws) if ws == GLOBAL_WORKSPACE => Err(Error::invalid(
                "use the global scope for global secrets, not workspace 'global'",
            )),
            _ => Ok(()),
        }
    }

    /// Store a secret. The returned string is the normalized name.
    pub async fn set(&self, scope: Scope, name: &str, value: String) -> Result<String> {
        Self::validate_scope(&scope)?;
        let name = normalize_name(name)?;
        let mut inner = self.inner.write().await;
        match &scope {
            Scope::Global => {
                inner.global.insert(name.clone(), value);
            },
            Scope::Workspace(ws) => {
                inner
                    .workspaces
                    .entry(ws.clone())
                    .or_default()
                    .insert(name.clone(), value);
            },
            Scope::Server {
                workspace_id,
                server_id,
            } => {
                inner
                    .servers
                    .entry(workspace_id.clone())
                    .or_default()
                    .entry(server_id.clone())
                    .or_default()
                    .insert(name.clone(), value);
            },
        }
        persist::save_json(&self.path, &*inner)?;
        info!(secret = %name, "stored secret");
        Ok(name)
    }

    /// Delete a secret. Idempotent; returns whether anything was removed.
    pub async fn delete(&self, scope: Scope, name: &str) -> Result<bool> {
        Self::validate_scope(&scope)?;
        let name = normalize_name(name)?;
        let mut inner = self.inner.write().await;
        let removed = match &scope {
            Scope::Global => inner.global.remove(&name).is_some(),
            Scope::Workspace(ws) => inner
                .workspaces
                .get_mut(ws)
                .is_some_and(|m| m.remove(&name).is_some()),
            Scope::Server {
                workspace_id,
                server_id,
            } => inner
                .servers
                .get_mut(workspace_id)
                .and_then(|m| m.get_mut(server_id))
                .is_some_and(|m| m.remove(&name).is_some()),
        };
        if removed {
            persist::save_json(&self.path, &*inner)?;
        }
        Ok(removed)
    }

    /// Names stored at one scope. Values are deliberately not listed.
    pub async fn names(&self, scope: &Scope) -> Vec<String> {
        let inner = self.inner.read().await;
        match scope {
            Scope::Global => inner.global.keys().cloned().collect(),
            Scope::Workspace(ws) => inner
                .workspaces
                .get(ws)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default(),
            Scope::Server {
                workspace_id,
                server_id,
            } => inner
                .servers
                .get(workspace_id)
                .and_then(|m| m.get(server_id))
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// The merged secret map seen by a spawn of `(workspace, server)`:
    /// global, overlaid by workspace, overlaid by server scope.
    pub async fn effective(&self, workspace_id: &str, server_id: &str) -> HashMap<String, String> {
        let inner = self.inner.read().await;
        let mut merged: HashMap<String, String> = inner
            .global
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if workspace_id != GLOBAL_WORKSPACE
            && let Some(ws) = inner.workspaces.get(workspace_id)
        {
            for (k, v) in ws {
                merged.insert(k.clone(), v.clone());
            }
        }
        if let Some(server) = inner
            .servers
            .get(workspace_id)
            .and_then(|m| m.get(server_id))
        {
            for (k, v) in server {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Drop every secret scoped to a server, across all workspaces.
    pub async fn remove_server(&self, server_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let mut changed = false;
        for servers in inner.servers.values_mut() {
            changed |= servers.remove(server_id).is_some();
        }
        if changed {
            persist::save_json(&self.path, &*inner)?;
            info!(server = %server_id, "removed server-scoped secrets");
        }
        Ok(())
    }

    /// Drop every workspace- and server-scoped secret rooted at a workspace.
    pub async fn remove_workspace(&self, workspace_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let changed = inner.workspaces.remove(workspace_id).is_some()
            | inner.servers.remove(workspace_id).is_some();
        if changed {
            persist::save_json(&self.path, &*inner)?;
            info!(workspace = %workspace_id, "removed workspace-scoped secrets");
        }
        Ok(())
    }
}
