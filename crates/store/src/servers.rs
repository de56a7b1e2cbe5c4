//! Persisted catalog of server templates.

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

/// How a server's package is obtained and launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallType {
    Npm,
    Npx,
    Pnpx,
    Yarn,
    Bunx,
    Local,
}

impl InstallType {
    /// Whether this install type refers to a published package (as opposed
    /// to a local checkout).
    #[must_use]
    pub fn is_package(self) -> bool {
        !matches!(self, Self::Local)
    }
}

/// A server template: everything needed to spawn instances of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub install_type: InstallType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Template-level configuration, merged under per-workspace overrides.
    #[serde(default)]
    pub default_config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,
    /// Context-header names the server declares; the gateway injects
    /// `X-MCP-CTX-{name}` for each on proxied requests.
    #[serde(default)]
    pub context_headers: Vec<String>,
    #[serde(default)]
    pub tool_count: u32,
    #[serde(default)]
    pub resource_count: u32,
    #[serde(default)]
    pub prompt_count: u32,
    /// Latest published version seen by the update check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Input for the add-server flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServer {
    #[serde(default)]
    pub name: Option<String>,
    pub install_type: InstallType,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub package_version: Option<String>,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub default_config: Option<serde_json::Value>,
}

/// Fields the update endpoint may change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPatch {
    pub name: Option<String>,
    pub default_config: Option<serde_json::Value>,
    pub config_schema: Option<serde_json::Value>,
    pub context_headers: Option<Vec<String>>,
    pub entry_point: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: HashMap<String, ServerRecord>,
}

/// Persisted server catalog.
pub struct ServerStore {
    path: PathBuf,
    inner: RwLock<ServersFile>,
}

impl ServerStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file: ServersFile = persist::load_json(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(file),
        })
    }

    pub async fn list(&self) -> Vec<ServerRecord> {
        let inner = self.inner.read().await;
        let mut servers: Vec<_> = inner.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    pub async fn get(&self, id: &str) -> Option<ServerRecord> {
        self.inner.read().await.servers.get(id).cloned()
    }

    pub async fn require(&self, id: &str) -> Result<ServerRecord> {
        self.get(id)
            .await
            .ok_or_else(|| Error::not_found(format!("server '{id}' not found")))
    }

    /// Create a server record from the add-server input.
    pub async fn create(&self, input: NewServer) -> Result<ServerRecord> {
        match input.install_type {
            InstallType::Local => {
                let path = input
                    .local_path
                    .as_ref()
                    .ok_or_else(|| Error::invalid("localPath is required for install type 'local'"))?;
                if !path.is_absolute() {
                    return Err(Error::invalid("localPath must be absolute"));
                }
            },
            _ => {
                if input.package_name.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::invalid("packageName is required"));
                }
            },
        }

        let now = now_ms();
        let name = input
            .name
            .clone()
            .or_else(|| input.package_name.clone())
            .or_else(|| {
                input
                    .local_path
                    .as_ref()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            })
            .unwrap_or_else(|| "server".into());

        let record = ServerRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            install_type: input.install_type,
            package_name: input.package_name,
            package_version: input.package_version,
            local_path: input.local_path,
            entry_point: input.entry_point,
            default_config: input
                .default_config
                .unwrap_or_else(|| serde_json::json!({})),
            config_schema: None,
            context_headers: Vec::new(),
            tool_count: 0,
            resource_count: 0,
            prompt_count: 0,
            latest_version: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.servers.insert(record.id.clone(), record.clone());
        persist::save_json(&self.path, &*inner)?;
        info!(server = %record.id, name = %record.name, "added server");
        Ok(record)
    }

    pub async fn update(&self, id: &str, patch: ServerPatch) -> Result<ServerRecord> {
        let mut inner = self.inner.write().await;
        let record = inner
            .servers
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("server '{id}' not found")))?;

        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(config) = patch.default_config {
            record.default_config = config;
        }
        if let Some(schema) = patch.config_schema {
            record.config_schema = Some(schema);
        }
        if let Some(headers) = patch.context_headers {
            record.context_headers = headers;
        }
        if let Some(entry) = patch.entry_point {
            record.entry_point = Some(entry);
        }
        record.updated_at = now_ms();

        let updated = record.clone();
        persist::save_json(&self.path, &*inner)?;
        Ok(updated)
    }

    /// Record a newly installed version.
    pub async fn set_version(&self, id: &str, version: &str) -> Result<ServerRecord> {
        let mut inner = self.inner.write().await;
        let record = inner
            .servers
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("server '{id}' not found")))?;
        record.package_version = Some(version.to_string());
        record.updated_at = now_ms();
        let updated = record.clone();
        persist::save_json(&self.path, &*inner)?;
        Ok(updated)
    }

    /// Cache the latest published version seen by the update check.
    pub async fn set_latest_version(&self, id: &str, version: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .servers
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("server '{id}' not found")))?;
        record.latest_version = Some(version.to_string());
        persist::save_json(&self.path, &*inner)
    }

    /// Cache counts from an instance's fetched metadata.
    pub async fn set_counts(&self, id: &str, tools: u32, resources: u32, prompts: u32) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.servers.get_mut(id) else {
            return Ok(());
        };
        record.tool_count = tools;
        record.resource_count = resources;
        record.prompt_count = prompts;
        persist::save_json(&self.path, &*inner)
    }

    /// Remove a server record. Idempotent.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.servers.remove(id).is_some();
        if removed {
            persist::save_json(&self.path, &*inner)?;
            info!(server = %id, "deleted server");
        }
        Ok(removed)
    }
}
