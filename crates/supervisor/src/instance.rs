//! Instance identity, status, and the serializable snapshot handed to the
//! API layer.

use serde::{Deserialize, Serialize};

/// Identity of a live instance: one per `(server, workspace)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub server_id: String,
    pub workspace_id: String,
}

impl InstanceKey {
    #[must_use]
    pub fn new(server_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            workspace_id: workspace_id.into(),
        }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.server_id, self.workspace_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

/// Metadata fetched from a server's `/metadata` endpoint once it is ready.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadata {
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
    #[serde(default)]
    pub resources: Vec<serde_json::Value>,
    #[serde(default)]
    pub prompts: Vec<serde_json::Value>,
    /// Declared auth requirements, passed through opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<serde_json::Value>,
}

/// Point-in-time view of an instance, safe to serialize into API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub server_id: String,
    pub workspace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub port: u16,
    pub status: InstanceStatus,
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ready_at: Option<u64>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InstanceMetadata>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(InstanceStatus::Starting).unwrap(),
            "starting"
        );
        assert_eq!(
            serde_json::to_value(InstanceStatus::Error).unwrap(),
            "error"
        );
    }

    #[test]
    fn key_display_is_server_slash_workspace() {
        let key = InstanceKey::new("srv", "ws");
        assert_eq!(key.to_string(), "srv/ws");
    }
}
