use serde::{Deserialize, Serialize};

/// State changes of a single managed server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerEventKind {
    Started,
    Stopped,
    Crashed,
    Updated,
    ConfigChanged,
}

/// Catalog-level changes (workspaces, server records, permission profiles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppEventKind {
    WorkspaceCreated,
    WorkspaceUpdated,
    WorkspaceDeleted,
    ProfileUpdated,
    ServerAdded,
    ServerDeleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    pub kind: ServerEventKind,
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub timestamp: u64,
    pub seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEvent {
    pub kind: AppEventKind,
    pub timestamp: u64,
    pub seq: u64,
    pub data: serde_json::Value,
}

/// Synthesized when a subscriber's mailbox overflowed and the oldest
/// frames were dropped. Carries the drop count so the subscriber can
/// decide to resync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpressureDrop {
    pub dropped: u64,
    pub timestamp: u64,
}

/// The wire envelope delivered to subscribers. The `type` tag is the frame
/// discriminator on the WebSocket stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusEvent {
    ServerEvent(ServerEvent),
    AppEvent(AppEvent),
    BackpressureDrop(BackpressureDrop),
}

impl BusEvent {
    #[must_use]
    pub fn dropped(count: u64) -> Self {
        Self::BackpressureDrop(BackpressureDrop {
            dropped: count,
            timestamp: mcphost_common::now_ms(),
        })
    }
}
