use thiserror::Error as ThisError;

/// Domain error for the host. Every variant maps to a stable `code` token
/// that API clients can branch on; the message is for display only.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("invalid secret name: {0}")]
    InvalidSecretName(String),

    #[error("server '{server_id}' is disabled for workspace '{workspace_id}'")]
    ServerDisabledForWorkspace {
        server_id: String,
        workspace_id: String,
    },

    #[error("{0}")]
    PortExhausted(String),

    #[error("{0}")]
    SpawnFailed(String),

    #[error("{0}")]
    ReadinessTimeout(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("{0}")]
    InstanceBusy(String),

    #[error("{message}")]
    Persisted {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// The stable token for this error kind. These are part of the API
    /// contract; clients branch on the token, never on the message.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::InvalidSecretName(_) => "InvalidSecretName",
            Self::ServerDisabledForWorkspace { .. } => "ServerDisabledForWorkspace",
            Self::PortExhausted(_) => "PortExhausted",
            Self::SpawnFailed(_) => "SpawnFailed",
            Self::ReadinessTimeout(_) => "ReadinessTimeout",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Self::InstanceBusy(_) => "InstanceBusy",
            Self::Persisted { .. } => "Persisted",
            Self::Internal(_) => "Internal",
        }
    }

    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    #[must_use]
    pub fn persisted(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persisted {
            message: message.into(),
            source: Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
