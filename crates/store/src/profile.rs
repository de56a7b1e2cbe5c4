//! Local user identity, injected into child environments when a profile
//! permission allows it.

use std::path::{Path, PathBuf};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
};

use mcphost_common::Result;

use crate::persist;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub full_name: String,
    pub email: String,
}

impl UserProfile {
    /// Compact encoding handed to children as `MCP_AUTH_TOKEN`.
    #[must_use]
    pub fn auth_token(&self) -> String {
        serde_json::json!({
            "fullName": self.full_name,
            "email": self.email,
        })
        .to_string()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profile: Option<UserProfile>,
}

/// Persisted single-user profile.
pub struct ProfileStore {
    path: PathBuf,
    inner: RwLock<ProfileFile>,
}

impl ProfileStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file: ProfileFile = persist::load_json(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(file),
        })
    }

    pub async fn get(&self) -> Option<UserProfile> {
        self.inner.read().await.profile.clone()
    }

    pub async fn set(&self, profile: UserProfile) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.profile = Some(profile);
        persist::save_json(&self.path, &*inner)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.profile = None;
        persist::save_json(&self.path, &*inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");

        let store = ProfileStore::open(&path).unwrap();
        assert!(store.get().await.is_none());

        store
            .set(UserProfile {
                full_name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
            })
            .await
            .unwrap();

        let reloaded = ProfileStore::open(&path).unwrap();
        let profile = reloaded.get().await.unwrap();
        assert_eq!(profile.email, "ada@example.com");

        store.clear().await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[test]
    fn auth_token_is_compact_json() {
        let profile = UserProfile {
            full_name: "Ada".into(),
            email: "ada@example.com".into(),
        };
        let token: serde_json::Value = serde_json::from_str(&profile.auth_token()).unwrap();
        assert_eq!(token["fullName"], "Ada");
        assert_eq!(token["email"], "ada@example.com");
    }
}
