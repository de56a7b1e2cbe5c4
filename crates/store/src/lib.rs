//! Persisted catalogs (servers, workspaces, secrets, permissions, user
//! profile) and the in-memory session store.
//!
//! Every persisted store is a JSON file under the host data directory,
//! loaded into an in-memory map behind a reader-writer lock and written
//! through with atomic replace. Stores know nothing of the supervisor or
//! gateway; dependencies point strictly downward.

mod persist;

pub mod permissions;
pub mod profile;
pub mod secrets;
pub mod servers;
pub mod sessions;
pub mod workspaces;

pub use {
    permissions::{
        ContextPermissions, EffectiveProfile, EnvPermissions, PermissionOverride,
        PermissionProfile, PermissionStore, SecretMode, SecretPermissions,
    },
    profile::{ProfileStore, UserProfile},
    secrets::{Scope, SecretStore},
    servers::{InstallType, NewServer, ServerPatch, ServerRecord, ServerStore},
    sessions::{ExpiredSession, SessionStore},
    workspaces::{
        GLOBAL_WORKSPACE, NewWorkspace, ServerConfigPatch, Workspace, WorkspacePatch,
        WorkspaceServerConfig, WorkspaceStore,
    },
};
