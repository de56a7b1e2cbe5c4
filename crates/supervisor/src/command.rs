//! Child command construction per install type.
//!
//! `local` and `npm` servers resolve their entry point from the package's
//! `package.json` and run under the node runtime; the runner types
//! delegate resolution to the corresponding package runner.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use {
    mcphost_common::{Error, Result},
    mcphost_store::{InstallType, ServerRecord},
};

/// A fully resolved spawn request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    bin: Option<serde_json::Value>,
}

impl PackageManifest {
    /// `main`, else the first `bin` entry (string or map form).
    fn entry(&self) -> Option<String> {
        if let Some(main) = &self.main {
            return Some(main.clone());
        }
        match &self.bin {
            Some(serde_json::Value::String(path)) => Some(path.clone()),
            Some(serde_json::Value::Object(map)) => map
                .values()
                .find_map(|v| v.as_str().map(ToString::to_string)),
            _ => None,
        }
    }
}

fn read_manifest(package_dir: &Path) -> Result<PackageManifest> {
    let manifest_path = package_dir.join("package.json");
    let data = std::fs::read_to_string(&manifest_path).map_err(|e| {
        Error::SpawnFailed(format!("cannot read {}: {e}", manifest_path.display()))
    })?;
    serde_json::from_str(&data).map_err(|e| {
        Error::SpawnFailed(format!("cannot parse {}: {e}", manifest_path.display()))
    })
}

fn package_spec(server: &ServerRecord) -> Result<String> {
    let name = server
        .package_name
        .as_deref()
        .ok_or_else(|| Error::SpawnFailed(format!("server '{}' has no package name", server.id)))?;
    Ok(match server.package_version.as_deref() {
        Some(version) if !version.is_empty() && version != "latest" => {
            format!("{name}@{version}")
        },
        _ => name.to_string(),
    })
}

/// Resolve the command line for a server. `server_root` is where installed
/// packages live for `npm`-type servers.
pub fn build(server: &ServerRecord, server_root: &Path) -> Result<ChildCommand> {
    match server.install_type {
        InstallType::Local => {
            let dir = server.local_path.clone().ok_or_else(|| {
                Error::SpawnFailed(format!("server '{}' has no local path", server.id))
            })?;
            let entry = match &server.entry_point {
                Some(entry) => entry.clone(),
                None => read_manifest(&dir)?.entry().ok_or_else(|| {
                    Error::SpawnFailed(format!(
                        "package.json in {} declares no main or bin",
                        dir.display()
                    ))
                })?,
            };
            Ok(ChildCommand {
                program: "node".into(),
                args: vec![entry],
                cwd: dir,
            })
        },
        InstallType::Npm => {
            let name = server.package_name.as_deref().ok_or_else(|| {
                Error::SpawnFailed(format!("server '{}' has no package name", server.id))
            })?;
            let package_dir = server_root.join("node_modules").join(name);
            let entry = match &server.entry_point {
                Some(entry) => entry.clone(),
                None => read_manifest(&package_dir)?.entry().ok_or_else(|| {
                    Error::SpawnFailed(format!(
                        "installed package '{name}' declares no main or bin"
                    ))
                })?,
            };
            Ok(ChildCommand {
                program: "node".into(),
                args: vec![package_dir.join(entry).to_string_lossy().into_owned()],
                cwd: server_root.to_path_buf(),
            })
        },
        InstallType::Npx => Ok(ChildCommand {
            program: "npx".into(),
            args: vec!["-y".into(), package_spec(server)?],
            cwd: server_root.to_path_buf(),
        }),
        InstallType::Pnpx => Ok(ChildCommand {
            program: "pnpx".into(),
            args: vec![package_spec(server)?],
            cwd: server_root.to_path_buf(),
        }),
        InstallType::Yarn => Ok(ChildCommand {
            program: "yarn".into(),
            args: vec!["dlx".into(), package_spec(server)?],
            cwd: server_root.to_path_buf(),
        }),
        InstallType::Bunx => Ok(ChildCommand {
            program: "bunx".into(),
            args: vec![package_spec(server)?],
            cwd: server_root.to_path_buf(),
        }),
    }
}
