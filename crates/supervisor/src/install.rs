//! Opaque package-fetch capability: shell out to npm to materialize a
//! server's package under its server root, and report the installed
//! version.

use std::path::Path;

use {tokio::process::Command, tracing::info};

use {
    mcphost_common::{Error, Result},
    mcphost_store::{InstallType, ServerRecord},
};

/// Install (or reinstall) a package-backed server under `server_root`.
/// Returns the version that ended up installed. Runner types (`npx`,
/// `pnpx`, `yarn`, `bunx`) and `local` servers need no installation.
pub async fn install_package(server: &ServerRecord, server_root: &Path) -> Result<Option<String>> {
    if server.install_type != InstallType::Npm {
        return Ok(None);
    }
    let name = server
        .package_name
        .as_deref()
        .ok_or_else(|| Error::invalid("server has no package name"))?;
    let spec = match server.package_version.as_deref() {
        Some(version) if !version.is_empty() => format!("{name}@{version}"),
        _ => format!("{name}@latest"),
    };

    let npm = which::which("npm")
        .map_err(|e| Error::SpawnFailed(format!("npm not found on PATH: {e}")))?;

    std::fs::create_dir_all(server_root)
        .map_err(|e| Error::persisted(format!("cannot create {}", server_root.display()), e))?;

    info!(package = %spec, root = %server_root.display(), "installing package");
    let output = Command::new(npm)
        .args(["install", "--no-save", "--prefix"])
        .arg(server_root)
        .arg(&spec)
        .output()
        .await
        .map_err(|e| Error::SpawnFailed(format!("failed to run npm install: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::SpawnFailed(format!(
            "npm install {spec} failed: {}",
            stderr.trim()
        )));
    }

    Ok(installed_version(server_root, name))
}

/// Read the installed version from the package's manifest.
fn installed_version(server_root: &Path, package: &str) -> Option<String> {
    let manifest = server_root
        .join("node_modules")
        .join(package)
        .join("package.json");
    let data = std::fs::read_to_string(manifest).ok()?;
    let value: serde_json::Value = serde_json::from_str(&data).ok()?;
    value["version"].as_str().map(ToString::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn installed_version_reads_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("node_modules").join("mcp-files");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(
            pkg_dir.join("package.json"),
            r#"{"name": "mcp-files", "version": "3.2.1"}"#,
        )
        .unwrap();

        assert_eq!(
            installed_version(dir.path(), "mcp-files").as_deref(),
            Some("3.2.1")
        );
        assert!(installed_version(dir.path(), "absent").is_none());
    }
}
