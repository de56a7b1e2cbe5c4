//! Load/save discipline shared by every persisted store: read the whole
//! file into memory at construction, write through on every mutation with
//! atomic replace (write to a temp file in the same directory, fsync,
//! rename over the target).

use std::{io::Write, path::Path};

use {
    serde::{Serialize, de::DeserializeOwned},
    tracing::debug,
};

use mcphost_common::{Error, Result};

/// Load a store file, or return the default when it does not exist yet.
pub(crate) fn load_json<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        debug!(path = %path.display(), "store file not found, starting empty");
        return Ok(T::default());
    }
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::persisted(format!("failed to read {}", path.display()), e))?;
    serde_json::from_str(&data).map_err(|e| Error::Persisted {
        message: format!("failed to parse {}: {e}", path.display()),
        source: None,
    })
}

/// Atomically replace the store file with the serialized value.
pub(crate) fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| Error::persisted(format!("failed to create {}", parent.display()), e))?;

    let data = serde_json::to_string_pretty(value).map_err(|e| Error::Persisted {
        message: format!("failed to serialize {}: {e}", path.display()),
        source: None,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| Error::persisted(format!("failed to create temp file in {}", parent.display()), e))?;
    tmp.write_all(data.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::persisted(format!("failed to write {}", path.display()), e))?;
    tmp.persist(path)
        .map_err(|e| Error::persisted(format!("failed to replace {}", path.display()), e.error))?;
    Ok(())
}
