//! All-or-nothing file writes and the persisted model registry.
//!
//! Every write lands in a temporary file next to the destination and is
//! renamed over it only once fully flushed, so a crash or a failed
//! serialisation leaves the previous file untouched.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{GraphoneError, Result};
use crate::model::Bidir;

/// Closed set of persisted model topologies, resolved by the `kind` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelState {
    Bidirectional(Bidir),
}

impl From<Bidir> for ModelState {
    fn from(model: Bidir) -> Self {
        Self::Bidirectional(model)
    }
}

impl ModelState {
    pub fn into_bidir(self) -> Bidir {
        match self {
            Self::Bidirectional(model) => model,
        }
    }
}

/// Replace `path` with `bytes` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| {
        GraphoneError::Checkpoint(format!("failed to replace {}: {}", path.display(), e.error))
    })?;
    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| GraphoneError::Checkpoint(format!("serialise {}: {e}", path.display())))?;
    write_atomic(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)
        .map_err(|e| GraphoneError::Checkpoint(format!("read {}: {e}", path.display())))?;
    serde_json::from_slice(&raw)
        .map_err(|e| GraphoneError::Checkpoint(format!("parse {}: {e}", path.display())))
}
