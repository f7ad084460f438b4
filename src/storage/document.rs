//! Whole-document JSON snapshots on disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Read a JSON document, treating a missing file as the default value.
///
/// An unreadable or unparsable document is an error: starting with an
/// empty store would silently drop every persisted relation.
pub(crate) async fn load<T>(path: &Path) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "Document not found, starting empty");
            return Ok(T::default());
        }
        Err(error) => {
            return Err(AppError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                error
            )));
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    serde_json::from_slice(&bytes).map_err(|error| {
        AppError::Storage(format!("Failed to parse {}: {}", path.display(), error))
    })
}

/// Atomically replace the document at `path` with `value`.
///
/// The snapshot is written to a temporary file in the same directory and
/// renamed over the target, so readers never observe a partial document.
pub(crate) async fn persist<T>(path: &Path, value: &T) -> Result<(), AppError>
where
    T: Serialize,
{
    let bytes = serde_json::to_vec_pretty(value)?;
    let path: PathBuf = path.to_path_buf();

    tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
        .await
        .map_err(|error| AppError::Internal(error.into()))?
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|error| {
        AppError::Storage(format!("Failed to create {}: {}", dir.display(), error))
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(|error| {
        AppError::Storage(format!("Failed to create temp file: {}", error))
    })?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|error| {
        AppError::Storage(format!(
            "Failed to replace {}: {}",
            path.display(),
            error.error
        ))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_missing_document_yields_default() {
        let dir = TempDir::new().unwrap();
        let loaded: BTreeMap<String, String> = load(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn persist_then_load_returns_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), "b".to_string());
        persist(&path, &doc).await.unwrap();

        let loaded: BTreeMap<String, String> = load(&path).await.unwrap();
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn load_rejects_corrupt_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result: Result<BTreeMap<String, String>, _> = load(&path).await;
        assert!(matches!(result, Err(AppError::Storage(_))));
    }
}
