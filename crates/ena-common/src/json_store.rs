//! JSON document persistence
//!
//! Whole-document load/save for state files such as the undo history. Saves
//! go through a sibling temp file and a rename so readers never observe a
//! half-written document.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// JSON store errors
#[derive(Debug, Error)]
pub enum JsonStoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("File not found: {path}")]
    NotFound { path: PathBuf },
}

/// Result type for JSON store operations
pub type JsonStoreResult<T> = Result<T, JsonStoreError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> JsonStoreError + '_ {
    move |source| JsonStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load a JSON document, failing with `NotFound` when the file is absent
pub fn load_json<T, P>(path: P) -> JsonStoreResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(JsonStoreError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(io_err(path)(e)),
    };

    serde_json::from_slice(&content).map_err(|source| JsonStoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a JSON document, returning `T::default()` if the file doesn't exist
///
/// A file that exists but does not parse is still an error; silently
/// replacing it with an empty document would lose data on the next save.
pub fn load_json_or_default<T, P>(path: P) -> JsonStoreResult<T>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    match load_json(path) {
        Ok(value) => Ok(value),
        Err(JsonStoreError::NotFound { .. }) => Ok(T::default()),
        Err(e) => Err(e),
    }
}

/// Serialize `value` and replace the document at `path` atomically
pub fn save_json_atomic<T, P>(path: P, value: &T) -> JsonStoreResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let content = serde_json::to_vec_pretty(value).map_err(JsonStoreError::Serialize)?;

    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    std::fs::write(&temp_path, &content).map_err(io_err(&temp_path))?;
    std::fs::rename(&temp_path, path).map_err(io_err(path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
    struct Ledger {
        name: String,
        entries: Vec<u32>,
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let ledger = Ledger {
            name: "history".to_string(),
            entries: vec![1, 2, 3],
        };

        save_json_atomic(&path, &ledger).unwrap();
        let loaded: Ledger = load_json(&path).unwrap();

        assert_eq!(ledger, loaded);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let ledger: Ledger = load_json_or_default(&path).unwrap();
        assert_eq!(ledger, Ledger::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: JsonStoreResult<Ledger> = load_json_or_default(&path);
        assert!(matches!(result, Err(JsonStoreError::Malformed { .. })));
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");

        save_json_atomic(&path, &Ledger::default()).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("nested").join("ledger.json.tmp").exists());
    }
}
