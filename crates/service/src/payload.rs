use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to write payload {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to delete payload {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid payload key: {0}")]
    InvalidKey(String),
}

/// Durable home for raw submission payloads
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Persist `payload` under the relative `key`, returning a path the
    /// record can reference.
    ///
    /// Every call writes a fresh file, so concurrent stores of one key never
    /// collide and never replace each other.
    async fn store(&self, key: &str, payload: &[u8]) -> Result<String, PayloadError>;

    /// Remove a payload previously returned by [`PayloadStore::store`]
    async fn delete(&self, path: &str) -> Result<(), PayloadError>;
}

/// Payloads as JSON files under `<base>/<key>.<attempt>.json`
#[derive(Debug, Clone)]
pub struct FilePayloadStore {
    base: PathBuf,
}

impl FilePayloadStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PayloadError> {
        let is_relative_name = !key.is_empty()
            && !key.ends_with('/')
            && !key.contains('\\')
            && Path::new(key)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_relative_name {
            return Err(PayloadError::InvalidKey(key.to_string()));
        }

        let attempt = Uuid::new_v4().simple();
        Ok(self.base.join(format!("{key}.{attempt}.json")))
    }
}

async fn write_all(file: &mut fs::File, payload: &[u8]) -> std::io::Result<()> {
    file.write_all(payload).await?;
    file.sync_all().await
}

#[async_trait]
impl PayloadStore for FilePayloadStore {
    async fn store(&self, key: &str, payload: &[u8]) -> Result<String, PayloadError> {
        let path = self.path_for(key)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| PayloadError::Write {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| PayloadError::Write {
                path: path.clone(),
                source,
            })?;

        if let Err(source) = write_all(&mut file, payload).await {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(PayloadError::Write { path, source });
        }

        debug!(key = %key, path = %path.display(), bytes = payload.len(), "Stored payload");

        Ok(path.to_string_lossy().into_owned())
    }

    async fn delete(&self, path: &str) -> Result<(), PayloadError> {
        fs::remove_file(path)
            .await
            .map_err(|source| PayloadError::Delete {
                path: PathBuf::from(path),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "2026/February/abc";

    #[tokio::test]
    async fn test_store_writes_under_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePayloadStore::new(dir.path());

        let path = PathBuf::from(store.store(KEY, br#"{"data":[]}"#).await.unwrap());

        assert_eq!(path.parent(), Some(dir.path().join("2026").join("February").as_path()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("abc."), "{name}");
        assert!(name.ends_with(".json"), "{name}");
        assert_eq!(std::fs::read(&path).unwrap(), br#"{"data":[]}"#);
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePayloadStore::new(dir.path());
        let path = store.store(KEY, b"{}").await.unwrap();

        store.delete(&path).await.unwrap();

        assert!(!Path::new(&path).exists());
        assert!(matches!(
            store.delete(&path).await,
            Err(PayloadError::Delete { .. })
        ));
    }

    #[tokio::test]
    async fn test_same_key_gets_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePayloadStore::new(dir.path());

        let (first, second) = tokio::join!(store.store(KEY, b"first"), store.store(KEY, b"second"));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");

        store.delete(&second).await.unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_rejects_keys_escaping_base() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePayloadStore::new(dir.path());

        for key in ["", "..", "/etc/abc", "2026/../abc", "./abc", "2026/", "..\\x"] {
            assert!(
                matches!(store.store(key, b"{}").await, Err(PayloadError::InvalidKey(_))),
                "{key}"
            );
        }
    }
}
