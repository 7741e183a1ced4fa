//! Durable storage for published renders.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Upload failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Failed to store {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Upload of {key} rejected with HTTP {status}")]
    Status { key: String, status: u16 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Stores bytes at a key. Putting the same key twice overwrites.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, local_path: &Path, key: &str) -> Result<(), StoreError>;

    /// Where a stored key can be fetched from.
    fn url_for(&self, key: &str) -> String;
}

/// Keys are relative, slash separated and never climb out of the bucket.
fn check_key(key: &str) -> Result<(), StoreError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// A directory acting as the bucket.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path of a key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, local_path: &Path, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        let dest = self.path_for(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        // Write next to the target, then rename over it
        let mut temp_name = dest.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".partial");
        let temp_path = dest.with_file_name(temp_name);

        tokio::fs::copy(local_path, &temp_path)
            .await
            .map_err(io_err)?;
        tokio::fs::rename(&temp_path, &dest).await.map_err(io_err)?;

        tracing::debug!("Stored {} at {}", local_path.display(), dest.display());
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        self.path_for(key).to_string_lossy().into_owned()
    }
}

/// HTTP PUT to `<base_url>/<key>`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, local_path: &Path, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        let body = tokio::fs::read(local_path).await.map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;

        let response = self.client.put(self.url_for(key)).body(body).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status {
                key: key.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_server::serve_once;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_put_is_idempotent() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("[0]1_result.mp3");
        std::fs::write(&src, b"mix").unwrap();
        let store = LocalObjectStore::new(dir.path().join("bucket"));
        let key = "song-requests/r1/[0]1_result.mp3";

        store.put(&src, key).await.unwrap();
        store.put(&src, key).await.unwrap();

        assert_eq!(std::fs::read(store.path_for(key)).unwrap(), b"mix");
        let entries: Vec<_> = std::fs::read_dir(store.path_for("song-requests/r1"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        for key in ["", "../x.mp3", "/abs.mp3", "./x.mp3", "a/../../b"] {
            assert!(
                matches!(
                    store.put(Path::new("unused"), key).await,
                    Err(StoreError::InvalidKey(_))
                ),
                "{key}"
            );
        }
    }

    #[tokio::test]
    async fn http_put_sends_file_body() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.mp3");
        std::fs::write(&src, b"payload").unwrap();
        let (base, server) = serve_once(200, "").await;

        let store = HttpObjectStore::new(reqwest::Client::new(), format!("{}/", base));
        store.put(&src, "song-requests/r1/a.mp3").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /song-requests/r1/a.mp3"));
        assert!(request.ends_with("payload"));
    }

    #[tokio::test]
    async fn http_put_reports_status() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.mp3");
        std::fs::write(&src, b"payload").unwrap();
        let (base, _server) = serve_once(403, "").await;

        let err = HttpObjectStore::new(reqwest::Client::new(), base)
            .put(&src, "k/a.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 403, .. }));
    }
}
