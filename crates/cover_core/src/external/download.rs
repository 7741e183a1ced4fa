//! Fetching the source takes.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Source download failures.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Failed to download file: {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Retrieves a source take to a local file.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` to `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}

/// Plain HTTP(S) GET.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        tracing::info!("Downloading {}", url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Stream into a side file so a broken transfer never leaves a
        // truncated source behind.
        let partial = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    tokio::fs::remove_file(&partial).await.ok();
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&partial, dest).await?;
        tracing::debug!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_server::serve_once;
    use tempfile::tempdir;

    #[tokio::test]
    async fn downloads_body_to_destination() {
        let (base, server) = serve_once(200, "mp3-bytes").await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("src").join("source_1.mp3");

        let fetcher = HttpFetcher::new(reqwest::Client::new());
        let written = fetcher
            .fetch(&format!("{}/song.mp3", base), &dest)
            .await
            .unwrap();

        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&dest).unwrap(), b"mp3-bytes");
        assert!(!dest.with_extension("part").exists());
        assert!(server.await.unwrap().starts_with("GET /song.mp3"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base, _server) = serve_once(404, "").await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("source_1.mp3");

        let err = HttpFetcher::new(reqwest::Client::new())
            .fetch(&format!("{}/missing.mp3", base), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Status(404)));
        assert_eq!(err.to_string(), "Failed to download file: 404");
        assert!(!dest.exists());
    }
}
