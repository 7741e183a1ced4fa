//! Completion notification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::AudioPair;

/// Notification delivery failures.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Completion hook answered HTTP {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Body of the completion notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub song_request_id: String,
    pub audio_pair_list: Vec<AudioPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

/// Tells the requester that renders are available.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payload: &CompletionPayload) -> Result<(), NotifyError>;
}

/// JSON POST to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, payload: &CompletionPayload) -> Result<(), NotifyError> {
        tracing::info!(
            "Notifying {} for request {} ({} pairs)",
            self.url,
            payload.song_request_id,
            payload.audio_pair_list.len()
        );
        let response = self.client.post(&self.url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_server::serve_once;

    fn payload() -> CompletionPayload {
        CompletionPayload {
            song_request_id: "r1".to_string(),
            audio_pair_list: vec![AudioPair {
                track_index: 1,
                pitch_offset: 0,
                mr_url: "https://bucket/song-requests/r1/[0]1_mr.mp3".to_string(),
                vocal_url: "https://bucket/song-requests/r1/[0]reverb1.mp3".to_string(),
                result_url: "https://bucket/song-requests/r1/[0]1_result.mp3".to_string(),
            }],
            song_title: None,
            requested_by: None,
        }
    }

    #[tokio::test]
    async fn posts_camel_case_json() {
        let (base, server) = serve_once(200, "{}").await;
        WebhookNotifier::new(reqwest::Client::new(), format!("{}/hook", base))
            .notify(&payload())
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("\"songRequestId\":\"r1\""));
        assert!(request.contains("\"audioPairList\""));
        assert!(request.contains("\"mrUrl\""));
        assert!(!request.contains("songTitle"));
    }

    #[tokio::test]
    async fn failing_hook_is_reported() {
        let (base, _server) = serve_once(500, "").await;
        let err = WebhookNotifier::new(reqwest::Client::new(), base)
            .notify(&payload())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status(500)));
    }
}
