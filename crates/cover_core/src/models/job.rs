//! Song request and per-track working state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of alternate takes every song request carries.
pub const TRACK_COUNT: usize = 2;

/// Reasons a song request is rejected at intake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("request id must not be empty")]
    EmptyRequestId,

    #[error("voice model id must not be empty")]
    EmptyVoiceModel,

    #[error("expected {expected} source URLs, got {found}")]
    SourceCount { expected: usize, found: usize },

    #[error("source URL {index} is empty")]
    EmptySource { index: usize },

    #[error("at least one pitch offset is required")]
    NoPitchOffsets,
}

/// Opaque request details forwarded to the completion notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

/// One song request: two source takes rendered with one voice model.
///
/// Validated on construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    request_id: String,
    voice_model_id: String,
    source_urls: Vec<String>,
    pitch_offsets: Vec<i32>,
    metadata: JobMetadata,
}

impl Job {
    /// Build a validated job.
    pub fn new(
        request_id: impl Into<String>,
        voice_model_id: impl Into<String>,
        source_urls: Vec<String>,
        pitch_offsets: Vec<i32>,
    ) -> Result<Self, JobError> {
        let request_id = request_id.into().trim().to_string();
        let voice_model_id = voice_model_id.into().trim().to_string();

        if request_id.is_empty() {
            return Err(JobError::EmptyRequestId);
        }
        if voice_model_id.is_empty() {
            return Err(JobError::EmptyVoiceModel);
        }
        if source_urls.len() != TRACK_COUNT {
            return Err(JobError::SourceCount {
                expected: TRACK_COUNT,
                found: source_urls.len(),
            });
        }
        if let Some(index) = source_urls.iter().position(|url| url.trim().is_empty()) {
            return Err(JobError::EmptySource { index: index + 1 });
        }
        if pitch_offsets.is_empty() {
            return Err(JobError::NoPitchOffsets);
        }

        Ok(Self {
            request_id,
            voice_model_id,
            source_urls,
            pitch_offsets,
            metadata: JobMetadata::default(),
        })
    }

    /// Attach notification metadata.
    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn voice_model_id(&self) -> &str {
        &self.voice_model_id
    }

    pub fn source_urls(&self) -> &[String] {
        &self.source_urls
    }

    pub fn pitch_offsets(&self) -> &[i32] {
        &self.pitch_offsets
    }

    pub fn metadata(&self) -> &JobMetadata {
        &self.metadata
    }

    pub fn track_count(&self) -> usize {
        self.source_urls.len()
    }

    /// Source URL for a 1-based track index.
    pub fn source_url(&self, track_index: usize) -> Option<&str> {
        track_index
            .checked_sub(1)
            .and_then(|i| self.source_urls.get(i))
            .map(String::as_str)
    }
}

/// One take of a request, after download.
///
/// Tracks of the same request share a working directory and are kept
/// apart by filename prefixes (`temp_<n>`, `<n>_mr`, `[<off>]<n>_result`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub index: usize,
    pub source_audio: PathBuf,
    pub working_dir: PathBuf,
}

impl Track {
    pub fn new(index: usize, source_audio: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            index,
            source_audio: source_audio.into(),
            working_dir: working_dir.into(),
        }
    }

    /// Base identifier the separation chain starts from.
    pub fn base_id(&self) -> String {
        format!("temp_{}", self.index)
    }

    /// Path of a file inside the working directory.
    pub fn work_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.working_dir.join(name)
    }
}
