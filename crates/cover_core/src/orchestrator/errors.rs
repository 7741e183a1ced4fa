//! Error types for request orchestration.
//!
//! Errors carry context that chains through layers:
//! Request → Track → Stage/Offset → Detail

use thiserror::Error;

use super::types::RequestOutcome;
use crate::external::{DownloadError, StoreError};
use crate::models::JobError;
use crate::separation::SeparationError;

/// Fatal failure of one track. Sibling tracks are unaffected.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Track {track_index}: download failed: {source}")]
    Download {
        track_index: usize,
        #[source]
        source: DownloadError,
    },

    #[error("Track {track_index}: separation failed: {source}")]
    Separation {
        track_index: usize,
        #[source]
        source: SeparationError,
    },

    #[error("Track {track_index}: all {failures} pitch variants failed")]
    NoVariants { track_index: usize, failures: usize },

    #[error("Track {track_index}: upload failed: {source}")]
    Upload {
        track_index: usize,
        #[source]
        source: StoreError,
    },

    #[error("Track {track_index} cancelled")]
    Cancelled { track_index: usize },
}

impl TrackError {
    pub fn track_index(&self) -> usize {
        match self {
            Self::Download { track_index, .. }
            | Self::Separation { track_index, .. }
            | Self::NoVariants { track_index, .. }
            | Self::Upload { track_index, .. }
            | Self::Cancelled { track_index } => *track_index,
        }
    }

    /// Whether the track was processed but could not be delivered.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Upload { .. })
    }
}

/// Request-level failure.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] JobError),

    #[error("Request setup failed: {message}")]
    Setup { message: String },

    /// Processing finished but results could not be uploaded or
    /// announced. Carries the processing outcome.
    #[error("Request {request_id} could not be delivered: {message}")]
    RequestDeliveryFailed {
        request_id: String,
        message: String,
        outcome: Box<RequestOutcome>,
    },
}

impl RequestError {
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::separation::KARAOKE_SEPARATION;

    #[test]
    fn track_error_chains_stage_context() {
        let err = TrackError::Separation {
            track_index: 2,
            source: SeparationError::stage_failed(KARAOKE_SEPARATION, Some(1), "boom", false),
        };
        let msg = err.to_string();
        assert!(msg.contains("Track 2"));
        assert!(msg.contains(KARAOKE_SEPARATION));
        assert_eq!(err.track_index(), 2);
        assert!(!err.is_delivery_failure());
    }
}
