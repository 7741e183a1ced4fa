//! Events emitted while a song request is processed.

use serde::{Deserialize, Serialize};

use super::stems::{RenderFailure, RenderVariant};

/// One published vocal/bed pair, in the shape the completion hook expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPair {
    pub track_index: usize,
    pub pitch_offset: i32,
    pub mr_url: String,
    pub vocal_url: String,
    pub result_url: String,
}

/// Progress and outcome notifications for one request.
///
/// Serialized as one JSON object per line by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RequestEvent {
    TrackCompleted {
        request_id: String,
        track_index: usize,
        variants: Vec<RenderVariant>,
        failures: Vec<RenderFailure>,
        published: Vec<AudioPair>,
    },
    TrackFailed {
        request_id: String,
        track_index: usize,
        error: String,
    },
    AllCompleted {
        request_id: String,
        completed: Vec<usize>,
        failed: Vec<usize>,
    },
    DeliveryFailed {
        request_id: String,
        message: String,
    },
}

impl RequestEvent {
    pub fn request_id(&self) -> &str {
        match self {
            RequestEvent::TrackCompleted { request_id, .. }
            | RequestEvent::TrackFailed { request_id, .. }
            | RequestEvent::AllCompleted { request_id, .. }
            | RequestEvent::DeliveryFailed { request_id, .. } => request_id,
        }
    }
}
