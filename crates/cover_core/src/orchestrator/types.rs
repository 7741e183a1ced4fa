//! Outcome types for request processing.

use serde::Serialize;

use super::errors::TrackError;
use crate::models::{AudioPair, RenderFailure, RenderVariant, SeparationResult};

/// Everything one successful track produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackReport {
    pub track_index: usize,
    pub separation: SeparationResult,
    pub variants: Vec<RenderVariant>,
    pub failures: Vec<RenderFailure>,
    pub published: Vec<AudioPair>,
}

/// Result of one track.
#[derive(Debug)]
pub struct TrackOutcome {
    pub track_index: usize,
    pub result: Result<TrackReport, TrackError>,
}

/// Terminal outcome of a request, tracks in completion order.
#[derive(Debug, Default)]
pub struct RequestOutcome {
    pub request_id: String,
    pub tracks: Vec<TrackOutcome>,
    /// Whether the completion notification went out.
    pub notified: bool,
}

impl RequestOutcome {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    /// Reports of completed tracks.
    pub fn completed(&self) -> impl Iterator<Item = &TrackReport> {
        self.tracks.iter().filter_map(|t| t.result.as_ref().ok())
    }

    /// Errors of failed tracks.
    pub fn failed(&self) -> impl Iterator<Item = &TrackError> {
        self.tracks.iter().filter_map(|t| t.result.as_ref().err())
    }

    /// Indices of completed tracks, ascending.
    pub fn completed_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.completed().map(|r| r.track_index).collect();
        indices.sort_unstable();
        indices
    }

    /// Indices of failed tracks, ascending.
    pub fn failed_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.failed().map(TrackError::track_index).collect();
        indices.sort_unstable();
        indices
    }

    /// Every published pair across tracks, by track then offset.
    pub fn audio_pairs(&self) -> Vec<AudioPair> {
        let mut pairs: Vec<AudioPair> = self
            .completed()
            .flat_map(|r| r.published.iter().cloned())
            .collect();
        pairs.sort_by_key(|p| (p.track_index, p.pitch_offset));
        pairs
    }

    pub fn is_success(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| t.result.is_ok())
    }
}
