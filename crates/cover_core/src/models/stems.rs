//! Separation and render results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The three normalized stems of one separated track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparationResult {
    pub track_index: usize,
    /// Backing track without any vocals (`<n>_mr`).
    pub instrumental_bed_path: PathBuf,
    /// Backing vocals and harmonies (`<n>_chorus`).
    pub harmony_path: PathBuf,
    /// Dry, de-reverberated lead vocal (`<n>_vocal`).
    pub lead_vocal_path: PathBuf,
}

/// One finished pitch variant of a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderVariant {
    pub track_index: usize,
    pub pitch_offset: i32,
    pub reverberated_vocal_path: PathBuf,
    pub pitched_instrumental_path: PathBuf,
    pub mixed_output_path: PathBuf,
}

/// Render step that failed for one offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStep {
    Conversion,
    Reverb,
    PitchShift,
    Mix,
    Cancelled,
}

impl std::fmt::Display for RenderStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RenderStep::Conversion => "voice conversion",
            RenderStep::Reverb => "reverb",
            RenderStep::PitchShift => "pitch shift",
            RenderStep::Mix => "mix",
            RenderStep::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A recorded per-offset failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderFailure {
    pub pitch_offset: i32,
    pub step: RenderStep,
    pub message: String,
}
