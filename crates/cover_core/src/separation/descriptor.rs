//! The fixed four-stage separation chain.

use serde::{Deserialize, Serialize};

use crate::config::ProfileSettings;

pub const VOCAL_SEPARATION: &str = "Vocal separation";
pub const KARAOKE_SEPARATION: &str = "Karaoke separation";
pub const REVERB_PROCESSING: &str = "Reverb processing";
pub const NOISE_REDUCTION: &str = "Noise reduction";

/// Architecture family of a separation model. Decides which tuning
/// parameters apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Segment size / overlap tuned models (`.onnx`).
    Mdx,
    /// Window size / aggression tuned models (`.pth`).
    Vr,
}

/// One stage of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub stage_name: &'static str,
    pub model_identifier: &'static str,
    pub model_family: ModelFamily,
}

/// Stage sequence, in execution order.
pub const STAGES: [StageDescriptor; 4] = [
    StageDescriptor {
        stage_name: VOCAL_SEPARATION,
        model_identifier: "Kim_Vocal_1.onnx",
        model_family: ModelFamily::Mdx,
    },
    StageDescriptor {
        stage_name: KARAOKE_SEPARATION,
        model_identifier: "6_HP-Karaoke-UVR.pth",
        model_family: ModelFamily::Vr,
    },
    StageDescriptor {
        stage_name: REVERB_PROCESSING,
        model_identifier: "Reverb_HQ_By_FoxJoy.onnx",
        model_family: ModelFamily::Mdx,
    },
    StageDescriptor {
        stage_name: NOISE_REDUCTION,
        model_identifier: "UVR-DeNoise.pth",
        model_family: ModelFamily::Vr,
    },
];

impl StageDescriptor {
    /// Look up a stage by name.
    pub fn by_name(stage_name: &str) -> Option<&'static StageDescriptor> {
        STAGES.iter().find(|s| s.stage_name == stage_name)
    }

    /// Model file name without its extension, as it appears in output names.
    pub fn model_stem(&self) -> &'static str {
        model_stem(self.model_identifier)
    }

    /// Resolve the invocation parameters for this stage under a profile.
    pub fn parameters(&self, profile: &ProfileSettings) -> StageParameters {
        let family = match self.model_family {
            ModelFamily::Mdx => FamilyParameters::Mdx {
                segment_size: profile.mdx_segment_size,
                overlap: profile.mdx_overlap,
            },
            ModelFamily::Vr => FamilyParameters::Vr {
                window_size: profile.vr_window_size,
                aggression: profile.vr_aggression,
            },
        };
        StageParameters {
            batch_size: profile.batch_size,
            family,
        }
    }
}

pub(crate) fn model_stem(model_identifier: &str) -> &str {
    model_identifier
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(model_identifier)
}

/// Which resource profile an attempt runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    Standard,
    /// Smallest batch and window; used once after device memory exhaustion.
    Minimal,
}

/// Family-specific tuning values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FamilyParameters {
    Mdx { segment_size: u32, overlap: f64 },
    Vr { window_size: u32, aggression: u32 },
}

/// Parameters handed to the separation backend for one invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParameters {
    pub batch_size: u32,
    pub family: FamilyParameters,
}
