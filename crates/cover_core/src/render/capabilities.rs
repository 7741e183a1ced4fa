//! Capabilities the renderer depends on.
//!
//! Each is an opaque "apply X to this file" operation. The subprocess
//! implementations live in `subprocess.rs`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::errors::EffectError;
use crate::logging::JobLogger;

/// Sings the lead vocal with a different voice.
#[async_trait]
pub trait VoiceConverter: Send + Sync {
    async fn convert(
        &self,
        voice_model_id: &str,
        input: &Path,
        output: &Path,
        pitch_offset: i32,
        logger: &JobLogger,
    ) -> Result<(), EffectError>;
}

/// Applies the fixed reverb preset, upmixing mono to stereo first.
#[async_trait]
pub trait ReverbProcessor: Send + Sync {
    async fn apply(&self, input: &Path, output: &Path, logger: &JobLogger)
        -> Result<(), EffectError>;
}

/// Shifts pitch by whole semitones, keeping tempo.
#[async_trait]
pub trait PitchShifter: Send + Sync {
    async fn shift(
        &self,
        input: &Path,
        output: &Path,
        semitones: i32,
        logger: &JobLogger,
    ) -> Result<(), EffectError>;
}

/// Overlays a foreground vocal on a backing bed.
///
/// The vocal defines the output duration; neither input is attenuated.
#[async_trait]
pub trait Mixer: Send + Sync {
    async fn overlay(
        &self,
        vocal: &Path,
        bed: &Path,
        output: &Path,
        logger: &JobLogger,
    ) -> Result<(), EffectError>;
}

/// The full set of capabilities a renderer needs.
#[derive(Clone)]
pub struct RenderCapabilities {
    pub converter: Arc<dyn VoiceConverter>,
    pub reverb: Arc<dyn ReverbProcessor>,
    pub shifter: Arc<dyn PitchShifter>,
    pub mixer: Arc<dyn Mixer>,
}
