//! Per-offset cover rendering: convert, reverb, re-pitch, mix.

use std::path::{Path, PathBuf};

use futures_util::stream::{FuturesUnordered, StreamExt};

use super::capabilities::RenderCapabilities;
use super::errors::RenderError;
use crate::device::DeviceGate;
use crate::logging::JobLogger;
use crate::models::{RenderFailure, RenderStep, RenderVariant, SeparationResult};
use crate::orchestrator::CancelHandle;
use crate::separation::copy_verified;

/// Variants and failures of one render call, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutcome {
    pub variants: Vec<RenderVariant>,
    pub failures: Vec<RenderFailure>,
}

impl RenderOutcome {
    pub fn into_parts(self) -> (Vec<RenderVariant>, Vec<RenderFailure>) {
        (self.variants, self.failures)
    }
}

/// File names of one offset's render products.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPaths {
    pub converted_vocal: PathBuf,
    pub reverberated_vocal: PathBuf,
    pub pitched_instrumental: PathBuf,
    pub mixed_output: PathBuf,
}

impl VariantPaths {
    pub fn new(dir: &Path, track_index: usize, pitch_offset: i32, ext: &str) -> Self {
        let name = |body: String| dir.join(format!("[{}]{}.{}", pitch_offset, body, ext));
        Self {
            converted_vocal: name(format!("aivocal{}", track_index)),
            reverberated_vocal: name(format!("reverb{}", track_index)),
            pitched_instrumental: name(format!("{}_mr", track_index)),
            mixed_output: name(format!("{}_result", track_index)),
        }
    }
}

/// Renders pitch variants of a separated track.
pub struct CoverRenderer {
    capabilities: RenderCapabilities,
    gate: DeviceGate,
    output_format: String,
}

impl CoverRenderer {
    pub fn new(
        capabilities: RenderCapabilities,
        gate: DeviceGate,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            capabilities,
            gate,
            output_format: output_format.into(),
        }
    }

    /// Render every offset concurrently.
    ///
    /// A failing offset is recorded and the others continue.
    pub async fn render(
        &self,
        separation: &SeparationResult,
        voice_model_id: &str,
        pitch_offsets: &[i32],
        cancel: &CancelHandle,
        logger: &JobLogger,
    ) -> RenderOutcome {
        let mut pending: FuturesUnordered<_> = pitch_offsets
            .iter()
            .map(|&offset| self.render_offset(separation, voice_model_id, offset, cancel, logger))
            .collect();

        let mut outcome = RenderOutcome::default();
        while let Some(result) = pending.next().await {
            match result {
                Ok(variant) => {
                    logger.success(&format!(
                        "Track {} offset {} rendered",
                        variant.track_index, variant.pitch_offset
                    ));
                    outcome.variants.push(variant);
                }
                Err(err) => {
                    logger.error(&err.to_string());
                    tracing::warn!(
                        track = separation.track_index,
                        offset = err.pitch_offset(),
                        "Render failed: {}",
                        err
                    );
                    outcome.failures.push(err.to_failure());
                }
            }
        }
        outcome
    }

    async fn render_offset(
        &self,
        separation: &SeparationResult,
        voice_model_id: &str,
        pitch_offset: i32,
        cancel: &CancelHandle,
        logger: &JobLogger,
    ) -> Result<RenderVariant, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled { pitch_offset });
        }

        let dir = separation
            .lead_vocal_path
            .parent()
            .unwrap_or_else(|| Path::new("."));
        let paths = VariantPaths::new(dir, separation.track_index, pitch_offset, &self.output_format);
        let caps = &self.capabilities;

        {
            let _lease = self
                .gate
                .acquire(format!("conversion {}", pitch_offset))
                .await
                .map_err(|e| RenderError::conversion_failed(pitch_offset, e.to_string()))?;
            // Queued behind other model work; re-check before starting.
            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled { pitch_offset });
            }
            caps.converter
                .convert(
                    voice_model_id,
                    &separation.lead_vocal_path,
                    &paths.converted_vocal,
                    pitch_offset,
                    logger,
                )
                .await
                .map_err(|e| RenderError::conversion_failed(pitch_offset, e.to_string()))?;
        }
        ensure_written(&paths.converted_vocal)
            .await
            .map_err(|message| RenderError::conversion_failed(pitch_offset, message))?;

        caps.reverb
            .apply(&paths.converted_vocal, &paths.reverberated_vocal, logger)
            .await
            .map_err(|e| RenderError::effect_failed(pitch_offset, RenderStep::Reverb, e.to_string()))?;
        ensure_written(&paths.reverberated_vocal)
            .await
            .map_err(|message| RenderError::effect_failed(pitch_offset, RenderStep::Reverb, message))?;

        if pitch_offset == 0 {
            copy_verified(&separation.instrumental_bed_path, &paths.pitched_instrumental)
                .await
                .map_err(|e| RenderError::io_error(pitch_offset, "copying unshifted bed", e))?;
        } else {
            caps.shifter
                .shift(
                    &separation.instrumental_bed_path,
                    &paths.pitched_instrumental,
                    pitch_offset,
                    logger,
                )
                .await
                .map_err(|e| {
                    RenderError::effect_failed(pitch_offset, RenderStep::PitchShift, e.to_string())
                })?;
            ensure_written(&paths.pitched_instrumental)
                .await
                .map_err(|message| {
                    RenderError::effect_failed(pitch_offset, RenderStep::PitchShift, message)
                })?;
        }

        caps.mixer
            .overlay(
                &paths.reverberated_vocal,
                &paths.pitched_instrumental,
                &paths.mixed_output,
                logger,
            )
            .await
            .map_err(|e| RenderError::effect_failed(pitch_offset, RenderStep::Mix, e.to_string()))?;
        ensure_written(&paths.mixed_output)
            .await
            .map_err(|message| RenderError::effect_failed(pitch_offset, RenderStep::Mix, message))?;

        Ok(RenderVariant {
            track_index: separation.track_index,
            pitch_offset,
            reverberated_vocal_path: paths.reverberated_vocal,
            pitched_instrumental_path: paths.pitched_instrumental,
            mixed_output_path: paths.mixed_output,
        })
    }
}

/// A capability returning `Ok` is not proof of output; check the file.
async fn ensure_written(output: &Path) -> Result<(), String> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(format!("{} is empty", output.display())),
        Err(e) => Err(format!("{} was not written: {}", output.display(), e)),
    }
}
