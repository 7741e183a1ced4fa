//! External-tool implementations of the render capabilities.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::capabilities::{Mixer, PitchShifter, ReverbProcessor, VoiceConverter};
use super::errors::EffectError;
use crate::config::{ConversionSettings, DeviceSettings, EffectsSettings, ReverbPreset};
use crate::logging::JobLogger;
use crate::tools::ToolCommand;

/// Voice conversion through an inference CLI.
#[derive(Debug, Clone)]
pub struct SubprocessConverter {
    settings: ConversionSettings,
    allocator: Option<(String, String)>,
}

impl SubprocessConverter {
    pub fn new(settings: ConversionSettings) -> Self {
        Self {
            settings,
            allocator: None,
        }
    }

    pub fn from_settings(settings: &ConversionSettings, device: &DeviceSettings) -> Self {
        Self {
            settings: settings.clone(),
            allocator: device
                .allocator_config
                .as_ref()
                .map(|value| (device.allocator_env.clone(), value.clone())),
        }
    }

    /// Directory holding the files of one voice model.
    pub fn model_path(&self, voice_model_id: &str) -> PathBuf {
        Path::new(&self.settings.models_dir).join(voice_model_id)
    }

    pub fn command(
        &self,
        voice_model_id: &str,
        input: &Path,
        output: &Path,
        pitch_offset: i32,
    ) -> ToolCommand {
        let s = &self.settings;
        let mut cmd = ToolCommand::new(&s.program)
            .args(&s.base_args)
            .arg("--model")
            .arg(self.model_path(voice_model_id).into_os_string())
            .arg("--input")
            .arg(input.as_os_str())
            .arg("--output")
            .arg(output.as_os_str())
            .arg("--pitch")
            .arg(pitch_offset.to_string())
            .arg("--f0-method")
            .arg(&s.f0_method)
            .arg("--index-rate")
            .arg(s.index_rate.to_string())
            .arg("--filter-radius")
            .arg(s.filter_radius.to_string())
            .arg("--rms-mix-rate")
            .arg(s.rms_mix_rate.to_string())
            .arg("--protect")
            .arg(s.protect.to_string())
            .arg("--crepe-hop-length")
            .arg(s.crepe_hop_length.to_string());
        if let Some((key, value)) = &self.allocator {
            cmd = cmd.env(key, value);
        }
        cmd
    }
}

#[async_trait]
impl VoiceConverter for SubprocessConverter {
    async fn convert(
        &self,
        voice_model_id: &str,
        input: &Path,
        output: &Path,
        pitch_offset: i32,
        logger: &JobLogger,
    ) -> Result<(), EffectError> {
        self.command(voice_model_id, input, output, pitch_offset)
            .run(Some(logger))
            .await?;
        Ok(())
    }
}

/// Reverb through sox.
#[derive(Debug, Clone)]
pub struct SoxReverb {
    program: String,
    preset: ReverbPreset,
}

impl SoxReverb {
    pub fn new(program: impl Into<String>, preset: ReverbPreset) -> Self {
        Self {
            program: program.into(),
            preset,
        }
    }

    pub fn from_settings(effects: &EffectsSettings) -> Self {
        Self::new(&effects.sox_program, effects.reverb.clone())
    }

    /// `channels 2 reverb <reverberance> <damping> <room> <stereo> <pre-delay ms> <wet dB>`
    pub fn command(&self, input: &Path, output: &Path) -> ToolCommand {
        let p = &self.preset;
        ToolCommand::new(&self.program)
            .arg(input.as_os_str())
            .arg(output.as_os_str())
            .args(["channels", "2", "reverb"])
            .arg(format_number(p.diffuse))
            .arg(format_number(p.damp))
            .arg(format_number(p.size))
            .arg(format_number(p.stereo))
            .arg(format_number(p.delay_secs * 1000.0))
            .arg(format_number(gain_db(p.wet)))
            .arg("gain")
            .arg(format_number(gain_db(p.dry)))
    }
}

#[async_trait]
impl ReverbProcessor for SoxReverb {
    async fn apply(
        &self,
        input: &Path,
        output: &Path,
        logger: &JobLogger,
    ) -> Result<(), EffectError> {
        self.command(input, output).run(Some(logger)).await?;
        Ok(())
    }
}

/// Tempo-preserving pitch shift through sox.
#[derive(Debug, Clone)]
pub struct SoxPitchShifter {
    program: String,
}

impl SoxPitchShifter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn command(&self, input: &Path, output: &Path, semitones: i32) -> ToolCommand {
        ToolCommand::new(&self.program)
            .arg(input.as_os_str())
            .arg(output.as_os_str())
            .arg("pitch")
            .arg((semitones * 100).to_string())
    }
}

#[async_trait]
impl PitchShifter for SoxPitchShifter {
    async fn shift(
        &self,
        input: &Path,
        output: &Path,
        semitones: i32,
        logger: &JobLogger,
    ) -> Result<(), EffectError> {
        self.command(input, output, semitones)
            .run(Some(logger))
            .await?;
        Ok(())
    }
}

/// Overlay mix through ffmpeg's `amix`.
#[derive(Debug, Clone)]
pub struct FfmpegMixer {
    program: String,
}

impl FfmpegMixer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn command(&self, vocal: &Path, bed: &Path, output: &Path) -> ToolCommand {
        ToolCommand::new(&self.program)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(vocal.as_os_str())
            .arg("-i")
            .arg(bed.as_os_str())
            .arg("-filter_complex")
            .arg("amix=inputs=2:duration=first:dropout_transition=0:normalize=0")
            .arg(output.as_os_str())
    }
}

#[async_trait]
impl Mixer for FfmpegMixer {
    async fn overlay(
        &self,
        vocal: &Path,
        bed: &Path,
        output: &Path,
        logger: &JobLogger,
    ) -> Result<(), EffectError> {
        self.command(vocal, bed, output).run(Some(logger)).await?;
        Ok(())
    }
}

/// Percent level to decibels.
fn gain_db(percent: f64) -> f64 {
    if percent <= 0.0 {
        -120.0
    } else {
        20.0 * (percent / 100.0).log10()
    }
}

fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}
