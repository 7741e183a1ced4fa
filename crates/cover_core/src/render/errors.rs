//! Error types for cover rendering.

use std::io;

use thiserror::Error;

use crate::models::{RenderFailure, RenderStep};
use crate::tools::ToolError;

/// Failure reported by a render capability.
#[derive(Error, Debug)]
pub enum EffectError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure of one pitch offset. Never affects other offsets.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Voice conversion at offset {pitch_offset} failed: {message}")]
    ConversionFailed { pitch_offset: i32, message: String },

    #[error("{effect} at offset {pitch_offset} failed: {message}")]
    EffectFailed {
        pitch_offset: i32,
        effect: RenderStep,
        message: String,
    },

    #[error("I/O error at offset {pitch_offset} in {operation}: {source}")]
    Io {
        pitch_offset: i32,
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("Offset {pitch_offset} cancelled before it started")]
    Cancelled { pitch_offset: i32 },
}

impl RenderError {
    pub fn conversion_failed(pitch_offset: i32, message: impl Into<String>) -> Self {
        Self::ConversionFailed {
            pitch_offset,
            message: message.into(),
        }
    }

    pub fn effect_failed(pitch_offset: i32, effect: RenderStep, message: impl Into<String>) -> Self {
        Self::EffectFailed {
            pitch_offset,
            effect,
            message: message.into(),
        }
    }

    pub fn io_error(pitch_offset: i32, operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            pitch_offset,
            operation: operation.into(),
            source,
        }
    }

    pub fn pitch_offset(&self) -> i32 {
        match self {
            Self::ConversionFailed { pitch_offset, .. }
            | Self::EffectFailed { pitch_offset, .. }
            | Self::Io { pitch_offset, .. }
            | Self::Cancelled { pitch_offset } => *pitch_offset,
        }
    }

    /// Which render step failed. I/O errors only occur while preparing
    /// the bed, so they count as pitch shift failures.
    pub fn step(&self) -> RenderStep {
        match self {
            Self::ConversionFailed { .. } => RenderStep::Conversion,
            Self::EffectFailed { effect, .. } => *effect,
            Self::Io { .. } => RenderStep::PitchShift,
            Self::Cancelled { .. } => RenderStep::Cancelled,
        }
    }

    /// Record form for results and events.
    pub fn to_failure(&self) -> RenderFailure {
        RenderFailure {
            pitch_offset: self.pitch_offset(),
            step: self.step(),
            message: self.to_string(),
        }
    }
}
