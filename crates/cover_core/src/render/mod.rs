//! Cover rendering.
//!
//! For every pitch offset of the voice model: convert the lead vocal,
//! add reverb, re-pitch the instrumental bed by the same offset and mix
//! the two. Offsets are independent; one failing never stops another.

mod capabilities;
mod errors;
mod pipeline;
mod subprocess;

pub use capabilities::{Mixer, PitchShifter, RenderCapabilities, ReverbProcessor, VoiceConverter};
pub use errors::{EffectError, RenderError};
pub use pipeline::{CoverRenderer, RenderOutcome, VariantPaths};
pub use subprocess::{FfmpegMixer, SoxPitchShifter, SoxReverb, SubprocessConverter};
