//! Stem separation.
//!
//! Four fixed stages turn one take into an instrumental bed, a harmony
//! stem and a dry lead vocal:
//!
//! 1. Vocal separation (vocals / instrumental)
//! 2. Karaoke separation of the vocals (lead / harmonies)
//! 3. Reverb processing of the lead
//! 4. Noise reduction of the de-reverberated lead
//!
//! Each stage names its outputs after its input, so every path in the
//! chain is derived, never discovered.

mod backend;
mod descriptor;
mod errors;
mod executor;
mod naming;
mod pipeline;

pub use backend::{
    BackendOutcome, InProcessSeparator, SeparationInvocation, SeparationModel, SeparatorBackend,
    SubprocessSeparator,
};
pub use descriptor::{
    FamilyParameters, ModelFamily, Profile, StageDescriptor, StageParameters, KARAOKE_SEPARATION,
    NOISE_REDUCTION, REVERB_PROCESSING, STAGES, VOCAL_SEPARATION,
};
pub use errors::{NamingError, SeparationError};
pub use executor::{ExecutorSettings, StageExecutor};
pub use naming::{expected_outputs, file_stem, next_input, OutputRole, StageOutputSet};
pub use pipeline::{SeparationPipeline, SeparationState};

pub(crate) use pipeline::copy_verified;
