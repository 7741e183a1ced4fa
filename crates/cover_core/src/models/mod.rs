//! Data models for the cover engine.
//!
//! - Song requests and tracks (`Job`, `Track`)
//! - Separation and render outputs
//! - Request events streamed to the caller

mod events;
mod job;
mod stems;

pub use events::{AudioPair, RequestEvent};
pub use job::{Job, JobError, JobMetadata, Track, TRACK_COUNT};
pub use stems::{RenderFailure, RenderStep, RenderVariant, SeparationResult};
