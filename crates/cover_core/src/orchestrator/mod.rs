//! Request orchestration.
//!
//! Runs both tracks of a song request concurrently and turns their
//! results into events, published files and one completion notification.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     ├── Track 1: download → separation (4 stages) → render (per offset) → publish
//!     ├── Track 2: download → separation (4 stages) → render (per offset) → publish
//!     └── Notify (once, after every track is terminal)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cover_core::orchestrator::{CancelHandle, Orchestrator};
//!
//! let orchestrator = Orchestrator::builder(settings).build()?;
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let outcome = orchestrator.process_request(&job, &tx, &CancelHandle::new()).await?;
//! println!("Completed tracks: {:?}", outcome.completed_indices());
//! ```

mod cancel;
mod engine;
mod errors;
mod types;

pub use cancel::CancelHandle;
pub use engine::{Orchestrator, OrchestratorBuilder};
pub use errors::{RequestError, TrackError};
pub use types::{RequestOutcome, TrackOutcome, TrackReport};
