//! Four-stage separation of one track into bed, harmony and lead vocal.

use std::fmt;
use std::path::{Path, PathBuf};

use super::descriptor::STAGES;
use super::errors::SeparationError;
use super::executor::StageExecutor;
use super::naming::{next_input, OutputRole, StageOutputSet};
use crate::logging::JobLogger;
use crate::models::{SeparationResult, Track};
use crate::orchestrator::CancelHandle;

/// Progress of one track through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeparationState {
    Copied,
    Stage1Done,
    Stage2Done,
    Stage3Done,
    Stage4Done,
    Finalized,
}

impl SeparationState {
    fn after_stage(index: usize) -> Self {
        match index {
            0 => Self::Stage1Done,
            1 => Self::Stage2Done,
            2 => Self::Stage3Done,
            _ => Self::Stage4Done,
        }
    }
}

impl fmt::Display for SeparationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sequences the four stages for a track and normalizes the result.
pub struct SeparationPipeline {
    executor: StageExecutor,
    keep_intermediates: bool,
}

impl SeparationPipeline {
    pub fn new(executor: StageExecutor) -> Self {
        Self {
            executor,
            keep_intermediates: false,
        }
    }

    /// Keep `temp_<n>*` files after finalization.
    pub fn keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    /// Separate one track.
    ///
    /// Any stage error aborts the track; no partial result is returned.
    pub async fn separate(
        &self,
        track: &Track,
        cancel: &CancelHandle,
        logger: &JobLogger,
    ) -> Result<SeparationResult, SeparationError> {
        let ext = self.executor.settings().output_format.clone();
        let working_dir = track.working_dir.as_path();

        let source_ext = track
            .source_audio
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| ext.clone());
        let copied = track.work_file(format!("{}.{}", track.base_id(), source_ext));
        if !is_file(&track.source_audio).await {
            return Err(SeparationError::input_missing(
                STAGES[0].stage_name,
                &track.source_audio,
                working_dir,
            ));
        }
        if copied != track.source_audio {
            stage_copy(&track.source_audio, &copied).await?;
        }
        let mut state = SeparationState::Copied;
        tracing::debug!(track = track.index, %state, "Source staged as {}", copied.display());

        let mut outputs: Vec<StageOutputSet> = Vec::with_capacity(STAGES.len());
        for (i, stage) in STAGES.iter().enumerate() {
            if cancel.is_cancelled() {
                logger.warn(&format!(
                    "Track {} cancelled before {}",
                    track.index, stage.stage_name
                ));
                return Err(SeparationError::Cancelled {
                    stage: stage.stage_name.to_string(),
                });
            }

            let input = match outputs.last() {
                None => copied.clone(),
                Some(upstream) => working_dir.join(next_input(stage.stage_name, upstream)?),
            };

            let set = self
                .executor
                .run_stage(&input, stage, working_dir, logger)
                .await?;
            outputs.push(set);

            state = SeparationState::after_stage(i);
            tracing::debug!(track = track.index, %state, "{} finished", stage.stage_name);
        }

        let result = self.finalize(track, &outputs, &ext).await?;
        state = SeparationState::Finalized;
        tracing::info!(track = track.index, %state, "Separation finished");

        if !self.keep_intermediates {
            remove_intermediates(working_dir, &track.base_id()).await;
        }

        Ok(result)
    }

    /// Copy the three kept stems to their stable names.
    async fn finalize(
        &self,
        track: &Track,
        outputs: &[StageOutputSet],
        ext: &str,
    ) -> Result<SeparationResult, SeparationError> {
        let dir = track.working_dir.as_path();
        let pick = |stage: usize| -> Result<PathBuf, SeparationError> {
            Ok(dir.join(outputs[stage].require(OutputRole::Instrumental)?))
        };

        let n = track.index;
        let bed = dir.join(format!("{}_mr.{}", n, ext));
        let harmony = dir.join(format!("{}_chorus.{}", n, ext));
        let vocal = dir.join(format!("{}_vocal.{}", n, ext));

        stage_copy(&pick(0)?, &bed).await?;
        stage_copy(&pick(1)?, &harmony).await?;
        stage_copy(&pick(3)?, &vocal).await?;

        Ok(SeparationResult {
            track_index: n,
            instrumental_bed_path: bed,
            harmony_path: harmony,
            lead_vocal_path: vocal,
        })
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Copy a file and check the destination has the same length.
pub(crate) async fn copy_verified(from: &Path, to: &Path) -> std::io::Result<u64> {
    let copied = tokio::fs::copy(from, to).await?;
    let written = tokio::fs::metadata(to).await?.len();
    if written != copied {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, found {}", copied, written),
        ));
    }
    Ok(copied)
}

async fn stage_copy(from: &Path, to: &Path) -> Result<u64, SeparationError> {
    copy_verified(from, to).await.map_err(|e| {
        SeparationError::io_error(format!("copying {} to {}", from.display(), to.display()), e)
    })
}

/// Delete the per-stage files of one track.
async fn remove_intermediates(dir: &Path, base_id: &str) {
    let dotted = format!("{}.", base_id);
    let underscored = format!("{}_", base_id);
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot list {} for cleanup: {}", dir.display(), e);
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&dotted) || name.starts_with(&underscored) {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                tracing::warn!("Cannot remove {}: {}", name, e);
            }
        }
    }
}
