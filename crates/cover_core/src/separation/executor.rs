//! Runs one separation stage with device management and retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::backend::{BackendOutcome, SeparationInvocation, SeparatorBackend};
use super::descriptor::{Profile, StageDescriptor};
use super::errors::SeparationError;
use super::naming::{expected_outputs, file_stem, OutputRole, StageOutputSet};
use crate::config::{ProfileSettings, SeparatorSettings};
use crate::device::DeviceGate;
use crate::logging::JobLogger;

/// Executor tuning, usually taken from `[separator]`.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub output_format: String,
    pub settle_delay: Duration,
    /// Lowercase markers that identify device memory exhaustion.
    pub exhaustion_markers: Vec<String>,
    pub standard: ProfileSettings,
    pub minimal: ProfileSettings,
}

impl From<&SeparatorSettings> for ExecutorSettings {
    fn from(settings: &SeparatorSettings) -> Self {
        Self {
            output_format: settings.output_format.clone(),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            exhaustion_markers: settings
                .exhaustion_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            standard: settings.standard.clone(),
            minimal: settings.minimal.clone(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&SeparatorSettings::default())
    }
}

/// How one attempt ended.
enum Attempt {
    Done,
    /// Device memory ran out; worth one retry with the minimal profile.
    Exhausted { outcome: BackendOutcome },
    Failed(SeparationError),
}

/// Runs stages against a shared backend and device.
pub struct StageExecutor {
    backend: Arc<dyn SeparatorBackend>,
    gate: DeviceGate,
    settings: ExecutorSettings,
}

impl StageExecutor {
    pub fn new(
        backend: Arc<dyn SeparatorBackend>,
        gate: DeviceGate,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            backend,
            gate,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run `stage` on `input_path`, writing into `working_dir`.
    ///
    /// Returns the verified output set. The parameter profile is chosen
    /// by model family; only device memory exhaustion triggers the single
    /// retry with the minimal profile.
    pub async fn run_stage(
        &self,
        input_path: &Path,
        stage: &StageDescriptor,
        working_dir: &Path,
        logger: &JobLogger,
    ) -> Result<StageOutputSet, SeparationError> {
        let stage_name = stage.stage_name;

        if !path_exists(input_path).await {
            return Err(SeparationError::input_missing(
                stage_name,
                input_path,
                working_dir,
            ));
        }

        let base_id = input_path
            .file_name()
            .map(|n| file_stem(&n.to_string_lossy()).to_string())
            .unwrap_or_default();
        let expected = expected_outputs(
            stage_name,
            stage.model_identifier,
            &base_id,
            &self.settings.output_format,
        )?;

        logger.stage(stage_name);

        match self
            .attempt(input_path, stage, working_dir, &expected, Profile::Standard, logger)
            .await
        {
            Attempt::Done => return Ok(expected),
            Attempt::Failed(err) => return Err(err),
            Attempt::Exhausted { outcome } => {
                logger.warn(&format!(
                    "{}: device memory exhausted, retrying with minimal profile",
                    stage_name
                ));
                tracing::warn!(
                    stage = stage_name,
                    exit_code = ?outcome.exit_code,
                    "Device memory exhausted, retrying with minimal profile"
                );
                self.remove_partial_outputs(working_dir, &expected).await;
            }
        }

        match self
            .attempt(input_path, stage, working_dir, &expected, Profile::Minimal, logger)
            .await
        {
            Attempt::Done => Ok(expected),
            Attempt::Failed(err) => Err(err),
            Attempt::Exhausted { outcome } => {
                logger.show_tail(stage_name);
                match self.first_missing(working_dir, &expected).await {
                    Some((role, file)) if outcome.success => Err(
                        SeparationError::output_missing(stage_name, role, file, working_dir),
                    ),
                    _ => Err(SeparationError::stage_failed(
                        stage_name,
                        outcome.exit_code,
                        last_lines(&outcome.diagnostics, 5),
                        true,
                    )),
                }
            }
        }
    }

    /// One invocation under the device lease, classified.
    async fn attempt(
        &self,
        input_path: &Path,
        stage: &StageDescriptor,
        working_dir: &Path,
        expected: &StageOutputSet,
        profile: Profile,
        logger: &JobLogger,
    ) -> Attempt {
        let stage_name = stage.stage_name;
        let profile_settings = match profile {
            Profile::Standard => &self.settings.standard,
            Profile::Minimal => &self.settings.minimal,
        };
        let invocation = SeparationInvocation {
            stage: *stage,
            input: input_path.to_path_buf(),
            output_dir: working_dir.to_path_buf(),
            output_format: self.settings.output_format.clone(),
            profile,
            parameters: stage.parameters(profile_settings),
        };

        let lease = match self.gate.acquire(stage_name).await {
            Ok(lease) => lease,
            Err(e) => {
                return Attempt::Failed(SeparationError::stage_failed(
                    stage_name,
                    None,
                    e.to_string(),
                    false,
                ))
            }
        };
        // The tail reports on this attempt only.
        logger.clear_tail();
        self.backend.reclaim_device();
        let backend = Arc::clone(&self.backend);
        let lease = lease.on_release(move || backend.reclaim_device());

        tracing::debug!(stage = stage_name, ?profile, "Invoking {}", self.backend.name());
        let outcome = match self.backend.separate(&invocation, logger).await {
            Ok(outcome) => outcome,
            Err(err) => return Attempt::Failed(err),
        };

        let retried = profile == Profile::Minimal;
        let exhausted = self.is_exhausted(&outcome.diagnostics);

        if !outcome.success {
            if exhausted {
                return Attempt::Exhausted { outcome };
            }
            logger.show_tail(stage_name);
            return Attempt::Failed(SeparationError::stage_failed(
                stage_name,
                outcome.exit_code,
                last_lines(&outcome.diagnostics, 5),
                retried,
            ));
        }

        if let Some((role, file)) = self.first_missing(working_dir, expected).await {
            if exhausted {
                return Attempt::Exhausted { outcome };
            }
            logger.show_tail(stage_name);
            return Attempt::Failed(SeparationError::output_missing(
                stage_name,
                role,
                file,
                working_dir,
            ));
        }

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
        drop(lease);

        logger.success(&format!("{} completed", stage_name));
        Attempt::Done
    }

    fn is_exhausted(&self, diagnostics: &str) -> bool {
        let lowered = diagnostics.to_lowercase();
        self.settings
            .exhaustion_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }

    async fn first_missing(
        &self,
        working_dir: &Path,
        expected: &StageOutputSet,
    ) -> Option<(OutputRole, String)> {
        for (role, file) in expected.iter() {
            if !path_exists(&working_dir.join(file)).await {
                return Some((role, file.to_string()));
            }
        }
        None
    }

    async fn remove_partial_outputs(&self, working_dir: &Path, expected: &StageOutputSet) {
        for (_, file) in expected.iter() {
            let path: PathBuf = working_dir.join(file);
            if path_exists(&path).await {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!("Could not remove partial output {}: {}", path.display(), e);
                }
            }
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::separation::backend::SeparationModel;
    use crate::separation::backend::InProcessSeparator;
    use crate::separation::descriptor::{STAGES, VOCAL_SEPARATION};
    use parking_lot::Mutex;
    use tempfile::tempdir;

    /// Writes outputs according to a script of per-call behaviours.
    struct ScriptedModel {
        script: Mutex<Vec<Behaviour>>,
        profiles: Mutex<Vec<Profile>>,
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Write,
        Oom,
        SilentOom,
        Crash,
        WriteNothing,
    }

    impl ScriptedModel {
        fn new(script: Vec<Behaviour>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                profiles: Mutex::new(Vec::new()),
            })
        }
    }

    impl SeparationModel for ScriptedModel {
        fn run(&self, inv: &SeparationInvocation) -> Result<String, String> {
            self.profiles.lock().push(inv.profile);
            let behaviour = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    Behaviour::Write
                } else {
                    script.remove(0)
                }
            };
            let write = || {
                let stem = file_stem(&inv.input.file_name().unwrap().to_string_lossy()).to_string();
                let set = expected_outputs(
                    inv.stage.stage_name,
                    inv.stage.model_identifier,
                    &stem,
                    &inv.output_format,
                )
                .unwrap();
                for (_, file) in set.iter() {
                    std::fs::write(inv.output_dir.join(file), file.as_bytes()).unwrap();
                }
            };
            match behaviour {
                Behaviour::Write => {
                    write();
                    Ok("done".to_string())
                }
                Behaviour::Oom => Err("RuntimeError: CUDA out of memory".to_string()),
                Behaviour::SilentOom => Ok("warning: CUDA out of memory, skipping".to_string()),
                Behaviour::Crash => Err("segfault in model".to_string()),
                Behaviour::WriteNothing => Ok("finished".to_string()),
            }
        }
    }

    fn executor(model: Arc<ScriptedModel>) -> StageExecutor {
        let settings = ExecutorSettings {
            settle_delay: Duration::ZERO,
            ..ExecutorSettings::default()
        };
        StageExecutor::new(
            Arc::new(InProcessSeparator::new(model)),
            DeviceGate::new(1),
            settings,
        )
    }

    fn logger() -> JobLogger {
        JobLogger::in_memory("test", Default::default(), None)
    }

    #[tokio::test]
    async fn missing_input_lists_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("other.mp3"), b"x").unwrap();
        let exec = executor(ScriptedModel::new(vec![]));

        let err = exec
            .run_stage(&dir.path().join("temp_1.mp3"), &STAGES[0], dir.path(), &logger())
            .await
            .unwrap_err();
        match err {
            SeparationError::InputMissing { stage, listing, .. } => {
                assert_eq!(stage, VOCAL_SEPARATION);
                assert_eq!(listing, vec!["other.mp3".to_string()]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn success_returns_verified_outputs() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("temp_1.mp3");
        std::fs::write(&input, b"audio").unwrap();
        let model = ScriptedModel::new(vec![Behaviour::Write]);
        let exec = executor(model.clone());

        let set = exec
            .run_stage(&input, &STAGES[0], dir.path(), &logger())
            .await
            .unwrap();
        for (_, file) in set.iter() {
            assert!(dir.path().join(file).exists());
        }
        assert_eq!(*model.profiles.lock(), vec![Profile::Standard]);
    }

    #[tokio::test]
    async fn exhaustion_retries_once_with_minimal_profile() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("temp_1.mp3");
        std::fs::write(&input, b"audio").unwrap();
        let model = ScriptedModel::new(vec![Behaviour::Oom, Behaviour::Write]);
        let exec = executor(model.clone());

        exec.run_stage(&input, &STAGES[0], dir.path(), &logger())
            .await
            .unwrap();
        assert_eq!(
            *model.profiles.lock(),
            vec![Profile::Standard, Profile::Minimal]
        );
    }

    #[tokio::test]
    async fn tail_holds_only_the_latest_attempt() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("temp_1.mp3");
        std::fs::write(&input, b"audio").unwrap();
        let exec = executor(ScriptedModel::new(vec![Behaviour::Oom, Behaviour::Write]));
        let logger = logger();

        exec.run_stage(&input, &STAGES[0], dir.path(), &logger)
            .await
            .unwrap();
        assert_eq!(logger.get_tail(), vec!["done".to_string()]);
    }

    #[tokio::test]
    async fn silent_exhaustion_is_detected_from_missing_outputs() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("temp_1.mp3");
        std::fs::write(&input, b"audio").unwrap();
        let model = ScriptedModel::new(vec![Behaviour::SilentOom, Behaviour::Write]);
        let exec = executor(model.clone());

        exec.run_stage(&input, &STAGES[1], dir.path(), &logger())
            .await
            .unwrap();
        assert_eq!(model.profiles.lock().len(), 2);
    }

    #[tokio::test]
    async fn second_exhaustion_is_fatal() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("temp_1.mp3");
        std::fs::write(&input, b"audio").unwrap();
        let model = ScriptedModel::new(vec![Behaviour::Oom, Behaviour::Oom, Behaviour::Write]);
        let exec = executor(model.clone());

        let err = exec
            .run_stage(&input, &STAGES[0], dir.path(), &logger())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SeparationError::StageFailed { retried: true, .. }
        ));
        assert_eq!(model.profiles.lock().len(), 2);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("temp_1.mp3");
        std::fs::write(&input, b"audio").unwrap();
        let model = ScriptedModel::new(vec![Behaviour::Crash]);
        let exec = executor(model.clone());

        let err = exec
            .run_stage(&input, &STAGES[0], dir.path(), &logger())
            .await
            .unwrap_err();
        match err {
            SeparationError::StageFailed {
                diagnostic,
                retried,
                ..
            } => {
                assert_eq!(diagnostic, "segfault in model");
                assert!(!retried);
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(model.profiles.lock().len(), 1);
    }

    #[tokio::test]
    async fn clean_exit_without_outputs_is_output_missing() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("temp_1.mp3");
        std::fs::write(&input, b"audio").unwrap();
        let model = ScriptedModel::new(vec![Behaviour::WriteNothing]);
        let exec = executor(model.clone());

        let err = exec
            .run_stage(&input, &STAGES[0], dir.path(), &logger())
            .await
            .unwrap_err();
        match err {
            SeparationError::OutputMissing { file, listing, .. } => {
                assert!(file.starts_with("temp_1_("));
                assert_eq!(listing, vec!["temp_1.mp3".to_string()]);
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(model.profiles.lock().len(), 1);
    }

    #[tokio::test]
    async fn permit_is_returned_after_failure() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("temp_1.mp3");
        std::fs::write(&input, b"audio").unwrap();
        let exec = executor(ScriptedModel::new(vec![Behaviour::Crash]));

        let _ = exec
            .run_stage(&input, &STAGES[0], dir.path(), &logger())
            .await;
        assert_eq!(exec.gate.available(), 1);
    }

    #[test]
    fn exhaustion_markers_are_case_insensitive() {
        let exec = executor(ScriptedModel::new(vec![]));
        assert!(exec.is_exhausted("torch.cuda.OutOfMemoryError: ..."));
        assert!(exec.is_exhausted("CUDA OUT OF MEMORY"));
        assert!(!exec.is_exhausted("file not found"));
    }
}
