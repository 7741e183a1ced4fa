//! Separation backends.
//!
//! A backend applies one stage model to one input file and reports what
//! happened. Whether the outputs actually appeared is judged by the
//! executor, not here.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::descriptor::{FamilyParameters, Profile, StageDescriptor, StageParameters};
use super::errors::SeparationError;
use crate::config::{DeviceSettings, SeparatorSettings};
use crate::logging::JobLogger;
use crate::tools::ToolCommand;

/// Everything a backend needs for one invocation.
#[derive(Debug, Clone)]
pub struct SeparationInvocation {
    pub stage: StageDescriptor,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub output_format: String,
    pub profile: Profile,
    pub parameters: StageParameters,
}

/// What a backend observed while running a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutcome {
    /// Whether the tool reported success.
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Tool output used for exhaustion detection and error reports.
    pub diagnostics: String,
}

impl BackendOutcome {
    pub fn succeeded(diagnostics: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn failed(exit_code: Option<i32>, diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Runs a separation model.
#[async_trait]
pub trait SeparatorBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Apply the stage model to the input.
    ///
    /// `Err` is reserved for failures that no retry can fix, such as the
    /// tool not being installed.
    async fn separate(
        &self,
        invocation: &SeparationInvocation,
        logger: &JobLogger,
    ) -> Result<BackendOutcome, SeparationError>;

    /// Return cached device memory. Called around every stage.
    fn reclaim_device(&self);
}

/// Runs the `audio-separator` CLI once per stage.
#[derive(Debug, Clone)]
pub struct SubprocessSeparator {
    program: String,
    model_dir: Option<String>,
    normalization: f64,
    allocator: Option<(String, String)>,
}

impl SubprocessSeparator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            model_dir: None,
            normalization: 0.9,
            allocator: None,
        }
    }

    pub fn from_settings(separator: &SeparatorSettings, device: &DeviceSettings) -> Self {
        let separator_cmd = Self {
            program: separator.program.clone(),
            model_dir: separator.model_dir.clone(),
            normalization: separator.normalization,
            allocator: None,
        };
        match &device.allocator_config {
            Some(value) => separator_cmd.with_allocator(&device.allocator_env, value),
            None => separator_cmd,
        }
    }

    /// Pass allocator tuning to every child through `env_var`.
    pub fn with_allocator(mut self, env_var: impl Into<String>, value: impl Into<String>) -> Self {
        self.allocator = Some((env_var.into(), value.into()));
        self
    }

    /// Build the command line for one invocation.
    pub fn command(&self, invocation: &SeparationInvocation) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.program)
            .arg(invocation.input.as_os_str())
            .arg("-m")
            .arg(invocation.stage.model_identifier)
            .arg("--output_dir")
            .arg(invocation.output_dir.as_os_str())
            .arg(format!("--output_format={}", invocation.output_format))
            .arg(format!("--normalization={}", self.normalization));

        if let Some(dir) = &self.model_dir {
            cmd = cmd.arg("--model_file_dir").arg(dir);
        }

        let batch = invocation.parameters.batch_size;
        cmd = match invocation.parameters.family {
            FamilyParameters::Mdx {
                segment_size,
                overlap,
            } => cmd
                .arg(format!("--mdx_segment_size={}", segment_size))
                .arg(format!("--mdx_overlap={}", overlap))
                .arg(format!("--mdx_batch_size={}", batch)),
            FamilyParameters::Vr {
                window_size,
                aggression,
            } => cmd
                .arg(format!("--vr_window_size={}", window_size))
                .arg(format!("--vr_aggression={}", aggression))
                .arg(format!("--vr_batch_size={}", batch)),
        };

        if let Some((key, value)) = &self.allocator {
            cmd = cmd.env(key, value);
        }

        cmd
    }
}

#[async_trait]
impl SeparatorBackend for SubprocessSeparator {
    fn name(&self) -> &str {
        &self.program
    }

    async fn separate(
        &self,
        invocation: &SeparationInvocation,
        logger: &JobLogger,
    ) -> Result<BackendOutcome, SeparationError> {
        let output = self
            .command(invocation)
            .output(Some(logger))
            .await
            .map_err(|e| {
                SeparationError::stage_failed(invocation.stage.stage_name, None, e.to_string(), false)
            })?;

        if output.success() {
            Ok(BackendOutcome::succeeded(output.combined()))
        } else {
            Ok(BackendOutcome::failed(
                Some(output.exit_code),
                output.combined(),
            ))
        }
    }

    fn reclaim_device(&self) {
        // Device memory belongs to the child and is freed when it exits.
        tracing::trace!("{}: nothing to reclaim in-process", self.program);
    }
}

/// A separation model linked into this process.
///
/// Implementations block; they are always called from the blocking pool.
pub trait SeparationModel: Send + Sync + 'static {
    /// Write the stage outputs into `invocation.output_dir`.
    ///
    /// Returns diagnostics on success and an error message on failure.
    fn run(&self, invocation: &SeparationInvocation) -> Result<String, String>;

    /// Free cached device memory.
    fn reclaim(&self) {}
}

/// Runs a `SeparationModel` on the blocking thread pool.
pub struct InProcessSeparator {
    model: Arc<dyn SeparationModel>,
}

impl InProcessSeparator {
    pub fn new(model: Arc<dyn SeparationModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl SeparatorBackend for InProcessSeparator {
    fn name(&self) -> &str {
        "in-process"
    }

    async fn separate(
        &self,
        invocation: &SeparationInvocation,
        logger: &JobLogger,
    ) -> Result<BackendOutcome, SeparationError> {
        let model = Arc::clone(&self.model);
        let owned = invocation.clone();
        logger.command(&format!(
            "separate {} with {}",
            invocation.input.display(),
            invocation.stage.model_identifier
        ));

        let result = tokio::task::spawn_blocking(move || model.run(&owned))
            .await
            .map_err(|e| {
                SeparationError::stage_failed(
                    invocation.stage.stage_name,
                    None,
                    format!("separation task aborted: {}", e),
                    false,
                )
            })?;

        Ok(match result {
            Ok(diagnostics) => {
                logger.tool_output(&diagnostics, "");
                BackendOutcome::succeeded(diagnostics)
            }
            Err(message) => {
                logger.tool_output("", &message);
                BackendOutcome::failed(None, message)
            }
        })
    }

    fn reclaim_device(&self) {
        self.model.reclaim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileSettings;
    use crate::separation::descriptor::STAGES;

    fn invocation(stage: usize, profile: &ProfileSettings) -> SeparationInvocation {
        SeparationInvocation {
            stage: STAGES[stage],
            input: PathBuf::from("/w/temp_1.mp3"),
            output_dir: PathBuf::from("/w"),
            output_format: "mp3".to_string(),
            profile: Profile::Standard,
            parameters: STAGES[stage].parameters(profile),
        }
    }

    fn args(cmd: &ToolCommand) -> Vec<String> {
        cmd.get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn mdx_command_uses_segment_flags() {
        let separator = SubprocessSeparator::new("audio-separator");
        let cmd = separator.command(&invocation(0, &ProfileSettings::standard()));
        let args = args(&cmd);

        assert_eq!(args[0], "/w/temp_1.mp3");
        assert_eq!(&args[1..3], &["-m", "Kim_Vocal_1.onnx"]);
        assert!(args.contains(&"--output_format=mp3".to_string()));
        assert!(args.contains(&"--normalization=0.9".to_string()));
        assert!(args.contains(&"--mdx_segment_size=256".to_string()));
        assert!(args.contains(&"--mdx_overlap=0.25".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--vr_")));
    }

    #[test]
    fn vr_command_uses_window_flags() {
        let separator = SubprocessSeparator::new("audio-separator");
        let cmd = separator.command(&invocation(1, &ProfileSettings::standard()));
        let args = args(&cmd);

        assert!(args.contains(&"--vr_window_size=320".to_string()));
        assert!(args.contains(&"--vr_aggression=10".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--mdx_")));
    }

    #[test]
    fn allocator_goes_to_child_env() {
        let settings = SeparatorSettings::default();
        let device = DeviceSettings::default();
        let separator = SubprocessSeparator::from_settings(&settings, &device);
        let cmd = separator.command(&invocation(0, &settings.standard));

        let env = cmd.get_envs();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].0, "PYTORCH_CUDA_ALLOC_CONF");
        assert!(env[0].1.contains("expandable_segments:True"));
    }

    #[test]
    fn allocator_can_be_disabled() {
        let settings = SeparatorSettings::default();
        let device = DeviceSettings {
            allocator_config: None,
            ..DeviceSettings::default()
        };
        let separator = SubprocessSeparator::from_settings(&settings, &device);
        let cmd = separator.command(&invocation(0, &settings.standard));
        assert!(cmd.get_envs().is_empty());

        let cmd = SubprocessSeparator::new("audio-separator")
            .with_allocator("ALLOC_CONF", "max_split_size_mb:64")
            .command(&invocation(0, &settings.standard));
        assert_eq!(
            cmd.get_envs(),
            &[("ALLOC_CONF".to_string(), "max_split_size_mb:64".to_string())]
        );
    }

    struct FailingModel;

    impl SeparationModel for FailingModel {
        fn run(&self, _invocation: &SeparationInvocation) -> Result<String, String> {
            Err("CUDA out of memory".to_string())
        }
    }

    #[tokio::test]
    async fn in_process_failure_is_reported_as_outcome() {
        let backend = InProcessSeparator::new(Arc::new(FailingModel));
        let logger = JobLogger::in_memory("t", Default::default(), None);
        let outcome = backend
            .separate(&invocation(0, &ProfileSettings::standard()), &logger)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.diagnostics, "CUDA out of memory");
        assert_eq!(logger.get_tail(), vec!["CUDA out of memory"]);
    }
}
