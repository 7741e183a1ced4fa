//! Fakes shared by the request tests.
//!
//! Every fake writes content derived from its inputs, so two runs over the
//! same sources produce byte-identical files.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use cover_core::config::Settings;
use cover_core::external::{
    CompletionPayload, DownloadError, Notifier, NotifyError, ObjectStore, SourceFetcher,
    StoreError,
};
use cover_core::logging::JobLogger;
use cover_core::orchestrator::{Orchestrator, OrchestratorBuilder};
use cover_core::render::{
    EffectError, Mixer, PitchShifter, RenderCapabilities, ReverbProcessor, VoiceConverter,
};
use cover_core::separation::{
    expected_outputs, file_stem, InProcessSeparator, OutputRole, Profile, SeparationInvocation,
    SeparationModel,
};

pub const SOURCE_1: &str = "https://media.example/takes/one.mp3";
pub const SOURCE_2: &str = "https://media.example/takes/two.mp3";

/// Settings rooted in a scratch directory with no settle delay.
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.paths.temp_root = root.join("work").to_string_lossy().into_owned();
    settings.paths.logs_folder = root.join("logs").to_string_lossy().into_owned();
    settings.publish.store_root = root.join("bucket").to_string_lossy().into_owned();
    settings.separator.settle_delay_ms = 0;
    settings
}

/// Track index from a chain file name such as `temp_2_(Vocals)_...`.
fn track_of(input: &Path) -> usize {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.trim_start_matches("temp_")
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Separation model that writes every expected output.
#[derive(Default)]
pub struct FakeModel {
    /// `(track, stage)` that fails outright.
    pub fail: Option<(usize, &'static str)>,
    /// `(track, stage)` that runs out of device memory on its first attempt.
    pub exhaust_once: Option<(usize, &'static str)>,
    /// `(track, stage, role)` whose output is never written.
    pub skip: Option<(usize, &'static str, OutputRole)>,
    calls: Mutex<Vec<(usize, String, Profile)>>,
}

impl FakeModel {
    pub fn failing(track: usize, stage: &'static str) -> Self {
        Self {
            fail: Some((track, stage)),
            ..Self::default()
        }
    }

    pub fn exhausting_once(track: usize, stage: &'static str) -> Self {
        Self {
            exhaust_once: Some((track, stage)),
            ..Self::default()
        }
    }

    pub fn skipping(track: usize, stage: &'static str, role: OutputRole) -> Self {
        Self {
            skip: Some((track, stage, role)),
            ..Self::default()
        }
    }

    /// `(track, stage, profile)` of every invocation, in call order.
    pub fn calls(&self) -> Vec<(usize, String, Profile)> {
        self.calls.lock().clone()
    }
}

impl SeparationModel for FakeModel {
    fn run(&self, invocation: &SeparationInvocation) -> Result<String, String> {
        let stage = invocation.stage.stage_name;
        let track = track_of(&invocation.input);
        let attempts = {
            let mut calls = self.calls.lock();
            calls.push((track, stage.to_string(), invocation.profile));
            calls
                .iter()
                .filter(|(t, s, _)| *t == track && s == stage)
                .count()
        };

        if self.fail == Some((track, stage)) {
            return Err("RuntimeError: model crashed".to_string());
        }
        if self.exhaust_once == Some((track, stage)) && attempts == 1 {
            return Err("torch.cuda.OutOfMemoryError: CUDA out of memory".to_string());
        }

        let input = std::fs::read(&invocation.input).map_err(|e| e.to_string())?;
        let input_name = invocation
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let outputs = expected_outputs(
            stage,
            invocation.stage.model_identifier,
            file_stem(&input_name),
            &invocation.output_format,
        )
        .map_err(|e| e.to_string())?;

        for (role, name) in outputs.iter() {
            if self.skip == Some((track, stage, role)) {
                continue;
            }
            let mut content = format!("{}[{}](", stage, role).into_bytes();
            content.extend_from_slice(&input);
            content.push(b')');
            std::fs::write(invocation.output_dir.join(name), content)
                .map_err(|e| e.to_string())?;
        }
        Ok(format!("separated {}", input_name))
    }
}

fn wrap(tag: &str, input: &Path, output: &Path) -> Result<(), EffectError> {
    let mut content = format!("{}(", tag).into_bytes();
    content.extend_from_slice(&std::fs::read(input)?);
    content.push(b')');
    std::fs::write(output, content)?;
    Ok(())
}

/// Voice conversion that can fail at one offset.
#[derive(Default)]
pub struct FakeConverter {
    pub fail_at: Option<i32>,
}

#[async_trait]
impl VoiceConverter for FakeConverter {
    async fn convert(
        &self,
        voice_model_id: &str,
        input: &Path,
        output: &Path,
        pitch_offset: i32,
        _logger: &JobLogger,
    ) -> Result<(), EffectError> {
        if self.fail_at == Some(pitch_offset) {
            return Err(EffectError::Failed("conversion crashed".to_string()));
        }
        wrap(&format!("voice:{}:{}", voice_model_id, pitch_offset), input, output)
    }
}

pub struct FakeReverb;

#[async_trait]
impl ReverbProcessor for FakeReverb {
    async fn apply(
        &self,
        input: &Path,
        output: &Path,
        _logger: &JobLogger,
    ) -> Result<(), EffectError> {
        wrap("reverb", input, output)
    }
}

/// Pitch shifter that records the shifts it was asked for.
#[derive(Default)]
pub struct FakeShifter {
    pub shifts: Mutex<Vec<i32>>,
}

#[async_trait]
impl PitchShifter for FakeShifter {
    async fn shift(
        &self,
        input: &Path,
        output: &Path,
        semitones: i32,
        _logger: &JobLogger,
    ) -> Result<(), EffectError> {
        self.shifts.lock().push(semitones);
        wrap(&format!("shift:{}", semitones), input, output)
    }
}

pub struct FakeMixer;

#[async_trait]
impl Mixer for FakeMixer {
    async fn overlay(
        &self,
        vocal: &Path,
        bed: &Path,
        output: &Path,
        _logger: &JobLogger,
    ) -> Result<(), EffectError> {
        let mut content = b"mix(".to_vec();
        content.extend_from_slice(&std::fs::read(vocal)?);
        content.push(b'|');
        content.extend_from_slice(&std::fs::read(bed)?);
        content.push(b')');
        std::fs::write(output, content)?;
        Ok(())
    }
}

/// Reports success without writing the mix.
pub struct SilentMixer;

#[async_trait]
impl Mixer for SilentMixer {
    async fn overlay(
        &self,
        _vocal: &Path,
        _bed: &Path,
        _output: &Path,
        _logger: &JobLogger,
    ) -> Result<(), EffectError> {
        Ok(())
    }
}

/// Serves fixed bytes per URL; unknown URLs answer 404.
pub struct FakeFetcher {
    sources: HashMap<String, Vec<u8>>,
}

impl FakeFetcher {
    pub fn new(sources: &[(&str, &[u8])]) -> Self {
        Self {
            sources: sources
                .iter()
                .map(|(url, bytes)| (url.to_string(), bytes.to_vec()))
                .collect(),
        }
    }

    pub fn standard() -> Self {
        Self::new(&[(SOURCE_1, b"take-one"), (SOURCE_2, b"take-two")])
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let bytes = self.sources.get(url).ok_or(DownloadError::Status(404))?;
        tokio::fs::write(dest, bytes).await?;
        Ok(bytes.len() as u64)
    }
}

/// Keeps uploaded bytes in memory.
#[derive(Default)]
pub struct MemoryStore {
    pub fail: bool,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn objects(&self) -> BTreeMap<String, Vec<u8>> {
        self.objects.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, local_path: &Path, key: &str) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Status {
                key: key.to_string(),
                status: 503,
            });
        }
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| StoreError::Io {
                key: key.to_string(),
                source,
            })?;
        self.objects.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("mem://{}", key)
    }
}

/// Records every payload it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    payloads: Mutex<Vec<CompletionPayload>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn payloads(&self) -> Vec<CompletionPayload> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, payload: &CompletionPayload) -> Result<(), NotifyError> {
        self.payloads.lock().push(payload.clone());
        if self.fail {
            return Err(NotifyError::Status(500));
        }
        Ok(())
    }
}

/// All fakes wired into one orchestrator.
pub struct Harness {
    pub model: Arc<FakeModel>,
    pub converter: Arc<FakeConverter>,
    pub shifter: Arc<FakeShifter>,
    pub mixer: Arc<dyn Mixer>,
    pub fetcher: Arc<FakeFetcher>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            model: Arc::new(FakeModel::default()),
            converter: Arc::new(FakeConverter::default()),
            shifter: Arc::new(FakeShifter::default()),
            mixer: Arc::new(FakeMixer),
            fetcher: Arc::new(FakeFetcher::standard()),
            store: Arc::new(MemoryStore::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }
}

impl Harness {
    pub fn builder(&self, settings: Settings) -> OrchestratorBuilder {
        let model: Arc<dyn SeparationModel> = self.model.clone();
        Orchestrator::builder(settings)
            .separator_backend(Arc::new(InProcessSeparator::new(model)))
            .render_capabilities(RenderCapabilities {
                converter: self.converter.clone(),
                reverb: Arc::new(FakeReverb),
                shifter: self.shifter.clone(),
                mixer: self.mixer.clone(),
            })
            .fetcher(self.fetcher.clone())
            .store(self.store.clone())
            .notifier(self.notifier.clone())
    }

    pub fn orchestrator(&self, settings: Settings) -> Orchestrator {
        self.builder(settings).build().unwrap()
    }
}
