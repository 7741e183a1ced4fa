//! Request orchestration: download, separate, render and publish every
//! track, then announce the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc::UnboundedSender;

use super::cancel::CancelHandle;
use super::errors::{RequestError, TrackError};
use super::types::{RequestOutcome, TrackOutcome, TrackReport};
use crate::config::{SeparatorBackendKind, Settings, StoreKind};
use crate::device::DeviceGate;
use crate::external::{
    http_client, CompletionPayload, HttpFetcher, HttpObjectStore, LocalObjectStore, Notifier,
    ObjectStore, SourceFetcher, WebhookNotifier,
};
use crate::logging::{JobLogger, LogConfig};
use crate::models::{AudioPair, Job, RenderStep, RenderVariant, RequestEvent, Track};
use crate::render::{
    CoverRenderer, FfmpegMixer, RenderCapabilities, SoxPitchShifter, SoxReverb,
    SubprocessConverter,
};
use crate::separation::{
    ExecutorSettings, SeparationPipeline, SeparatorBackend, StageExecutor, SubprocessSeparator,
};

/// Paths and publishing options the orchestrator itself uses.
#[derive(Debug, Clone)]
struct RequestSettings {
    temp_root: PathBuf,
    logs_folder: Option<PathBuf>,
    keep_work_dir: bool,
    key_prefix: String,
    public_base_url: Option<String>,
    log_config: LogConfig,
}

/// Processes song requests end to end.
pub struct Orchestrator {
    separation: SeparationPipeline,
    renderer: CoverRenderer,
    fetcher: Arc<dyn SourceFetcher>,
    store: Arc<dyn ObjectStore>,
    notifier: Option<Arc<dyn Notifier>>,
    settings: RequestSettings,
}

impl Orchestrator {
    /// Start building from settings. Collaborators not supplied are
    /// created from the settings.
    pub fn builder(settings: Settings) -> OrchestratorBuilder {
        OrchestratorBuilder::new(settings)
    }

    /// Working directory of a request.
    pub fn work_dir(&self, request_id: &str) -> PathBuf {
        self.settings.temp_root.join(request_id)
    }

    /// Process every track of `job`.
    ///
    /// Emits `TrackCompleted` or `TrackFailed` per track as soon as it is
    /// done, then `AllCompleted`. Processing failures are reported in the
    /// outcome; upload and notification failures make the whole request
    /// `RequestDeliveryFailed`.
    pub async fn process_request(
        &self,
        job: &Job,
        events: &UnboundedSender<RequestEvent>,
        cancel: &CancelHandle,
    ) -> Result<RequestOutcome, RequestError> {
        let request_id = job.request_id();
        let work_dir = self.work_dir(request_id);
        tokio::fs::create_dir_all(&work_dir).await.map_err(|e| {
            RequestError::setup(format!("creating {}: {}", work_dir.display(), e))
        })?;

        let logger = Arc::new(self.request_logger(request_id)?);
        logger.phase(&format!(
            "Request {} ({} tracks, model {}, offsets {:?})",
            request_id,
            job.track_count(),
            job.voice_model_id(),
            job.pitch_offsets()
        ));
        tracing::info!(request_id, model = job.voice_model_id(), "Processing request");

        let mut pending: FuturesUnordered<_> = (1..=job.track_count())
            .map(|index| {
                let logger = Arc::clone(&logger);
                let work_dir = work_dir.clone();
                async move {
                    let result = self
                        .process_track(job, index, &work_dir, cancel, &logger)
                        .await;
                    TrackOutcome {
                        track_index: index,
                        result,
                    }
                }
            })
            .collect();

        let mut outcome = RequestOutcome::new(request_id);
        while let Some(track) = pending.next().await {
            let event = match &track.result {
                Ok(report) => {
                    logger.success(&format!("Track {} completed", report.track_index));
                    RequestEvent::TrackCompleted {
                        request_id: request_id.to_string(),
                        track_index: report.track_index,
                        variants: report.variants.clone(),
                        failures: report.failures.clone(),
                        published: report.published.clone(),
                    }
                }
                Err(err) => {
                    logger.error(&err.to_string());
                    tracing::error!(request_id, track = track.track_index, "{}", err);
                    RequestEvent::TrackFailed {
                        request_id: request_id.to_string(),
                        track_index: track.track_index,
                        error: err.to_string(),
                    }
                }
            };
            emit(events, event);
            outcome.tracks.push(track);
        }
        drop(pending);

        emit(
            events,
            RequestEvent::AllCompleted {
                request_id: request_id.to_string(),
                completed: outcome.completed_indices(),
                failed: outcome.failed_indices(),
            },
        );

        let delivery = self.deliver(job, &mut outcome, &logger).await;
        logger.close();
        self.cleanup(&work_dir).await;

        match delivery {
            Ok(()) => Ok(outcome),
            Err(message) => {
                emit(
                    events,
                    RequestEvent::DeliveryFailed {
                        request_id: request_id.to_string(),
                        message: message.clone(),
                    },
                );
                Err(RequestError::RequestDeliveryFailed {
                    request_id: request_id.to_string(),
                    message,
                    outcome: Box::new(outcome),
                })
            }
        }
    }

    async fn process_track(
        &self,
        job: &Job,
        index: usize,
        work_dir: &Path,
        cancel: &CancelHandle,
        logger: &JobLogger,
    ) -> Result<TrackReport, TrackError> {
        if cancel.is_cancelled() {
            return Err(TrackError::Cancelled { track_index: index });
        }

        let url = job.source_url(index).unwrap_or_default();
        let source = work_dir.join(format!("source_{}.{}", index, url_extension(url)));
        logger.phase(&format!("Track {}: download", index));
        self.fetcher
            .fetch(url, &source)
            .await
            .map_err(|source| TrackError::Download {
                track_index: index,
                source,
            })?;

        logger.phase(&format!("Track {}: separation", index));
        let track = Track::new(index, source, work_dir);
        let separation = self
            .separation
            .separate(&track, cancel, logger)
            .await
            .map_err(|source| TrackError::Separation {
                track_index: index,
                source,
            })?;

        logger.phase(&format!("Track {}: render", index));
        let rendered = self
            .renderer
            .render(
                &separation,
                job.voice_model_id(),
                job.pitch_offsets(),
                cancel,
                logger,
            )
            .await;
        if rendered.variants.is_empty() {
            let cancelled = !rendered.failures.is_empty()
                && rendered
                    .failures
                    .iter()
                    .all(|f| f.step == RenderStep::Cancelled);
            if cancelled {
                return Err(TrackError::Cancelled { track_index: index });
            }
            return Err(TrackError::NoVariants {
                track_index: index,
                failures: rendered.failures.len(),
            });
        }

        logger.phase(&format!("Track {}: publish", index));
        let mut published = Vec::with_capacity(rendered.variants.len());
        for variant in &rendered.variants {
            published.push(self.publish_variant(job.request_id(), variant).await?);
        }
        published.sort_by_key(|p| p.pitch_offset);

        Ok(TrackReport {
            track_index: index,
            separation,
            variants: rendered.variants,
            failures: rendered.failures,
            published,
        })
    }

    /// Upload a variant's mix and its vocal/bed pair.
    async fn publish_variant(
        &self,
        request_id: &str,
        variant: &RenderVariant,
    ) -> Result<AudioPair, TrackError> {
        let track = variant.track_index;
        let mr_url = self
            .upload(request_id, track, &variant.pitched_instrumental_path)
            .await?;
        let vocal_url = self
            .upload(request_id, track, &variant.reverberated_vocal_path)
            .await?;
        let result_url = self
            .upload(request_id, track, &variant.mixed_output_path)
            .await?;

        Ok(AudioPair {
            track_index: track,
            pitch_offset: variant.pitch_offset,
            mr_url,
            vocal_url,
            result_url,
        })
    }

    async fn upload(
        &self,
        request_id: &str,
        track_index: usize,
        path: &Path,
    ) -> Result<String, TrackError> {
        let key = self.object_key(request_id, path);
        self.store
            .put(path, &key)
            .await
            .map_err(|source| TrackError::Upload {
                track_index,
                source,
            })?;
        tracing::debug!(key = %key, "Uploaded {}", path.display());
        Ok(self.public_url(&key))
    }

    fn object_key(&self, request_id: &str, path: &Path) -> String {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = self.settings.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{}", request_id, file_name)
        } else {
            format!("{}/{}/{}", prefix, request_id, file_name)
        }
    }

    fn public_url(&self, key: &str) -> String {
        match &self.settings.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => self.store.url_for(key),
        }
    }

    /// Report upload failures and send the completion notification.
    async fn deliver(
        &self,
        job: &Job,
        outcome: &mut RequestOutcome,
        logger: &JobLogger,
    ) -> Result<(), String> {
        let upload_failures: Vec<String> = outcome
            .failed()
            .filter(|e| e.is_delivery_failure())
            .map(|e| e.to_string())
            .collect();
        if !upload_failures.is_empty() {
            return Err(upload_failures.join("; "));
        }

        let Some(notifier) = &self.notifier else {
            return Ok(());
        };
        let pairs = outcome.audio_pairs();
        if pairs.is_empty() {
            logger.warn("Nothing was published, skipping completion notification");
            return Ok(());
        }

        let payload = CompletionPayload {
            song_request_id: job.request_id().to_string(),
            audio_pair_list: pairs,
            song_title: job.metadata().song_title.clone(),
            requested_by: job.metadata().requested_by.clone(),
        };
        logger.phase("Notify");
        match notifier.notify(&payload).await {
            Ok(()) => {
                outcome.notified = true;
                logger.success("Completion notification sent");
                Ok(())
            }
            Err(e) => {
                logger.error(&format!("Completion notification failed: {}", e));
                Err(e.to_string())
            }
        }
    }

    fn request_logger(&self, request_id: &str) -> Result<JobLogger, RequestError> {
        match &self.settings.logs_folder {
            Some(dir) => JobLogger::new(request_id, dir, self.settings.log_config.clone(), None)
                .map_err(|e| RequestError::setup(format!("opening request log: {}", e))),
            None => Ok(JobLogger::in_memory(
                request_id,
                self.settings.log_config.clone(),
                None,
            )),
        }
    }

    async fn cleanup(&self, work_dir: &Path) {
        if self.settings.keep_work_dir {
            tracing::debug!("Keeping working directory {}", work_dir.display());
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
            tracing::warn!("Failed to remove {}: {}", work_dir.display(), e);
        }
    }
}

fn emit(events: &UnboundedSender<RequestEvent>, event: RequestEvent) {
    if events.send(event).is_err() {
        tracing::debug!("Event receiver dropped");
    }
}

/// Audio extension of a source URL, defaulting to mp3.
fn url_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "mp3".to_string())
}

/// Assembles an `Orchestrator`, filling unset collaborators from settings.
pub struct OrchestratorBuilder {
    settings: Settings,
    backend: Option<Arc<dyn SeparatorBackend>>,
    capabilities: Option<RenderCapabilities>,
    fetcher: Option<Arc<dyn SourceFetcher>>,
    store: Option<Arc<dyn ObjectStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    request_log: bool,
}

impl OrchestratorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            backend: None,
            capabilities: None,
            fetcher: None,
            store: None,
            notifier: None,
            request_log: true,
        }
    }

    /// Use this separator instead of the configured one.
    pub fn separator_backend(mut self, backend: Arc<dyn SeparatorBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn render_capabilities(mut self, capabilities: RenderCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Write `<logs>/<request_id>.log` (on by default).
    pub fn request_log(mut self, enabled: bool) -> Self {
        self.request_log = enabled;
        self
    }

    pub fn build(self) -> Result<Orchestrator, RequestError> {
        let s = self.settings;
        let gate = DeviceGate::new(s.device.permits);

        let needs_http = self.fetcher.is_none()
            || (self.store.is_none() && s.publish.store == StoreKind::Http)
            || (self.notifier.is_none() && s.publish.webhook_url.is_some());
        let client = if needs_http {
            Some(
                http_client(Duration::from_secs(s.publish.http_timeout_secs))
                    .map_err(|e| RequestError::setup(format!("building HTTP client: {}", e)))?,
            )
        } else {
            None
        };

        let backend: Arc<dyn SeparatorBackend> = match (self.backend, s.separator.backend) {
            (Some(backend), _) => backend,
            (None, SeparatorBackendKind::Subprocess) => {
                Arc::new(SubprocessSeparator::from_settings(&s.separator, &s.device))
            }
            (None, SeparatorBackendKind::InProcess) => {
                return Err(RequestError::setup(
                    "the in-process separator needs a linked model; supply one with separator_backend()",
                ))
            }
        };
        let executor =
            StageExecutor::new(backend, gate.clone(), ExecutorSettings::from(&s.separator));
        let separation =
            SeparationPipeline::new(executor).keep_intermediates(s.separator.keep_intermediates);

        let capabilities = self.capabilities.unwrap_or_else(|| RenderCapabilities {
            converter: Arc::new(SubprocessConverter::from_settings(&s.conversion, &s.device)),
            reverb: Arc::new(SoxReverb::from_settings(&s.effects)),
            shifter: Arc::new(SoxPitchShifter::new(&s.effects.sox_program)),
            mixer: Arc::new(FfmpegMixer::new(&s.effects.ffmpeg_program)),
        });
        let renderer = CoverRenderer::new(capabilities, gate, &s.separator.output_format);

        let fetcher: Arc<dyn SourceFetcher> = match (self.fetcher, &client) {
            (Some(fetcher), _) => fetcher,
            (None, Some(client)) => Arc::new(HttpFetcher::new(client.clone())),
            (None, None) => return Err(RequestError::setup("no source fetcher available")),
        };

        let store: Arc<dyn ObjectStore> = match (self.store, s.publish.store) {
            (Some(store), _) => store,
            (None, StoreKind::Local) => Arc::new(LocalObjectStore::new(&s.publish.store_root)),
            (None, StoreKind::Http) => {
                let (Some(url), Some(client)) = (&s.publish.store_url, &client) else {
                    return Err(RequestError::setup(
                        "publish.store_url is required for the http store",
                    ));
                };
                Arc::new(HttpObjectStore::new(client.clone(), url.clone()))
            }
        };

        let notifier: Option<Arc<dyn Notifier>> = match (self.notifier, &s.publish.webhook_url) {
            (Some(notifier), _) => Some(notifier),
            (None, Some(url)) => client.as_ref().map(|c| {
                Arc::new(WebhookNotifier::new(c.clone(), url.clone())) as Arc<dyn Notifier>
            }),
            (None, None) => None,
        };

        let settings = RequestSettings {
            temp_root: PathBuf::from(&s.paths.temp_root),
            logs_folder: self
                .request_log
                .then(|| PathBuf::from(&s.paths.logs_folder)),
            keep_work_dir: s.paths.keep_work_dir,
            key_prefix: s.publish.key_prefix.clone(),
            public_base_url: s.publish.public_base_url.clone(),
            log_config: LogConfig::from(&s.logging),
        };

        Ok(Orchestrator {
            separation,
            renderer,
            fetcher,
            store,
            notifier,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_extension_from_path() {
        assert_eq!(url_extension("https://cdn/x/song.wav?sig=1"), "wav");
        assert_eq!(url_extension("https://cdn/x/song"), "mp3");
        assert_eq!(url_extension("https://cdn/x/song.MP3"), "mp3");
        assert_eq!(url_extension("https://cdn/a.b/stream"), "mp3");
    }

    #[test]
    fn in_process_backend_requires_a_model() {
        let mut settings = Settings::default();
        settings.separator.backend = SeparatorBackendKind::InProcess;
        let err = Orchestrator::builder(settings).build().err().unwrap();
        assert!(matches!(err, RequestError::Setup { .. }));
    }

    #[test]
    fn object_keys_are_prefixed_by_request() {
        let orchestrator = Orchestrator::builder(Settings::default())
            .request_log(false)
            .build()
            .unwrap();
        assert_eq!(
            orchestrator.object_key("r1", Path::new("/w/[0]1_result.mp3")),
            "song-requests/r1/[0]1_result.mp3"
        );
    }
}
