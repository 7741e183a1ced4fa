//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Every field carries a serde default so partial files load cleanly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Working, log and output directories.
    #[serde(default)]
    pub paths: PathSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Model-execution device settings.
    #[serde(default)]
    pub device: DeviceSettings,

    /// Stem separation tool settings.
    #[serde(default)]
    pub separator: SeparatorSettings,

    /// Voice conversion tool settings.
    #[serde(default)]
    pub conversion: ConversionSettings,

    /// Reverb, pitch shift and mixing settings.
    #[serde(default)]
    pub effects: EffectsSettings,

    /// Upload and completion notification settings.
    #[serde(default)]
    pub publish: PublishSettings,

    /// Pitch offsets per voice model.
    #[serde(default = "default_voice_models")]
    pub voice_models: BTreeMap<String, Vec<i32>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paths: PathSettings::default(),
            logging: LoggingSettings::default(),
            device: DeviceSettings::default(),
            separator: SeparatorSettings::default(),
            conversion: ConversionSettings::default(),
            effects: EffectsSettings::default(),
            publish: PublishSettings::default(),
            voice_models: default_voice_models(),
        }
    }
}

impl Settings {
    /// Pitch offsets configured for a voice model.
    ///
    /// Models without an entry render a single unshifted variant.
    pub fn pitch_offsets_for(&self, voice_model: &str) -> Vec<i32> {
        self.voice_models
            .get(voice_model)
            .filter(|offsets| !offsets.is_empty())
            .cloned()
            .unwrap_or_else(|| vec![0])
    }
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Root under which each request gets its own working directory.
    #[serde(default = "default_temp_root")]
    pub temp_root: String,

    /// Folder for per-request log files.
    #[serde(default = "default_logs_folder")]
    pub logs_folder: String,

    /// Keep the request working directory after a terminal outcome.
    #[serde(default)]
    pub keep_work_dir: bool,
}

fn default_temp_root() -> String {
    ".temp".to_string()
}

fn default_logs_folder() -> String {
    ".logs".to_string()
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            temp_root: default_temp_root(),
            logs_folder: default_logs_folder(),
            keep_work_dir: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is not set.
    #[serde(default)]
    pub level: LogLevel,

    /// Keep tool output out of the request log unless a step fails.
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Number of tool output lines kept for error diagnosis.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,
}

fn default_true() -> bool {
    true
}

fn default_error_tail() -> u32 {
    40
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            compact: true,
            error_tail: default_error_tail(),
        }
    }
}

/// Model-execution device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Number of model invocations allowed to hold the device at once.
    #[serde(default = "default_device_permits")]
    pub permits: usize,

    /// Allocator tuning handed to every model process.
    #[serde(default = "default_allocator_config")]
    pub allocator_config: Option<String>,

    /// Environment variable the allocator tuning is passed through.
    #[serde(default = "default_allocator_env")]
    pub allocator_env: String,
}

fn default_device_permits() -> usize {
    1
}

fn default_allocator_config() -> Option<String> {
    Some(
        "expandable_segments:True,max_split_size_mb:128,garbage_collection_threshold:0.8,roundup_power2_divisions:32"
            .to_string(),
    )
}

fn default_allocator_env() -> String {
    "PYTORCH_CUDA_ALLOC_CONF".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            permits: default_device_permits(),
            allocator_config: default_allocator_config(),
            allocator_env: default_allocator_env(),
        }
    }
}

/// Which separator implementation runs the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparatorBackendKind {
    /// Spawn the separation CLI once per stage.
    #[default]
    Subprocess,
    /// Call a model runtime linked into this process.
    InProcess,
}

/// Tunable resource parameters for one separator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub batch_size: u32,
    pub mdx_segment_size: u32,
    pub mdx_overlap: f64,
    pub vr_window_size: u32,
    pub vr_aggression: u32,
}

impl ProfileSettings {
    /// Parameters used for a first attempt.
    pub fn standard() -> Self {
        Self {
            batch_size: 2,
            mdx_segment_size: 256,
            mdx_overlap: 0.25,
            vr_window_size: 320,
            vr_aggression: 10,
        }
    }

    /// Parameters used when retrying after device memory exhaustion.
    pub fn minimal() -> Self {
        Self {
            batch_size: 1,
            mdx_segment_size: 64,
            mdx_overlap: 0.01,
            vr_window_size: 192,
            vr_aggression: 10,
        }
    }
}

fn default_standard_profile() -> ProfileSettings {
    ProfileSettings::standard()
}

fn default_minimal_profile() -> ProfileSettings {
    ProfileSettings::minimal()
}

/// Stem separation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparatorSettings {
    #[serde(default)]
    pub backend: SeparatorBackendKind,

    /// Separation CLI executable.
    #[serde(default = "default_separator_program")]
    pub program: String,

    /// Directory holding the separation model files.
    #[serde(default)]
    pub model_dir: Option<String>,

    /// Output container/extension for every stage.
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Peak normalization threshold.
    #[serde(default = "default_normalization")]
    pub normalization: f64,

    /// Pause after every successful stage, in milliseconds.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Keep per-stage intermediate files after finalization.
    #[serde(default)]
    pub keep_intermediates: bool,

    /// Lowercase substrings in tool output that indicate device memory exhaustion.
    #[serde(default = "default_exhaustion_markers")]
    pub exhaustion_markers: Vec<String>,

    /// Parameters for the first attempt of every stage.
    #[serde(default = "default_standard_profile")]
    pub standard: ProfileSettings,

    /// Parameters for the single retry after device memory exhaustion.
    #[serde(default = "default_minimal_profile")]
    pub minimal: ProfileSettings,
}

fn default_separator_program() -> String {
    "audio-separator".to_string()
}

fn default_output_format() -> String {
    "mp3".to_string()
}

fn default_normalization() -> f64 {
    0.9
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_exhaustion_markers() -> Vec<String> {
    vec![
        "out of memory".to_string(),
        "outofmemoryerror".to_string(),
        "cudnn_status_alloc_failed".to_string(),
    ]
}

impl Default for SeparatorSettings {
    fn default() -> Self {
        Self {
            backend: SeparatorBackendKind::default(),
            program: default_separator_program(),
            model_dir: None,
            output_format: default_output_format(),
            normalization: default_normalization(),
            settle_delay_ms: default_settle_delay_ms(),
            keep_intermediates: false,
            exhaustion_markers: default_exhaustion_markers(),
            standard: ProfileSettings::standard(),
            minimal: ProfileSettings::minimal(),
        }
    }
}

/// Voice conversion configuration.
///
/// The algorithm parameters are fixed per deployment, never per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Conversion executable.
    #[serde(default = "default_conversion_program")]
    pub program: String,

    /// Arguments placed before the per-call arguments.
    #[serde(default = "default_conversion_args")]
    pub base_args: Vec<String>,

    /// Directory holding one subdirectory per voice model.
    #[serde(default = "default_models_dir")]
    pub models_dir: String,

    #[serde(default = "default_f0_method")]
    pub f0_method: String,

    #[serde(default = "default_index_rate")]
    pub index_rate: f64,

    #[serde(default = "default_filter_radius")]
    pub filter_radius: u32,

    #[serde(default = "default_rms_mix_rate")]
    pub rms_mix_rate: f64,

    #[serde(default = "default_protect")]
    pub protect: f64,

    #[serde(default = "default_crepe_hop_length")]
    pub crepe_hop_length: u32,
}

fn default_conversion_program() -> String {
    "python".to_string()
}

fn default_conversion_args() -> Vec<String> {
    vec!["-m".to_string(), "rvc_infer".to_string()]
}

fn default_models_dir() -> String {
    "rvc_models".to_string()
}

fn default_f0_method() -> String {
    "rmvpe".to_string()
}

fn default_index_rate() -> f64 {
    0.66
}

fn default_filter_radius() -> u32 {
    3
}

fn default_rms_mix_rate() -> f64 {
    0.25
}

fn default_protect() -> f64 {
    0.33
}

fn default_crepe_hop_length() -> u32 {
    128
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            program: default_conversion_program(),
            base_args: default_conversion_args(),
            models_dir: default_models_dir(),
            f0_method: default_f0_method(),
            index_rate: default_index_rate(),
            filter_radius: default_filter_radius(),
            rms_mix_rate: default_rms_mix_rate(),
            protect: default_protect(),
            crepe_hop_length: default_crepe_hop_length(),
        }
    }
}

/// Fixed reverb preset applied to every converted vocal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverbPreset {
    /// Room size, percent.
    pub size: f64,
    /// High-frequency damping, percent.
    pub damp: f64,
    /// Pre-delay in seconds.
    pub delay_secs: f64,
    /// Reverberance/diffusion, percent.
    pub diffuse: f64,
    /// Stereo depth, percent.
    pub stereo: f64,
    /// Dry level, percent.
    pub dry: f64,
    /// Wet level, percent.
    pub wet: f64,
}

impl Default for ReverbPreset {
    fn default() -> Self {
        Self {
            size: 55.0,
            damp: 20.0,
            delay_secs: 0.1,
            diffuse: 100.0,
            stereo: 100.0,
            dry: 100.0,
            wet: 35.0,
        }
    }
}

/// Reverb, pitch shift and mix tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectsSettings {
    #[serde(default = "default_sox_program")]
    pub sox_program: String,

    #[serde(default = "default_ffmpeg_program")]
    pub ffmpeg_program: String,

    #[serde(default)]
    pub reverb: ReverbPreset,
}

fn default_sox_program() -> String {
    "sox".to_string()
}

fn default_ffmpeg_program() -> String {
    "ffmpeg".to_string()
}

impl Default for EffectsSettings {
    fn default() -> Self {
        Self {
            sox_program: default_sox_program(),
            ffmpeg_program: default_ffmpeg_program(),
            reverb: ReverbPreset::default(),
        }
    }
}

/// Where published renders go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Copy into a local directory acting as the bucket.
    #[default]
    Local,
    /// HTTP PUT to `<store_url>/<key>`.
    Http,
}

/// Upload and completion notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    #[serde(default)]
    pub store: StoreKind,

    /// Bucket directory for the local store.
    #[serde(default = "default_store_root")]
    pub store_root: String,

    /// Base URL for the HTTP store.
    #[serde(default)]
    pub store_url: Option<String>,

    /// Key prefix; keys are `<prefix>/<request_id>/<file name>`.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Public URL prefix used in the completion payload.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Completion webhook. No notification is sent when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// HTTP timeout for uploads and notifications, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_store_root() -> String {
    "published".to_string()
}

fn default_key_prefix() -> String {
    "song-requests".to_string()
}

fn default_http_timeout_secs() -> u64 {
    120
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            store_root: default_store_root(),
            store_url: None,
            key_prefix: default_key_prefix(),
            public_base_url: None,
            webhook_url: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_voice_models() -> BTreeMap<String, Vec<i32>> {
    let table: &[(&str, &[i32])] = &[
        ("akmu_suhyeon", &[0, 1]),
        ("baekyerin", &[0, 1]),
        ("bol4", &[0, 1, 2]),
        ("imchangjung", &[0, 1, 2]),
        ("isu", &[1, 2, 3]),
        ("iu_new", &[0, 1, 2]),
        ("jannabi", &[-1, 0, 1]),
        ("kgs", &[-3, -2, -1, 0]),
        ("kimdr", &[-3, -2, -1, 0]),
        ("ljb", &[-1, 0, 1]),
        ("minkyunghoon", &[0, 1]),
        ("naul", &[1, 2]),
        ("newjeans_danielle", &[0, 1]),
        ("newjeans_haerin", &[0, 1]),
        ("newjeans_hanni", &[0, 1]),
        ("newjeans_hein", &[0, 1]),
        ("newjeans_minji", &[0, 1]),
        ("nmixx_haewon", &[0, 1]),
        ("nmixx_sullyoon", &[0, 1]),
        ("ohyuk_v2", &[-1, 0, 1]),
        ("parkhyosin12_v2", &[-1, 0, 1]),
        ("phs03", &[0, 1]),
        ("ssh", &[0, 1]),
        ("ssk", &[-2, -1, 0]),
        ("taeyeon", &[0, 1]),
        ("yb_v2", &[0, 1, 2]),
        ("yunha", &[0, 1]),
    ];

    table
        .iter()
        .map(|(name, offsets)| (name.to_string(), offsets.to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_table() {
        let settings = Settings::default();
        assert_eq!(settings.pitch_offsets_for("ljb"), vec![-1, 0, 1]);
        assert_eq!(settings.pitch_offsets_for("ssk"), vec![-2, -1, 0]);
    }

    #[test]
    fn unknown_model_falls_back_to_zero() {
        let settings = Settings::default();
        assert_eq!(settings.pitch_offsets_for("nobody"), vec![0]);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str("[separator]\nsettle_delay_ms = 0\n").unwrap();
        assert_eq!(settings.separator.settle_delay_ms, 0);
        assert_eq!(settings.separator.program, "audio-separator");
        assert_eq!(settings.device.permits, 1);
        assert_eq!(settings.pitch_offsets_for("ljb"), vec![-1, 0, 1]);
    }
}
