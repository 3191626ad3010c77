//! TOML configuration file loading
//!
//! Supports `~/.config/omni/lumen/config.toml` as a persistent config source.
//! All fields are optional, so the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LumenConfigFile {
    /// Capture and segmentation configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Supervised engine configuration
    #[serde(default)]
    pub engines: EnginesFileConfig,

    /// Synthesis and playback configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub recognizer: RecognizerFileConfig,

    /// Isolated runtime directory for engine subprocesses
    #[serde(default)]
    pub runtime_dir: Option<String>,
}

/// Capture and segmentation configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// RMS amplitude threshold for speech
    pub energy_threshold: Option<f32>,

    /// Minimum speech duration to accept a burst (ms)
    pub min_speech_ms: Option<u64>,

    /// Trailing silence duration that ends an utterance (ms)
    pub min_silence_ms: Option<u64>,

    /// Codecs considered unstable for capture (e.g. "cvsd")
    pub unstable_codecs: Option<Vec<String>>,

    /// Voice-capable card profile to negotiate
    pub voice_profile: Option<String>,

    /// Profile used for the codec renegotiation cycle
    pub fallback_profile: Option<String>,

    /// Keep a decoy monitor stream open against link power-saving
    pub shadow_monitor: Option<bool>,
}

/// Per-engine overrides
#[derive(Debug, Default, Deserialize)]
pub struct EnginesFileConfig {
    #[serde(default)]
    pub vision: Option<EngineFileConfig>,

    #[serde(default)]
    pub brain: Option<EngineFileConfig>,
}

/// Overrides for one supervised engine
#[derive(Debug, Default, Deserialize)]
pub struct EngineFileConfig {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub socket_path: Option<String>,
    pub ready_field: Option<String>,
    pub ready_value: Option<String>,
    pub response_timeout_secs: Option<u64>,
}

/// Synthesis and playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// External synthesizer command
    pub synth_command: Option<String>,

    /// Extra synthesizer arguments
    pub synth_args: Option<Vec<String>>,

    /// Synthesizer voice model path
    pub synth_model: Option<String>,

    /// Synthesizer native sample rate (Hz)
    pub synth_sample_rate: Option<u32>,

    /// External playback command and arguments
    pub player: Option<Vec<String>>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognizerFileConfig {
    /// External transcriber command
    pub command: Option<String>,

    /// Extra transcriber arguments
    pub args: Option<Vec<String>>,

    /// Transcriber model path
    pub model: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LumenConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LumenConfigFile {
    let Some(path) = config_file_path() else {
        return LumenConfigFile::default();
    };

    if !path.exists() {
        return LumenConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LumenConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LumenConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/lumen/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("lumen")
            .join("config.toml")
    })
}
