//! Configuration management for the Lumen controller

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineConfig;

/// Lumen controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Capture and segmentation configuration
    pub audio: AudioConfig,

    /// Vision engine (scene queries, asynchronous push responses)
    pub vision: EngineConfig,

    /// Language engine (transcript to intent)
    pub brain: EngineConfig,

    /// Synthesis and playback configuration
    pub speech: SpeechConfig,

    /// Speech recognition configuration
    pub recognizer: RecognizerConfig,
}

/// Capture and segmentation configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// RMS amplitude threshold for speech
    pub energy_threshold: f32,

    /// Minimum speech duration to accept a burst (ms)
    pub min_speech_ms: u64,

    /// Trailing silence duration that ends an utterance (ms)
    pub min_silence_ms: u64,

    /// Codecs considered unstable for capture
    pub unstable_codecs: Vec<String>,

    /// Voice-capable card profile to negotiate
    pub voice_profile: String,

    /// Profile used for the codec renegotiation cycle
    pub fallback_profile: String,

    /// Keep a decoy monitor stream open against link power-saving
    pub shadow_monitor: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            min_speech_ms: 300,
            min_silence_ms: 800,
            unstable_codecs: vec!["cvsd".to_string()],
            voice_profile: "headset-head-unit".to_string(),
            fallback_profile: "a2dp-sink".to_string(),
            shadow_monitor: true,
        }
    }
}

/// Synthesis and playback configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// External synthesizer command
    pub synth_command: String,

    /// Extra synthesizer arguments
    pub synth_args: Vec<String>,

    /// Synthesizer voice model path (checked at startup when set)
    pub synth_model: Option<PathBuf>,

    /// Synthesizer native sample rate (Hz)
    pub synth_sample_rate: u32,

    /// External playback command and arguments
    pub player: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            synth_command: "piper".to_string(),
            synth_args: vec!["--output-raw".to_string()],
            synth_model: None,
            synth_sample_rate: 22050,
            player: vec!["paplay".to_string()],
        }
    }
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// External transcriber command
    pub command: String,

    /// Extra transcriber arguments
    pub args: Vec<String>,

    /// Transcriber model path (checked at startup when set)
    pub model: Option<PathBuf>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            command: "whisper-cli".to_string(),
            args: vec!["-np".to_string(), "-nt".to_string()],
            model: None,
        }
    }
}

impl Config {
    /// Load configuration with priority: env > config file > defaults
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();

        let runtime_dir = std::env::var("LUMEN_RUNTIME_DIR")
            .ok()
            .or(fc.runtime_dir)
            .map(PathBuf::from);

        let audio_defaults = AudioConfig::default();
        let audio = AudioConfig {
            energy_threshold: fc
                .audio
                .energy_threshold
                .unwrap_or(audio_defaults.energy_threshold),
            min_speech_ms: fc.audio.min_speech_ms.unwrap_or(audio_defaults.min_speech_ms),
            min_silence_ms: fc
                .audio
                .min_silence_ms
                .unwrap_or(audio_defaults.min_silence_ms),
            unstable_codecs: fc
                .audio
                .unstable_codecs
                .unwrap_or(audio_defaults.unstable_codecs),
            voice_profile: fc.audio.voice_profile.unwrap_or(audio_defaults.voice_profile),
            fallback_profile: fc
                .audio
                .fallback_profile
                .unwrap_or(audio_defaults.fallback_profile),
            shadow_monitor: fc
                .audio
                .shadow_monitor
                .unwrap_or(audio_defaults.shadow_monitor),
        };

        let vision = engine_config(
            EngineConfig::new("vision", "lumen-vision", "/tmp/lumen_vision.sock"),
            "LUMEN_VISION_CMD",
            fc.engines.vision,
            runtime_dir.as_deref(),
        );

        let brain = {
            let mut base = EngineConfig::new("brain", "lumen-brain", "/tmp/lumen_brain.sock");
            // The language engine signals readiness on the intent field
            base.ready_field = "intent".to_string();
            engine_config(
                base,
                "LUMEN_BRAIN_CMD",
                fc.engines.brain,
                runtime_dir.as_deref(),
            )
        };

        let speech_defaults = SpeechConfig::default();
        let speech = SpeechConfig {
            synth_command: std::env::var("LUMEN_SYNTH_CMD")
                .ok()
                .or(fc.speech.synth_command)
                .unwrap_or(speech_defaults.synth_command),
            synth_args: fc.speech.synth_args.unwrap_or(speech_defaults.synth_args),
            synth_model: fc.speech.synth_model.map(PathBuf::from),
            synth_sample_rate: fc
                .speech
                .synth_sample_rate
                .unwrap_or(speech_defaults.synth_sample_rate),
            player: std::env::var("LUMEN_PLAYER_CMD")
                .ok()
                .map(|cmd| cmd.split_whitespace().map(String::from).collect())
                .or(fc.speech.player)
                .unwrap_or(speech_defaults.player),
        };

        let recognizer_defaults = RecognizerConfig::default();
        let recognizer = RecognizerConfig {
            command: std::env::var("LUMEN_RECOGNIZER_CMD")
                .ok()
                .or(fc.recognizer.command)
                .unwrap_or(recognizer_defaults.command),
            args: fc.recognizer.args.unwrap_or(recognizer_defaults.args),
            model: fc.recognizer.model.map(PathBuf::from),
        };

        Self {
            audio,
            vision,
            brain,
            speech,
            recognizer,
        }
    }
}

/// Apply env and file overrides to an engine's base configuration
fn engine_config(
    mut base: EngineConfig,
    env_cmd: &str,
    overlay: Option<file::EngineFileConfig>,
    runtime_dir: Option<&Path>,
) -> EngineConfig {
    let overlay = overlay.unwrap_or_default();

    base.command = std::env::var(env_cmd)
        .ok()
        .or(overlay.command)
        .unwrap_or(base.command);
    if let Some(args) = overlay.args {
        base.args = args;
    }
    if let Some(path) = overlay.socket_path {
        base.socket_path = PathBuf::from(path);
    }
    if let Some(field) = overlay.ready_field {
        base.ready_field = field;
    }
    if let Some(value) = overlay.ready_value {
        base.ready_value = value;
    }
    if let Some(secs) = overlay.response_timeout_secs {
        base.response_timeout = Duration::from_secs(secs);
    }
    if let Some(dir) = runtime_dir {
        base.working_dir = Some(dir.to_path_buf());
        base.path_prepend = Some(dir.join("bin"));
    }

    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_wearable_hardware() {
        let audio = AudioConfig::default();
        assert!(audio.energy_threshold > 0.0);
        assert_eq!(audio.min_silence_ms, 800);
        assert_eq!(audio.unstable_codecs, vec!["cvsd".to_string()]);

        let speech = SpeechConfig::default();
        assert_eq!(speech.synth_sample_rate, 22050);
        assert_eq!(speech.player, vec!["paplay".to_string()]);
    }

    #[test]
    fn partial_file_overlays_defaults() {
        let fc: file::LumenConfigFile =
            toml::from_str("[audio]\nmin_silence_ms = 500\n").expect("valid toml");
        assert_eq!(fc.audio.min_silence_ms, Some(500));
        assert!(fc.audio.energy_threshold.is_none());
        assert!(fc.engines.vision.is_none());
    }
}
