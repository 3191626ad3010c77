//! Speech recognition through an external transcriber
//!
//! Recognition runs on the capture thread between utterances, so the trait
//! is synchronous and the implementation blocks on the subprocess.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::audio::encode_wav;
use crate::config::RecognizerConfig;
use crate::{Error, Result};

/// Turns an utterance buffer into text
pub trait Recognizer: Send + Sync {
    /// Transcribe mono f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if the transcriber cannot be run or fails
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// whisper.cpp command-line transcriber
pub struct WhisperCli {
    command: String,
    args: Vec<String>,
    model: Option<PathBuf>,
}

impl WhisperCli {
    /// Create a transcriber from configuration
    ///
    /// # Errors
    ///
    /// Returns error if a model is configured but missing on disk
    pub fn new(config: &RecognizerConfig) -> Result<Self> {
        if let Some(model) = &config.model {
            if !model.exists() {
                return Err(Error::Config(format!(
                    "recognizer model not found: {}",
                    model.display()
                )));
            }
        }

        Ok(Self {
            command: config.command.clone(),
            args: config.args.clone(),
            model: config.model.clone(),
        })
    }
}

impl Recognizer for WhisperCli {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let wav = encode_wav(samples, sample_rate)?;
        let artifact = tempfile::Builder::new()
            .prefix("lumen-utterance-")
            .suffix(".wav")
            .tempfile()?;
        std::fs::write(artifact.path(), &wav)?;

        let mut command = Command::new(&self.command);
        command.args(&self.args);
        if let Some(model) = &self.model {
            command.arg("-m").arg(model);
        }
        command.arg("-f").arg(artifact.path());
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = command
            .output()
            .map_err(|e| Error::Recognition(format!("failed to run {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Recognition(format!(
                "{} failed: {}",
                self.command,
                stderr.trim()
            )));
        }

        let transcript = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(samples = samples.len(), transcript = %transcript, "transcribed");
        Ok(transcript)
    }
}

/// Normalize a raw transcript for routing
///
/// Lower-cases, strips punctuation, and collapses whitespace.
#[must_use]
pub fn normalize_transcript(raw: &str) -> String {
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_punctuation_and_spacing() {
        assert_eq!(
            normalize_transcript("  What is   THIS?! "),
            "what is this"
        );
        assert_eq!(normalize_transcript("Volume up."), "volume up");
        assert_eq!(normalize_transcript("..."), "");
    }
}
