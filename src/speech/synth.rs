//! External speech synthesis

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::SpeechConfig;
use crate::{Error, Result};

/// Converts text into normalized mono samples
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize text into f32 samples at `sample_rate()`
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>>;

    /// Native sample rate of the synthesized audio (Hz)
    fn sample_rate(&self) -> u32;
}

/// Drives an external piper-style synthesizer
///
/// The text goes to the subprocess on stdin; raw signed 16-bit little-endian
/// samples come back on stdout.
pub struct PiperSynthesizer {
    command: String,
    args: Vec<String>,
    model: Option<PathBuf>,
    sample_rate: u32,
}

impl PiperSynthesizer {
    /// Create a synthesizer from configuration
    ///
    /// # Errors
    ///
    /// Returns error if a voice model is configured but missing on disk
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        if let Some(model) = &config.synth_model {
            if !model.exists() {
                return Err(Error::Config(format!(
                    "synthesizer model not found: {}",
                    model.display()
                )));
            }
        }

        Ok(Self {
            command: config.synth_command.clone(),
            args: config.synth_args.clone(),
            model: config.synth_model.clone(),
            sample_rate: config.synth_sample_rate,
        })
    }
}

#[async_trait]
impl Synthesizer for PiperSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        if let Some(model) = &self.model {
            command.arg("--model").arg(model);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::Synthesis(format!("failed to spawn {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| Error::Synthesis(format!("write to synthesizer failed: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Synthesis(format!(
                "{} failed: {}",
                self.command,
                stderr.trim()
            )));
        }

        let samples: Vec<f32> = output
            .stdout
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
            .collect();

        tracing::debug!(chars = text.len(), samples = samples.len(), "synthesized");
        Ok(samples)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
