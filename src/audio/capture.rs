//! Audio capture from the negotiated headset source
//!
//! Capture runs on its own OS thread because cpal streams are not `Send`.
//! The stream callback feeds raw chunks into a channel and `read_frame`
//! reassembles them into fixed-size frames for the segmenter.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per frame handed to the segmenter (100ms at 16kHz)
pub const FRAME_SAMPLES: usize = 1600;

/// Captures mono 16kHz audio as fixed-size frames
pub struct FrameSource {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    rx: Option<Receiver<Vec<f32>>>,
    residual: Vec<f32>,
}

impl FrameSource {
    /// Open a capture device
    ///
    /// When `preferred` is given, the first input device whose name contains
    /// it (case-insensitive) is used. Otherwise, or when no name matches,
    /// capture falls back to the host default device, which follows the
    /// default source set during endpoint negotiation.
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or none supports
    /// mono capture at 16kHz
    pub fn new(preferred: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_device(&host, preferred)?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let sample_format = supported_config.sample_format();
        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            format = ?sample_format,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            rx: None,
            residual: Vec::new(),
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (tx, rx) = std::sync::mpsc::channel::<Vec<f32>>();
        let stream = self.build_stream(tx)?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);
        self.rx = Some(rx);
        self.residual.clear();

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.rx = None;
            self.residual.clear();
            tracing::debug!("audio capture stopped");
        }
    }

    /// Read the next fixed-size frame
    ///
    /// Blocks up to `timeout` waiting for enough samples, then returns
    /// `Ok(None)`. Leftover samples carry over to the next call.
    ///
    /// # Errors
    ///
    /// Returns error if capture was never started or the stream closed
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<f32>>> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| Error::Audio("capture not started".to_string()))?;

        let deadline = Instant::now() + timeout;
        while self.residual.len() < FRAME_SAMPLES {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match rx.recv_timeout(remaining) {
                Ok(chunk) => self.residual.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Audio("capture stream closed".to_string()));
                }
            }
        }

        let frame: Vec<f32> = self.residual.drain(..FRAME_SAMPLES).collect();
        Ok(Some(frame))
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn build_stream(&self, tx: Sender<Vec<f32>>) -> Result<Stream> {
        let config = self.config.clone();

        let stream = match self.sample_format {
            SampleFormat::F32 => self.device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(data.to_vec());
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            ),
            SampleFormat::I16 => self.device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let chunk = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    let _ = tx.send(chunk);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            ),
            other => {
                return Err(Error::Audio(format!("unsupported sample format: {other}")));
            }
        };

        stream.map_err(|e| Error::Audio(e.to_string()))
    }
}

fn select_device(host: &cpal::Host, preferred: Option<&str>) -> Result<Device> {
    if let Some(name) = preferred {
        let needle = name.to_lowercase();
        let devices = host
            .input_devices()
            .map_err(|e| Error::Audio(e.to_string()))?;
        for device in devices {
            if device
                .name()
                .is_ok_and(|n| n.to_lowercase().contains(&needle))
            {
                return Ok(device);
            }
        }
        tracing::debug!(preferred = %name, "preferred capture device not listed, using default");
    }

    host.default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))
}
