//! Voice activity segmentation
//!
//! Classifies incoming frames by RMS energy and endpoints utterances on
//! trailing silence. Finished segments queue internally until the caller
//! drains them.

use std::collections::VecDeque;

/// Segmentation parameters
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// Minimum RMS energy to consider a frame speech
    pub energy_threshold: f32,

    /// Minimum speech duration to accept a burst (ms)
    pub min_speech_ms: u64,

    /// Trailing silence duration that ends an utterance (ms)
    pub min_silence_ms: u64,

    /// Sample rate of incoming frames (Hz)
    pub sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            min_speech_ms: 300,
            min_silence_ms: 800,
            sample_rate: crate::audio::SAMPLE_RATE,
        }
    }
}

impl SegmenterConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn min_speech_samples(&self) -> usize {
        (self.min_speech_ms * u64::from(self.sample_rate) / 1000) as usize
    }

    #[allow(clippy::cast_possible_truncation)]
    fn min_silence_samples(&self) -> usize {
        (self.min_silence_ms * u64::from(self.sample_rate) / 1000) as usize
    }
}

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance, accumulating
    Speech,
}

/// Splits a frame stream into endpointed speech segments
pub struct SpeechSegmenter {
    threshold: f32,
    min_speech_samples: usize,
    min_silence_samples: usize,
    state: SegmenterState,
    active: Vec<f32>,
    silence_run: usize,
    pending: VecDeque<Vec<f32>>,
}

impl SpeechSegmenter {
    /// Create a new segmenter
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            min_speech_samples: config.min_speech_samples(),
            min_silence_samples: config.min_silence_samples(),
            state: SegmenterState::Idle,
            active: Vec::new(),
            silence_run: 0,
            pending: VecDeque::new(),
        }
    }

    /// Feed one frame into the detector
    pub fn push_frame(&mut self, frame: &[f32]) {
        let energy = calculate_energy(frame);
        let is_speech = energy > self.threshold;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speech;
                    self.active.clear();
                    self.active.extend_from_slice(frame);
                    self.silence_run = 0;
                    tracing::trace!(energy, "speech started");
                }
            }
            SegmenterState::Speech => {
                self.active.extend_from_slice(frame);

                if is_speech {
                    self.silence_run = 0;
                } else {
                    self.silence_run += frame.len();
                }

                if self.silence_run >= self.min_silence_samples {
                    self.endpoint();
                }
            }
        }
    }

    /// Check whether a finished segment is waiting to be drained
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take the next finished segment
    pub fn take_pending(&mut self) -> Option<Vec<f32>> {
        self.pending.pop_front()
    }

    /// Discard all accumulated state
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.active.clear();
        self.silence_run = 0;
        self.pending.clear();
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    fn endpoint(&mut self) {
        let segment = std::mem::take(&mut self.active);
        let speech_len = segment.len().saturating_sub(self.silence_run);

        if speech_len >= self.min_speech_samples {
            tracing::debug!(samples = segment.len(), "speech segment complete");
            self.pending.push_back(segment);
        } else {
            tracing::trace!(samples = speech_len, "burst below minimum speech, dropped");
        }

        self.state = SegmenterState::Idle;
        self.silence_run = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
