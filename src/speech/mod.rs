//! Speech output: synthesis, external playback, and the dispatch queue

mod playback;
mod queue;
mod synth;

pub use playback::Playback;
pub use queue::SpeechQueue;
pub use synth::{PiperSynthesizer, Synthesizer};

/// Queue position and preemption behavior of a speech request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Append to the queue tail
    Normal,
    /// Insert at the queue head
    HeadOfQueue,
    /// Stop current playback and play at once
    Immediate,
}
