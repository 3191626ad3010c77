//! Lumen - voice-driven controller for a wearable assistant
//!
//! This library provides the core orchestration layer for the Lumen wearable:
//! - Bluetooth audio endpoint negotiation (card/profile/codec)
//! - Voice-activity segmentation of the live microphone stream
//! - Supervision of the vision and language inference engines over Unix sockets
//! - Intent routing of recognized speech into device commands
//! - A preemptable speech-output queue driving external playback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Microphone                        │
//! │   EndpointNegotiator → FrameSource → Segmenter       │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ recognized text
//! ┌────────────────────▼─────────────────────────────────┐
//! │                  Lumen daemon                         │
//! │   IntentRouter  │  command execution  │ SpeechQueue  │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ newline-delimited JSON
//! ┌────────────────────▼─────────────────────────────────┐
//! │        Supervised engines (Unix sockets)              │
//! │   vision (scene queries)  │  language (intents)      │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod recognize;
pub mod router;
pub mod speech;

pub use audio::{
    AudioControl, CardInfo, EndpointNegotiator, FRAME_SAMPLES, FrameSource, NegotiatorConfig,
    Pactl, SAMPLE_RATE, SegmenterConfig, SegmenterState, SpeechSegmenter, encode_wav,
    is_voice_profile, parse_bluetooth_card,
};
pub use config::Config;
pub use daemon::Daemon;
pub use engine::{
    EngineConfig, EngineState, EngineSupervisor, FrameBuffer, LanguageFrame, SupervisorEvent,
    VisionFrame, VisionText,
};
pub use error::{Error, NegotiationError, Result};
pub use recognize::{Recognizer, WhisperCli, normalize_transcript};
pub use router::{
    EngineExchange, Intent, IntentExchange, IntentRouter, OverrideCommand, SystemCommand,
    parse_intent,
};
pub use speech::{Playback, PiperSynthesizer, Priority, SpeechQueue, Synthesizer};
