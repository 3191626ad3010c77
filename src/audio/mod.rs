//! Audio pipeline: endpoint negotiation, capture, segmentation, and WAV encoding

mod bluetooth;
mod capture;
mod control;
mod segmenter;
mod wav;

pub use bluetooth::{
    CardInfo, EndpointNegotiator, NegotiatorConfig, is_voice_profile, parse_bluetooth_card,
};
pub use capture::{FRAME_SAMPLES, FrameSource, SAMPLE_RATE};
pub use control::{AudioControl, Pactl};
pub use segmenter::{SegmenterConfig, SegmenterState, SpeechSegmenter};
pub use wav::encode_wav;
