//! Newline-delimited JSON framing

use serde::Deserialize;

/// Reassembles newline-delimited frames from arbitrary read chunks
///
/// A single read may carry several frames, or a fraction of one; bytes after
/// the last newline stay buffered until the terminator arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty frame buffer
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append a chunk and drain every complete frame it finishes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim();
            if !line.is_empty() {
                frames.push(line.to_string());
            }
        }

        frames
    }

    /// Bytes held back waiting for a newline
    #[must_use]
    pub fn residual(&self) -> &[u8] {
        &self.buf
    }

    /// Check whether the buffer holds no partial frame
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Response frame from the vision engine
#[derive(Debug, Clone, Deserialize)]
pub struct VisionFrame {
    /// Frame type; "ready" marks the readiness handshake
    #[serde(rename = "type")]
    pub kind: String,

    /// Answer body, absent on handshake frames
    #[serde(default)]
    pub text: Option<VisionText>,
}

/// Answer body of a vision frame
#[derive(Debug, Clone, Deserialize)]
pub struct VisionText {
    /// Spoken answer text
    pub answer: String,

    /// Engine-side processing time
    #[serde(default)]
    pub time: String,
}

/// Response frame from the language engine
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageFrame {
    /// Intent label; "ready" marks the readiness handshake
    pub intent: String,

    /// Free-text payload for the intent
    #[serde(default)]
    pub payload: String,
}
