//! Intent routing
//!
//! Sends a recognized transcript to the language engine and maps the
//! returned intent label and payload into a typed command. Transport
//! failures surface as errors; unparseable intents come back as
//! `Intent::Error` so the caller can speak them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::engine::{EngineSupervisor, LanguageFrame};
use crate::{Error, Result};

/// A command decoded from the language engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Forward the text to the vision engine
    Identify(String),
    /// Adjust a device setting
    System(SystemCommand),
    /// Control speech playback flow
    Override(OverrideCommand),
    /// Speak an error message to the user
    Error(String),
}

/// Device setting adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    /// Raise output volume one step
    VolumeUp,
    /// Lower output volume one step
    VolumeDown,
    /// Set output volume to an absolute percentage
    VolumeSet(u8),
    /// Mute output
    Mute,
    /// Unmute output
    Unmute,
    /// Orderly shutdown of the whole controller
    Shutdown,
}

/// Playback flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideCommand {
    /// Stop playback and clear the queue
    Stop,
    /// Suspend playback
    Pause,
    /// Stop the current item, keep the queue
    Skip,
    /// Continue suspended playback
    Play,
}

/// Map an intent label and payload into a typed command
///
/// Labels match case-insensitively. An unrecognized label, an unknown
/// system token, or an out-of-range volume all map to `Intent::Error`
/// rather than a fallback action.
#[must_use]
pub fn parse_intent(label: &str, payload: &str) -> Intent {
    match label.to_lowercase().as_str() {
        "identify" => Intent::Identify(payload.to_string()),
        "system" => parse_system(payload),
        "override" => parse_override(payload),
        "error" => {
            if payload.is_empty() {
                Intent::Error("I didn't understand that command.".to_string())
            } else {
                Intent::Error(payload.to_string())
            }
        }
        other => Intent::Error(format!("unrecognized intent: {other}")),
    }
}

fn parse_system(payload: &str) -> Intent {
    let mut parts = payload.split_whitespace();
    let Some(token) = parts.next() else {
        return Intent::Error("empty system command".to_string());
    };

    match token {
        "volume_up" => Intent::System(SystemCommand::VolumeUp),
        "volume_down" => Intent::System(SystemCommand::VolumeDown),
        "volume_set" => match parts.next().and_then(|arg| arg.parse::<u8>().ok()) {
            Some(level) if level <= 100 => Intent::System(SystemCommand::VolumeSet(level)),
            _ => Intent::Error(format!("invalid volume level in: {payload}")),
        },
        "mute" => Intent::System(SystemCommand::Mute),
        "unmute" => Intent::System(SystemCommand::Unmute),
        "shutdown" => Intent::System(SystemCommand::Shutdown),
        other => Intent::Error(format!("unknown system command: {other}")),
    }
}

fn parse_override(payload: &str) -> Intent {
    match payload.trim() {
        "stop" => Intent::Override(OverrideCommand::Stop),
        "pause" => Intent::Override(OverrideCommand::Pause),
        "skip" => Intent::Override(OverrideCommand::Skip),
        "play" => Intent::Override(OverrideCommand::Play),
        other => Intent::Error(format!("unknown override command: {other}")),
    }
}

/// Request/response exchange with the language engine
#[async_trait]
pub trait IntentExchange: Send {
    /// Send a transcript and wait for the intent label and payload
    async fn exchange(&mut self, transcript: &str) -> Result<(String, String)>;
}

/// Exchange over a supervised language engine
pub struct EngineExchange {
    supervisor: Arc<tokio::sync::Mutex<EngineSupervisor>>,
    frames: mpsc::UnboundedReceiver<Value>,
    timeout: Duration,
}

impl EngineExchange {
    /// Create an exchange from a supervisor and its frame receiver
    #[must_use]
    pub fn new(
        supervisor: Arc<tokio::sync::Mutex<EngineSupervisor>>,
        frames: mpsc::UnboundedReceiver<Value>,
        timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            frames,
            timeout,
        }
    }
}

#[async_trait]
impl IntentExchange for EngineExchange {
    async fn exchange(&mut self, transcript: &str) -> Result<(String, String)> {
        {
            let mut supervisor = self.supervisor.lock().await;
            supervisor.send(transcript).await?;
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::EngineTimeout(
                    "language engine response timed out".to_string(),
                ));
            }

            match tokio::time::timeout(remaining, self.frames.recv()).await {
                Ok(Some(frame)) => match serde_json::from_value::<LanguageFrame>(frame) {
                    Ok(frame) => return Ok((frame.intent, frame.payload)),
                    Err(e) => {
                        tracing::warn!(error = %e, "unintelligible language frame dropped");
                    }
                },
                Ok(None) => {
                    return Err(Error::Engine(
                        "language engine frame stream closed".to_string(),
                    ));
                }
                Err(_) => {
                    return Err(Error::EngineTimeout(
                        "language engine response timed out".to_string(),
                    ));
                }
            }
        }
    }
}

/// Routes transcripts through an exchange into typed intents
pub struct IntentRouter<E> {
    exchange: E,
}

impl<E: IntentExchange> IntentRouter<E> {
    /// Create a router over the given exchange
    #[must_use]
    pub const fn new(exchange: E) -> Self {
        Self { exchange }
    }

    /// Route one transcript to a typed intent
    ///
    /// # Errors
    ///
    /// Returns error if the exchange with the language engine fails or
    /// times out; unparseable intents are `Ok(Intent::Error)`
    pub async fn route(&mut self, transcript: &str) -> Result<Intent> {
        let (label, payload) = self.exchange.exchange(transcript).await?;
        let intent = parse_intent(&label, &payload);
        tracing::info!(label = %label, payload = %payload, ?intent, "intent routed");
        Ok(intent)
    }
}
