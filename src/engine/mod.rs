//! Supervised engine subprocesses
//!
//! The vision and language engines run as child processes that serve
//! newline-delimited JSON over Unix domain sockets. The supervisor owns the
//! full lifecycle: spawn, wait for the socket, connect, readiness handshake,
//! frame exchange, and teardown.

mod frame;
mod supervisor;

use std::path::PathBuf;
use std::time::Duration;

pub use frame::{FrameBuffer, LanguageFrame, VisionFrame, VisionText};
pub use supervisor::{EngineState, EngineSupervisor, SupervisorEvent};

/// Configuration for one supervised engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine name used in logs and spoken cues
    pub name: String,

    /// Command to spawn
    pub command: String,

    /// Extra arguments
    pub args: Vec<String>,

    /// Unix socket the engine is expected to serve
    pub socket_path: PathBuf,

    /// Working directory for the subprocess
    pub working_dir: Option<PathBuf>,

    /// Directory prepended to the subprocess PATH
    pub path_prepend: Option<PathBuf>,

    /// JSON field carrying the readiness marker
    pub ready_field: String,

    /// Value of the readiness field in a ready frame
    pub ready_value: String,

    /// How long a request/response exchange may take
    pub response_timeout: Duration,
}

impl EngineConfig {
    /// Create a configuration with default handshake and timeout settings
    #[must_use]
    pub fn new(name: &str, command: &str, socket_path: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            socket_path: PathBuf::from(socket_path),
            working_dir: None,
            path_prepend: None,
            ready_field: "type".to_string(),
            ready_value: "ready".to_string(),
            response_timeout: Duration::from_secs(15),
        }
    }

    /// Check whether a decoded frame is the readiness marker
    #[must_use]
    pub fn is_ready_frame(&self, frame: &serde_json::Value) -> bool {
        frame
            .get(&self.ready_field)
            .and_then(|v| v.as_str())
            .is_some_and(|v| v == self.ready_value)
    }
}
