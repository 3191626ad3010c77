//! Engine process supervision
//!
//! Walks one engine through spawn, socket wait, connect, and the readiness
//! handshake, then keeps a background reader pumping response frames into a
//! channel. Teardown is graceful first, forced after a grace period.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{EngineConfig, FrameBuffer};
use crate::{Error, Result};

/// How often to check for the engine socket to appear
const SOCKET_POLL: Duration = Duration::from_millis(500);

/// Backoff between connection attempts
const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Interval between readiness-wait cues
const READY_CUE_INTERVAL: Duration = Duration::from_secs(3);

/// Grace period before force-killing the subprocess tree
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a supervised engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Subprocess is being spawned
    Starting,
    /// Waiting for the engine to create its socket
    WaitingForSocket,
    /// Socket exists, connection attempts in progress
    Connecting,
    /// Connected, waiting for the ready frame
    AwaitingReady,
    /// Handshake complete, engine usable
    Ready,
    /// Teardown in progress
    Stopping,
    /// Not running
    Stopped,
    /// Subprocess exited or the socket broke
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::WaitingForSocket => write!(f, "waiting for socket"),
            Self::Connecting => write!(f, "connecting"),
            Self::AwaitingReady => write!(f, "awaiting ready"),
            Self::Ready => write!(f, "ready"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Out-of-band notification from a supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The engine is up but has not sent its ready frame yet
    StillWaiting {
        /// Engine name
        engine: String,
    },
}

/// Supervises one engine subprocess and its socket connection
pub struct EngineSupervisor {
    config: EngineConfig,
    state: Arc<Mutex<EngineState>>,
    child: Option<Child>,
    writer: Option<OwnedWriteHalf>,
    frames_tx: mpsc::UnboundedSender<Value>,
    frames_rx: Option<mpsc::UnboundedReceiver<Value>>,
    events: Option<mpsc::Sender<SupervisorEvent>>,
    reader_task: Option<JoinHandle<()>>,
    log_tasks: Vec<JoinHandle<()>>,
}

impl EngineSupervisor {
    /// Create a supervisor for the given engine
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Self {
            config,
            state: Arc::new(Mutex::new(EngineState::Stopped)),
            child: None,
            writer: None,
            frames_tx,
            frames_rx: Some(frames_rx),
            events: None,
            reader_task: None,
            log_tasks: Vec::new(),
        }
    }

    /// Create a supervisor that reports out-of-band events
    #[must_use]
    pub fn with_events(config: EngineConfig, events: mpsc::Sender<SupervisorEvent>) -> Self {
        let mut supervisor = Self::new(config);
        supervisor.events = Some(events);
        supervisor
    }

    /// Engine name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state.lock().map_or(EngineState::Failed, |s| *s)
    }

    /// Check whether the readiness handshake completed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Take the response frame receiver
    ///
    /// Yields frames decoded by the background reader. Can only be taken once.
    pub fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.frames_rx.take()
    }

    /// Spawn the engine and drive it to `Ready`
    ///
    /// Blocks through the socket wait, connection retries, and the readiness
    /// handshake. Cancelling the token aborts startup and tears the engine
    /// down.
    ///
    /// # Errors
    ///
    /// Returns error if the spawn fails, the subprocess exits during
    /// startup, the socket breaks before the ready frame, or the token is
    /// cancelled
    pub async fn start(&mut self, token: &CancellationToken) -> Result<()> {
        self.set_state(EngineState::Starting);

        // A stale socket from a previous run would satisfy the existence
        // poll before the fresh engine binds
        if self.config.socket_path.exists() {
            match std::fs::remove_file(&self.config.socket_path) {
                Ok(()) => tracing::info!(
                    engine = %self.config.name,
                    socket = %self.config.socket_path.display(),
                    "removed stale socket"
                ),
                Err(e) => tracing::warn!(
                    engine = %self.config.name,
                    error = %e,
                    "failed to remove stale socket"
                ),
            }
        }

        self.spawn_child()?;
        self.wait_for_socket(token).await?;
        let stream = self.connect(token).await?;
        self.await_ready(token, stream).await?;

        self.set_state(EngineState::Ready);
        tracing::info!(engine = %self.config.name, "engine ready");
        Ok(())
    }

    /// Send one request frame to the engine
    ///
    /// The payload is JSON-encoded as a string and newline-terminated.
    ///
    /// # Errors
    ///
    /// Returns error if the engine is not connected or the write fails
    pub async fn send(&mut self, payload: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            Error::Engine(format!("{} is not connected", self.config.name))
        })?;

        let mut line = serde_json::to_string(payload)?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Engine(format!("{} write failed: {e}", self.config.name)))?;

        tracing::debug!(engine = %self.config.name, payload = %payload, "request sent");
        Ok(())
    }

    /// Tear the engine down
    ///
    /// Closes our side of the socket, sends SIGTERM to the subprocess group,
    /// and escalates to SIGKILL if the grace period elapses. Safe to call on
    /// an engine that never started.
    pub async fn stop(&mut self) {
        self.set_state(EngineState::Stopping);

        // Half-close gives the engine a chance to exit on its own
        self.writer.take();

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        if let Some(mut child) = self.child.take() {
            let pgid = child.id().and_then(|id| i32::try_from(id).ok());
            if let Some(pgid) = pgid {
                let _ = signal::killpg(Pid::from_raw(pgid), Signal::SIGTERM);
            }

            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(engine = %self.config.name, %status, "engine stopped");
                }
                Ok(Err(e)) => {
                    tracing::warn!(engine = %self.config.name, error = %e, "engine wait failed");
                }
                Err(_) => {
                    tracing::warn!(
                        engine = %self.config.name,
                        "graceful stop timed out, killing process group"
                    );
                    if let Some(pgid) = pgid {
                        let _ = signal::killpg(Pid::from_raw(pgid), Signal::SIGKILL);
                    }
                    let _ = child.wait().await;
                }
            }
        }

        for task in self.log_tasks.drain(..) {
            task.abort();
        }

        self.set_state(EngineState::Stopped);
    }

    fn spawn_child(&mut self) -> Result<()> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        if let Some(prepend) = &self.config.path_prepend {
            let path = std::env::var("PATH").unwrap_or_default();
            command.env("PATH", format!("{}:{path}", prepend.display()));
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Engine(format!("failed to spawn {}: {e}", self.config.command))
        })?;

        if let Some(stdout) = child.stdout.take() {
            self.log_tasks
                .push(spawn_log_task(self.config.name.clone(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            self.log_tasks
                .push(spawn_log_task(self.config.name.clone(), stderr));
        }

        tracing::info!(
            engine = %self.config.name,
            command = %self.config.command,
            "engine spawned"
        );
        self.child = Some(child);
        Ok(())
    }

    async fn wait_for_socket(&mut self, token: &CancellationToken) -> Result<()> {
        self.set_state(EngineState::WaitingForSocket);
        tracing::debug!(
            engine = %self.config.name,
            socket = %self.config.socket_path.display(),
            "waiting for socket"
        );

        loop {
            if self.config.socket_path.exists() {
                return Ok(());
            }
            self.check_child_alive()?;

            tokio::select! {
                () = token.cancelled() => return self.cancel_startup().await,
                () = tokio::time::sleep(SOCKET_POLL) => {}
            }
        }
    }

    async fn connect(&mut self, token: &CancellationToken) -> Result<UnixStream> {
        self.set_state(EngineState::Connecting);

        let mut attempts: u32 = 0;
        loop {
            match UnixStream::connect(&self.config.socket_path).await {
                Ok(stream) => {
                    tracing::debug!(engine = %self.config.name, attempts, "socket connected");
                    return Ok(stream);
                }
                Err(e) => {
                    attempts += 1;
                    if attempts.is_multiple_of(5) {
                        tracing::info!(
                            engine = %self.config.name,
                            attempts,
                            error = %e,
                            "still connecting"
                        );
                    }
                }
            }
            self.check_child_alive()?;

            tokio::select! {
                () = token.cancelled() => return self.cancel_startup().await,
                () = tokio::time::sleep(CONNECT_BACKOFF) => {}
            }
        }
    }

    async fn await_ready(&mut self, token: &CancellationToken, stream: UnixStream) -> Result<()> {
        self.set_state(EngineState::AwaitingReady);

        let (mut reader, writer) = stream.into_split();
        self.writer = Some(writer);

        let mut framing = FrameBuffer::new();
        let mut chunk = [0u8; 4096];
        let mut cue = tokio::time::interval(READY_CUE_INTERVAL);
        cue.tick().await;

        let mut ready = false;
        while !ready {
            tokio::select! {
                () = token.cancelled() => return self.cancel_startup().await,
                _ = cue.tick() => {
                    tracing::info!(engine = %self.config.name, "still waiting for ready frame");
                    if let Some(events) = &self.events {
                        let _ = events
                            .send(SupervisorEvent::StillWaiting {
                                engine: self.config.name.clone(),
                            })
                            .await;
                    }
                }
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => {
                        self.set_state(EngineState::Failed);
                        return Err(Error::Engine(format!(
                            "{} closed its socket before ready",
                            self.config.name
                        )));
                    }
                    Ok(n) => {
                        for line in framing.push(&chunk[..n]) {
                            match serde_json::from_str::<Value>(&line) {
                                Ok(frame) => {
                                    if !ready && self.config.is_ready_frame(&frame) {
                                        ready = true;
                                    } else {
                                        let _ = self.frames_tx.send(frame);
                                    }
                                }
                                Err(e) => tracing::warn!(
                                    engine = %self.config.name,
                                    error = %e,
                                    "malformed frame dropped"
                                ),
                            }
                        }
                    }
                    Err(e) => {
                        self.set_state(EngineState::Failed);
                        return Err(Error::Engine(format!(
                            "{} socket read failed: {e}",
                            self.config.name
                        )));
                    }
                },
            }
        }

        self.spawn_reader(reader, framing);
        Ok(())
    }

    fn spawn_reader(&mut self, mut reader: OwnedReadHalf, mut framing: FrameBuffer) {
        let state = Arc::clone(&self.state);
        let frames_tx = self.frames_tx.clone();
        let name = self.config.name.clone();

        self.reader_task = Some(tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => {
                        tracing::warn!(engine = %name, "engine closed its socket");
                        mark_failed(&state);
                        break;
                    }
                    Ok(n) => {
                        for line in framing.push(&chunk[..n]) {
                            match serde_json::from_str::<Value>(&line) {
                                Ok(frame) => {
                                    if frames_tx.send(frame).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => tracing::warn!(
                                    engine = %name,
                                    error = %e,
                                    "malformed frame dropped"
                                ),
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(engine = %name, error = %e, "engine socket read failed");
                        mark_failed(&state);
                        break;
                    }
                }
            }
        }));
    }

    async fn cancel_startup<T>(&mut self) -> Result<T> {
        tracing::info!(engine = %self.config.name, "startup cancelled");
        self.stop().await;
        Err(Error::Engine(format!(
            "{} startup cancelled",
            self.config.name
        )))
    }

    fn check_child_alive(&mut self) -> Result<()> {
        if let Some(child) = &mut self.child {
            if let Ok(Some(status)) = child.try_wait() {
                self.set_state(EngineState::Failed);
                return Err(Error::Engine(format!(
                    "{} exited during startup: {status}",
                    self.config.name
                )));
            }
        }
        Ok(())
    }

    fn set_state(&self, next: EngineState) {
        if let Ok(mut state) = self.state.lock() {
            tracing::debug!(engine = %self.config.name, state = %next, "state change");
            *state = next;
        }
    }
}

fn spawn_log_task<R>(name: String, stream: R) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains("INFO") || line.contains("WARN") {
                tracing::info!(engine = %name, "{line}");
            } else {
                tracing::error!(engine = %name, "{line}");
            }
        }
    })
}

/// Only a live `Ready` state becomes `Failed`; an orderly stop keeps its state
fn mark_failed(state: &Arc<Mutex<EngineState>>) {
    if let Ok(mut state) = state.lock() {
        if *state == EngineState::Ready {
            *state = EngineState::Failed;
        }
    }
}
