//! External playback process control

use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::{Error, Result};

/// One active external playback process
pub struct Playback {
    child: Child,
}

impl Playback {
    /// Launch the player on a WAV artifact
    ///
    /// The first element of `player` is the program; the rest are arguments.
    /// The artifact path is appended as the final argument.
    ///
    /// # Errors
    ///
    /// Returns error if the player command is empty or cannot be spawned
    pub fn start(player: &[String], wav: &Path) -> Result<Self> {
        let (program, args) = player
            .split_first()
            .ok_or_else(|| Error::Playback("player command is empty".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .arg(wav)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Playback(format!("failed to spawn {program}: {e}")))?;

        tracing::debug!(player = %program, artifact = %wav.display(), "playback started");
        Ok(Self { child })
    }

    /// Check whether playback has ended
    pub fn try_finished(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "player status check failed");
                true
            }
        }
    }

    /// Suspend playback without discarding it
    pub fn pause(&self) {
        self.signal(Signal::SIGSTOP);
    }

    /// Continue suspended playback
    pub fn resume(&self) {
        self.signal(Signal::SIGCONT);
    }

    /// Stop playback and reap the player process
    pub async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "failed to stop player");
        }
    }

    fn signal(&self, signal: Signal) {
        if let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) {
            if let Err(e) = signal::kill(Pid::from_raw(pid), signal) {
                tracing::warn!(error = %e, signal = %signal, "failed to signal player");
            }
        }
    }
}
