//! Speech dispatch queue
//!
//! Holds pending spoken messages and drives them through synthesis and
//! external playback, one at a time, on a background consumer task. All
//! queue state lives behind one mutex owned by this component.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Playback, Priority, Synthesizer};
use crate::audio::encode_wav;
use crate::{AudioControl, Result};

/// Poll interval while the queue is empty
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Poll interval while a playback is active
const PLAYBACK_POLL: Duration = Duration::from_millis(50);

/// Upper bound for relative volume steps
const MAX_VOLUME: u32 = 150;

#[derive(Debug, Clone)]
struct SpeechRequest {
    text: String,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<SpeechRequest>,
    immediate: Option<SpeechRequest>,
    interrupt: bool,
    paused: bool,
    playing: bool,
}

/// Ordered speech output with priorities and preemption
pub struct SpeechQueue {
    state: Arc<Mutex<QueueState>>,
    synthesizer: Arc<dyn Synthesizer>,
    control: Arc<dyn AudioControl>,
    player: Vec<String>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    consumer_active: AtomicBool,
}

impl SpeechQueue {
    /// Create a queue over the given synthesizer and output control
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        control: Arc<dyn AudioControl>,
        player: Vec<String>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            synthesizer,
            control,
            player,
            consumer: Mutex::new(None),
            consumer_active: AtomicBool::new(false),
        }
    }

    /// Queue a message for speech output
    ///
    /// `Normal` appends, `HeadOfQueue` prepends, `Immediate` stops any
    /// current playback and plays next; the interrupted item is discarded,
    /// the pending queue is untouched.
    pub fn enqueue(&self, text: &str, priority: Priority) {
        tracing::debug!(?priority, text = %text, "speech enqueued");

        let request = SpeechRequest {
            text: text.to_string(),
        };
        if let Ok(mut state) = self.state.lock() {
            match priority {
                Priority::Normal => state.pending.push_back(request),
                Priority::HeadOfQueue => state.pending.push_front(request),
                Priority::Immediate => {
                    state.immediate = Some(request);
                    state.interrupt = true;
                }
            }
        }
    }

    /// Stop active playback, optionally discarding the pending queue
    pub fn stop(&self, clear_queue: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.interrupt = true;
            if clear_queue {
                state.pending.clear();
                state.immediate = None;
            }
        }
        tracing::debug!(clear_queue, "speech stop requested");
    }

    /// Suspend or continue the active playback
    pub fn pause(&self, paused: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.paused = paused;
        }
        tracing::debug!(paused, "speech pause changed");
    }

    /// Step the output volume by a signed percentage
    ///
    /// # Errors
    ///
    /// Returns error if the sound server rejects the volume commands
    pub async fn step_volume(&self, delta: i32) -> Result<()> {
        let current = i64::from(self.control.sink_volume().await?);
        let next = (current + i64::from(delta)).clamp(0, i64::from(MAX_VOLUME));
        let next = u32::try_from(next).unwrap_or(0);

        self.control.set_sink_volume(next).await?;
        tracing::info!(volume = next, "output volume stepped");
        Ok(())
    }

    /// Set the output volume to an absolute percentage, clamped to 0..=100
    ///
    /// # Errors
    ///
    /// Returns error if the sound server rejects the volume command
    pub async fn set_volume(&self, percent: u32) -> Result<()> {
        let percent = percent.min(100);
        self.control.set_sink_volume(percent).await?;
        tracing::info!(volume = percent, "output volume set");
        Ok(())
    }

    /// Mute or unmute the output device
    ///
    /// # Errors
    ///
    /// Returns error if the sound server rejects the mute command
    pub async fn set_mute(&self, mute: bool) -> Result<()> {
        self.control.set_sink_mute(mute).await?;
        tracing::info!(mute, "output mute changed");
        Ok(())
    }

    /// Check whether nothing is queued or playing
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.lock().is_ok_and(|state| {
            state.pending.is_empty() && state.immediate.is_none() && !state.playing
        })
    }

    /// Start the background consumer
    ///
    /// A second call while the consumer is running is a logged no-op.
    pub fn start(&self, token: CancellationToken) {
        if self.consumer_active.swap(true, Ordering::SeqCst) {
            tracing::warn!("speech consumer already running");
            return;
        }

        let state = Arc::clone(&self.state);
        let synthesizer = Arc::clone(&self.synthesizer);
        let player = self.player.clone();

        let handle = tokio::spawn(async move {
            consumer_loop(state, synthesizer, player, token).await;
        });

        if let Ok(mut consumer) = self.consumer.lock() {
            *consumer = Some(handle);
        }
    }

    /// Wait for the consumer to exit
    ///
    /// The consumer only exits on cancellation; cancel its token first.
    pub async fn shutdown(&self) {
        let handle = self.consumer.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "speech consumer panicked");
                }
            }
        }
        self.consumer_active.store(false, Ordering::SeqCst);
    }
}

async fn consumer_loop(
    state: Arc<Mutex<QueueState>>,
    synthesizer: Arc<dyn Synthesizer>,
    player: Vec<String>,
    token: CancellationToken,
) {
    tracing::debug!("speech consumer started");

    while !token.is_cancelled() {
        let next = {
            let Ok(mut state) = state.lock() else { break };
            // Picking a request satisfies any outstanding interrupt
            state.interrupt = false;
            let next = state
                .immediate
                .take()
                .or_else(|| state.pending.pop_front());
            if next.is_some() {
                state.playing = true;
            }
            next
        };

        let Some(request) = next else {
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(IDLE_POLL) => {}
            }
            continue;
        };

        let result = play_request(&state, synthesizer.as_ref(), &player, &token, &request).await;

        if let Ok(mut state) = state.lock() {
            state.playing = false;
            state.paused = false;
        }

        if let Err(e) = result {
            tracing::warn!(error = %e, text = %request.text, "speech request failed");
        }
    }

    tracing::debug!("speech consumer stopped");
}

async fn play_request(
    state: &Arc<Mutex<QueueState>>,
    synthesizer: &dyn Synthesizer,
    player: &[String],
    token: &CancellationToken,
    request: &SpeechRequest,
) -> Result<()> {
    let samples = synthesizer.synthesize(&request.text).await?;
    if samples.is_empty() {
        return Ok(());
    }

    let wav = encode_wav(&samples, synthesizer.sample_rate())?;
    let artifact = tempfile::Builder::new()
        .prefix("lumen-speech-")
        .suffix(".wav")
        .tempfile()?;
    tokio::fs::write(artifact.path(), &wav).await?;

    let mut playback = Playback::start(player, artifact.path())?;
    let mut paused_applied = false;

    loop {
        tokio::select! {
            () = token.cancelled() => {
                playback.stop().await;
                return Ok(());
            }
            () = tokio::time::sleep(PLAYBACK_POLL) => {}
        }

        let (interrupted, paused) = {
            let Ok(mut state) = state.lock() else {
                playback.stop().await;
                return Ok(());
            };
            let interrupted = state.interrupt;
            if interrupted {
                state.interrupt = false;
            }
            (interrupted, state.paused)
        };

        if interrupted {
            playback.stop().await;
            tracing::debug!(text = %request.text, "playback preempted");
            return Ok(());
        }

        if paused != paused_applied {
            if paused {
                playback.pause();
            } else {
                playback.resume();
            }
            paused_applied = paused;
        }

        if playback.try_finished() {
            tracing::debug!(text = %request.text, "playback complete");
            break;
        }
    }

    Ok(())
}
