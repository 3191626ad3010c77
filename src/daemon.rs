//! Daemon - the main controller service
//!
//! Orchestrates endpoint negotiation, capture and segmentation, recognition,
//! intent routing, the supervised engines, and spoken output.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::audio::{
    EndpointNegotiator, FrameSource, NegotiatorConfig, Pactl, SAMPLE_RATE, SegmenterConfig,
    SpeechSegmenter,
};
use crate::engine::{EngineSupervisor, SupervisorEvent, VisionFrame};
use crate::recognize::{Recognizer, WhisperCli, normalize_transcript};
use crate::router::{EngineExchange, Intent, IntentRouter, OverrideCommand, SystemCommand};
use crate::speech::{PiperSynthesizer, Priority, SpeechQueue, Synthesizer};
use crate::{AudioControl, Config, Error, Result};

/// Timeout for one blocking frame read on the capture thread
const FRAME_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Relative step for volume up/down intents (percent)
const VOLUME_STEP: i32 = 10;

/// How long a spoken shutdown announcement may hold up teardown
const SHUTDOWN_ANNOUNCE_GRACE: Duration = Duration::from_secs(5);

type SharedSupervisor = Arc<tokio::sync::Mutex<EngineSupervisor>>;

/// The Lumen daemon - wires the whole voice pipeline together
pub struct Daemon {
    config: Config,
    recognizer: Arc<dyn Recognizer>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if a configured recognition or synthesis model is
    /// missing on disk
    pub fn new(config: Config) -> Result<Self> {
        let recognizer: Arc<dyn Recognizer> = Arc::new(WhisperCli::new(&config.recognizer)?);
        let synthesizer: Arc<dyn Synthesizer> = Arc::new(PiperSynthesizer::new(&config.speech)?);

        Ok(Self {
            config,
            recognizer,
            synthesizer,
        })
    }

    /// Run the daemon until interrupted or spoken shutdown
    ///
    /// # Errors
    ///
    /// Returns error if endpoint negotiation fails, an engine cannot reach
    /// ready, or the capture device cannot be opened
    #[allow(clippy::too_many_lines)]
    pub async fn run(self) -> Result<()> {
        tracing::info!("daemon starting");

        let token = CancellationToken::new();
        spawn_signal_task(token.clone());

        let control: Arc<dyn AudioControl> = Arc::new(Pactl::new());
        let mut negotiator = EndpointNegotiator::new(
            Arc::clone(&control),
            NegotiatorConfig {
                voice_profile: self.config.audio.voice_profile.clone(),
                fallback_profile: self.config.audio.fallback_profile.clone(),
                unstable_codecs: self.config.audio.unstable_codecs.clone(),
                ..NegotiatorConfig::default()
            },
        );
        let source = negotiator.ensure_input_ready().await?;
        if self.config.audio.shadow_monitor {
            negotiator.start_shadow_monitor().await;
        }

        let queue = Arc::new(SpeechQueue::new(
            Arc::clone(&self.synthesizer),
            Arc::clone(&control),
            self.config.speech.player.clone(),
        ));
        queue.start(token.child_token());

        // Readiness-wait cues must be speakable while the engines start,
        // so the queue consumer is already running here
        let (events_tx, events_rx) = mpsc::channel::<SupervisorEvent>(16);
        spawn_event_task(events_rx, Arc::clone(&queue));

        let mut vision =
            EngineSupervisor::with_events(self.config.vision.clone(), events_tx.clone());
        let mut brain = EngineSupervisor::with_events(self.config.brain.clone(), events_tx);
        let vision_frames = vision
            .take_frames()
            .ok_or_else(|| Error::Engine("vision frames already taken".to_string()))?;
        let brain_frames = brain
            .take_frames()
            .ok_or_else(|| Error::Engine("language frames already taken".to_string()))?;

        let (vision_started, brain_started) =
            tokio::join!(vision.start(&token), brain.start(&token));
        if vision_started.is_err() || brain_started.is_err() {
            if let Err(e) = &vision_started {
                tracing::error!(error = %e, "vision engine failed to start");
            }
            if let Err(e) = &brain_started {
                tracing::error!(error = %e, "language engine failed to start");
            }
            token.cancel();
            vision.stop().await;
            brain.stop().await;
            queue.shutdown().await;
            negotiator.stop_shadow_monitor().await;
            return vision_started.and(brain_started);
        }

        queue.enqueue("all engines ready", Priority::Normal);

        let vision: SharedSupervisor = Arc::new(tokio::sync::Mutex::new(vision));
        let brain: SharedSupervisor = Arc::new(tokio::sync::Mutex::new(brain));

        let exchange = EngineExchange::new(
            Arc::clone(&brain),
            brain_frames,
            self.config.brain.response_timeout,
        );
        let router = Arc::new(tokio::sync::Mutex::new(IntentRouter::new(exchange)));

        let vision_task = spawn_vision_task(vision_frames, Arc::clone(&queue), token.clone());

        let (transcripts_tx, mut transcripts_rx) = mpsc::channel::<String>(8);
        let (init_tx, init_rx) = tokio::sync::oneshot::channel::<Result<()>>();
        let capture_handle = {
            let token = token.clone();
            let recognizer = Arc::clone(&self.recognizer);
            let segmenter_config = SegmenterConfig {
                energy_threshold: self.config.audio.energy_threshold,
                min_speech_ms: self.config.audio.min_speech_ms,
                min_silence_ms: self.config.audio.min_silence_ms,
                sample_rate: SAMPLE_RATE,
            };
            let source = source.clone();
            std::thread::spawn(move || {
                capture_loop(
                    &token,
                    recognizer.as_ref(),
                    segmenter_config,
                    &source,
                    &transcripts_tx,
                    init_tx,
                );
            })
        };

        let capture_init = init_rx
            .await
            .map_err(|_| Error::Audio("capture thread died during startup".to_string()))
            .and_then(|init| init);

        let run_result = if let Err(e) = capture_init {
            tracing::error!(error = %e, "capture startup failed");
            Err(e)
        } else {
            tracing::info!("listening");

            let mut tasks: JoinSet<()> = JoinSet::new();
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    transcript = transcripts_rx.recv() => {
                        let Some(transcript) = transcript else {
                            tracing::warn!("capture channel closed");
                            break;
                        };
                        let router = Arc::clone(&router);
                        let queue = Arc::clone(&queue);
                        let vision = Arc::clone(&vision);
                        let token = token.clone();
                        tasks.spawn(async move {
                            let routed = router.lock().await.route(&transcript).await;
                            match routed {
                                Ok(intent) => {
                                    execute_intent(intent, &queue, &vision, &token).await;
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "intent routing failed");
                                    queue.enqueue(
                                        "the language engine is not responding",
                                        Priority::Normal,
                                    );
                                }
                            }
                        });
                    }
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            if !e.is_cancelled() {
                                tracing::warn!(error = %e, "routing task panicked");
                            }
                        }
                    }
                }
            }
            tasks.shutdown().await;
            Ok(())
        };

        // Teardown order: subprocess trees first, then local handles
        token.cancel();
        vision.lock().await.stop().await;
        brain.lock().await.stop().await;
        queue.shutdown().await;
        negotiator.stop_shadow_monitor().await;
        vision_task.abort();
        if capture_handle.join().is_err() {
            tracing::warn!("capture thread panicked");
        }

        tracing::info!("daemon stopped");
        run_result
    }
}

/// Cancel the token on Ctrl-C or SIGTERM
fn spawn_signal_task(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
            }
        }
        tracing::info!("shutdown signal received");
        token.cancel();
    });
}

/// Speak out-of-band supervisor events
fn spawn_event_task(mut events: mpsc::Receiver<SupervisorEvent>, queue: Arc<SpeechQueue>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SupervisorEvent::StillWaiting { engine } => {
                    queue.enqueue(
                        &format!("still waiting for the {engine} engine"),
                        Priority::Normal,
                    );
                }
            }
        }
    });
}

/// Speak asynchronous vision answers as they arrive
fn spawn_vision_task(
    mut frames: mpsc::UnboundedReceiver<serde_json::Value>,
    queue: Arc<SpeechQueue>,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        tracing::warn!("vision frame stream closed");
                        break;
                    };
                    match serde_json::from_value::<VisionFrame>(frame) {
                        Ok(frame) => {
                            if let Some(text) = frame.text {
                                if !text.answer.is_empty() {
                                    tracing::info!(time = %text.time, "vision answer");
                                    queue.enqueue(&text.answer, Priority::Normal);
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "unintelligible vision frame dropped");
                        }
                    }
                }
            }
        }
    })
}

/// Capture, segment, and recognize on a dedicated thread
///
/// cpal streams are not `Send`, and recognition shells out synchronously,
/// so this whole loop stays off the async runtime. Finished transcripts go
/// back over a channel.
fn capture_loop(
    token: &CancellationToken,
    recognizer: &dyn Recognizer,
    segmenter_config: SegmenterConfig,
    source: &str,
    transcripts: &mpsc::Sender<String>,
    init: tokio::sync::oneshot::Sender<Result<()>>,
) {
    let mut frame_source = match FrameSource::new(Some(source)) {
        Ok(mut frame_source) => match frame_source.start() {
            Ok(()) => {
                let _ = init.send(Ok(()));
                frame_source
            }
            Err(e) => {
                let _ = init.send(Err(e));
                return;
            }
        },
        Err(e) => {
            let _ = init.send(Err(e));
            return;
        }
    };

    let mut segmenter = SpeechSegmenter::new(segmenter_config);
    let mut utterance: Vec<f32> = Vec::new();

    while !token.is_cancelled() {
        match frame_source.read_frame(FRAME_READ_TIMEOUT) {
            Ok(Some(frame)) => segmenter.push_frame(&frame),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "frame read failed");
                break;
            }
        }

        while let Some(segment) = segmenter.take_pending() {
            utterance.extend_from_slice(&segment);
        }

        if !utterance.is_empty() {
            let samples = std::mem::take(&mut utterance);
            match recognizer.transcribe(&samples, SAMPLE_RATE) {
                Ok(raw) => {
                    let transcript = normalize_transcript(&raw);
                    if transcript.is_empty() {
                        tracing::debug!("empty recognition result, skipped");
                    } else {
                        tracing::info!(transcript = %transcript, "utterance recognized");
                        if transcripts.blocking_send(transcript).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "recognition failed"),
            }
        }
    }

    frame_source.stop();
    tracing::debug!("capture loop exited");
}

/// Act on one routed intent
async fn execute_intent(
    intent: Intent,
    queue: &SpeechQueue,
    vision: &SharedSupervisor,
    token: &CancellationToken,
) {
    match intent {
        Intent::Identify(text) => {
            let sent = vision.lock().await.send(&text).await;
            if let Err(e) = sent {
                tracing::error!(error = %e, "vision request failed");
                queue.enqueue("the vision engine is not responding", Priority::Normal);
            }
        }
        Intent::System(command) => execute_system(command, queue, token).await,
        Intent::Override(command) => match command {
            OverrideCommand::Stop => queue.stop(true),
            OverrideCommand::Skip => queue.stop(false),
            OverrideCommand::Pause => queue.pause(true),
            OverrideCommand::Play => queue.pause(false),
        },
        Intent::Error(message) => queue.enqueue(&message, Priority::Normal),
    }
}

async fn execute_system(command: SystemCommand, queue: &SpeechQueue, token: &CancellationToken) {
    let result = match command {
        SystemCommand::VolumeUp => queue.step_volume(VOLUME_STEP).await,
        SystemCommand::VolumeDown => queue.step_volume(-VOLUME_STEP).await,
        SystemCommand::VolumeSet(level) => queue.set_volume(u32::from(level)).await,
        SystemCommand::Mute => queue.set_mute(true).await,
        SystemCommand::Unmute => queue.set_mute(false).await,
        SystemCommand::Shutdown => {
            tracing::info!("shutdown intent received");
            queue.enqueue("shutting down", Priority::Immediate);

            // Let the announcement finish, but never hang teardown on it
            let deadline = tokio::time::Instant::now() + SHUTDOWN_ANNOUNCE_GRACE;
            while !queue.is_idle() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            token.cancel();
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "system command failed");
        queue.enqueue("that setting could not be changed", Priority::Normal);
    }
}
