//! Speech dispatch queue integration tests
//!
//! Drives the queue with a mock synthesizer and a throwaway player command,
//! no sound server required

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lumen_core::{AudioControl, Priority, Result, SpeechQueue, Synthesizer};
use tokio_util::sync::CancellationToken;

mod common;
use common::generate_sine_samples;

/// Mock synthesizer that records what it was asked to speak
struct MockSynthesizer {
    spoken: Arc<Mutex<Vec<String>>>,
    samples: Vec<f32>,
}

impl MockSynthesizer {
    /// Synthesize to silence so no player process is ever spawned
    fn silent() -> Self {
        Self {
            spoken: Arc::new(Mutex::new(Vec::new())),
            samples: Vec::new(),
        }
    }

    /// Synthesize to a short tone so playback actually runs
    fn audible() -> Self {
        Self {
            spoken: Arc::new(Mutex::new(Vec::new())),
            samples: generate_sine_samples(440.0, 0.05, 0.3),
        }
    }

    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(self.samples.clone())
    }

    fn sample_rate(&self) -> u32 {
        22050
    }
}

/// Mock sound server control recording sink mutations
#[derive(Default)]
struct MockControl {
    volume: Mutex<u32>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl MockControl {
    fn with_volume(volume: u32) -> Self {
        Self {
            volume: Mutex::new(volume),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioControl for MockControl {
    async fn card_listing(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn source_listing(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn sink_listing(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn set_card_profile(&self, _card: &str, _profile: &str) -> Result<()> {
        Ok(())
    }

    async fn set_default_source(&self, _source: &str) -> Result<()> {
        Ok(())
    }

    async fn set_source_volume(&self, _source: &str, _percent: u32) -> Result<()> {
        Ok(())
    }

    async fn set_source_mute(&self, _source: &str, _mute: bool) -> Result<()> {
        Ok(())
    }

    async fn sink_volume(&self) -> Result<u32> {
        Ok(*self.volume.lock().unwrap())
    }

    async fn set_sink_volume(&self, percent: u32) -> Result<()> {
        *self.volume.lock().unwrap() = percent;
        self.commands
            .lock()
            .unwrap()
            .push(format!("set-sink-volume {percent}"));
        Ok(())
    }

    async fn set_sink_mute(&self, mute: bool) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("set-sink-mute {mute}"));
        Ok(())
    }
}

/// Player that sleeps instead of playing, so interruption is observable
fn sleeping_player(secs: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), format!("sleep {secs}")]
}

async fn wait_until_idle(queue: &SpeechQueue, budget: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        if queue.is_idle() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    queue.is_idle()
}

async fn wait_until_spoken(synth: &MockSynthesizer, text: &str, budget: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        if synth.spoken().iter().any(|s| s == text) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_head_of_queue_bypasses_normal_order() {
    let synth = Arc::new(MockSynthesizer::silent());
    let control = Arc::new(MockControl::default());
    let queue = SpeechQueue::new(synth.clone(), control, sleeping_player("0"));

    queue.enqueue("A", Priority::Normal);
    queue.enqueue("B", Priority::HeadOfQueue);
    queue.enqueue("C", Priority::Normal);

    let token = CancellationToken::new();
    queue.start(token.clone());

    assert!(wait_until_idle(&queue, Duration::from_secs(2)).await);
    assert_eq!(synth.spoken(), vec!["B", "A", "C"]);

    token.cancel();
    queue.shutdown().await;
}

#[tokio::test]
async fn test_immediate_preempts_playback_and_keeps_queue() {
    let synth = Arc::new(MockSynthesizer::audible());
    let control = Arc::new(MockControl::default());
    let queue = SpeechQueue::new(synth.clone(), control, sleeping_player("1"));

    let token = CancellationToken::new();
    queue.start(token.clone());

    queue.enqueue("A", Priority::Normal);
    assert!(wait_until_spoken(&synth, "A", Duration::from_secs(2)).await);

    queue.enqueue("queued-one", Priority::Normal);
    queue.enqueue("queued-two", Priority::Normal);

    let preempted_at = std::time::Instant::now();
    queue.enqueue("D", Priority::Immediate);

    // D must start well before A's one-second playback would have ended
    assert!(wait_until_spoken(&synth, "D", Duration::from_secs(2)).await);
    assert!(preempted_at.elapsed() < Duration::from_millis(700));

    assert!(wait_until_idle(&queue, Duration::from_secs(5)).await);
    assert_eq!(synth.spoken(), vec!["A", "D", "queued-one", "queued-two"]);

    token.cancel();
    queue.shutdown().await;
}

#[tokio::test]
async fn test_immediate_while_idle_plays_at_once() {
    let synth = Arc::new(MockSynthesizer::silent());
    let control = Arc::new(MockControl::default());
    let queue = SpeechQueue::new(synth.clone(), control, sleeping_player("0"));

    let token = CancellationToken::new();
    queue.start(token.clone());

    queue.enqueue("urgent", Priority::Immediate);

    assert!(wait_until_spoken(&synth, "urgent", Duration::from_secs(2)).await);
    assert!(wait_until_idle(&queue, Duration::from_secs(2)).await);

    token.cancel();
    queue.shutdown().await;
}

#[tokio::test]
async fn test_stop_without_clear_keeps_pending() {
    let synth = Arc::new(MockSynthesizer::audible());
    let control = Arc::new(MockControl::default());
    let queue = SpeechQueue::new(synth.clone(), control, sleeping_player("1"));

    let token = CancellationToken::new();
    queue.start(token.clone());

    queue.enqueue("A", Priority::Normal);
    assert!(wait_until_spoken(&synth, "A", Duration::from_secs(2)).await);
    queue.enqueue("B", Priority::Normal);

    queue.stop(false);

    assert!(wait_until_idle(&queue, Duration::from_secs(5)).await);
    assert_eq!(synth.spoken(), vec!["A", "B"]);

    token.cancel();
    queue.shutdown().await;
}

#[tokio::test]
async fn test_stop_with_clear_discards_pending() {
    let synth = Arc::new(MockSynthesizer::audible());
    let control = Arc::new(MockControl::default());
    let queue = SpeechQueue::new(synth.clone(), control, sleeping_player("1"));

    let token = CancellationToken::new();
    queue.start(token.clone());

    queue.enqueue("A", Priority::Normal);
    assert!(wait_until_spoken(&synth, "A", Duration::from_secs(2)).await);
    queue.enqueue("B", Priority::Normal);
    queue.enqueue("C", Priority::Normal);

    queue.stop(true);

    assert!(wait_until_idle(&queue, Duration::from_secs(2)).await);
    assert_eq!(synth.spoken(), vec!["A"]);

    token.cancel();
    queue.shutdown().await;
}

#[tokio::test]
async fn test_pause_suspends_and_resume_finishes() {
    let synth = Arc::new(MockSynthesizer::audible());
    let control = Arc::new(MockControl::default());
    let queue = SpeechQueue::new(synth.clone(), control, sleeping_player("0.3"));

    let token = CancellationToken::new();
    queue.start(token.clone());

    queue.enqueue("A", Priority::Normal);
    assert!(wait_until_spoken(&synth, "A", Duration::from_secs(2)).await);
    queue.pause(true);

    // Long past the player's own runtime: a paused item must not complete
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(!queue.is_idle());

    queue.pause(false);
    assert!(wait_until_idle(&queue, Duration::from_secs(3)).await);

    token.cancel();
    queue.shutdown().await;
}

#[tokio::test]
async fn test_volume_steps_are_bounded() {
    let synth = Arc::new(MockSynthesizer::silent());
    let control = Arc::new(MockControl::with_volume(60));
    let queue = SpeechQueue::new(synth, control.clone(), sleeping_player("0"));

    queue.step_volume(10).await.unwrap();
    queue.step_volume(-30).await.unwrap();
    queue.set_volume(200).await.unwrap();
    queue.set_mute(true).await.unwrap();

    assert_eq!(
        control.commands(),
        vec![
            "set-sink-volume 70",
            "set-sink-volume 40",
            "set-sink-volume 100",
            "set-sink-mute true",
        ]
    );
}

#[tokio::test]
async fn test_idle_consumer_observes_cancellation_quickly() {
    let synth = Arc::new(MockSynthesizer::silent());
    let control = Arc::new(MockControl::default());
    let queue = SpeechQueue::new(synth, control, sleeping_player("0"));

    let token = CancellationToken::new();
    queue.start(token.clone());
    tokio::time::sleep(Duration::from_millis(150)).await;

    token.cancel();
    // Idle poll is 100ms; exit must happen within roughly one interval
    tokio::time::timeout(Duration::from_secs(1), queue.shutdown())
        .await
        .expect("consumer did not observe cancellation in time");
}

#[tokio::test]
async fn test_cancellation_interrupts_active_playback() {
    let synth = Arc::new(MockSynthesizer::audible());
    let control = Arc::new(MockControl::default());
    let queue = SpeechQueue::new(synth.clone(), control, sleeping_player("10"));

    let token = CancellationToken::new();
    queue.start(token.clone());

    queue.enqueue("A", Priority::Normal);
    assert!(wait_until_spoken(&synth, "A", Duration::from_secs(2)).await);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), queue.shutdown())
        .await
        .expect("active playback held up cancellation");
}
