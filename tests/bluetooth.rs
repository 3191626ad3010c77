//! Bluetooth endpoint negotiation tests
//!
//! Runs the negotiator against a scripted control surface so every profile
//! and codec scenario is reproducible without a sound server

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lumen_core::{
    AudioControl, EndpointNegotiator, Error, NegotiationError, NegotiatorConfig, Result,
};

const CARD: &str = "bluez_card.78_2B_64_2A_1D_3E";
const ADDRESS: &str = "78_2B_64_2A_1D_3E";
const INPUT_SOURCE: &str = "bluez_input.78_2B_64_2A_1D_3E.0";

/// Card listing block in the shape `pactl list cards` produces
fn bluez_card(profile: &str, codec: &str) -> String {
    format!(
        "Card #3\n\
         \tName: {CARD}\n\
         \tDriver: module-bluez5-device.c\n\
         \tProperties:\n\
         \t\tapi.bluez5.codec = \"{codec}\"\n\
         \t\tdevice.description = \"OpenRun Pro\"\n\
         \tActive Profile: {profile}\n"
    )
}

const SOURCES_WITH_INPUT: &str = "1\talsa_input.pci-0000_00_1f.3.analog-stereo\tmodule-alsa-card.c\ts16le 2ch 44100Hz\tRUNNING\n\
     5\tbluez_input.78_2B_64_2A_1D_3E.0\tmodule-bluez5-device.c\ts16le 1ch 16000Hz\tIDLE\n\
     6\tbluez_output.78_2B_64_2A_1D_3E.1.monitor\tmodule-bluez5-device.c\ts16le 1ch 16000Hz\tIDLE\n";

const SOURCES_MONITOR_ONLY: &str = "1\talsa_input.pci-0000_00_1f.3.analog-stereo\tmodule-alsa-card.c\ts16le 2ch 44100Hz\tRUNNING\n\
     6\tbluez_output.78_2B_64_2A_1D_3E.1.monitor\tmodule-bluez5-device.c\ts16le 1ch 16000Hz\tIDLE\n";

/// Mock control surface replaying scripted listings and recording mutations
///
/// Successive `card_listing` calls consume the script; the last entry keeps
/// answering once the script runs out.
struct MockPactl {
    cards: Mutex<VecDeque<String>>,
    sources: String,
    commands: Mutex<Vec<String>>,
}

impl MockPactl {
    fn new(cards: Vec<String>, sources: &str) -> Arc<Self> {
        Arc::new(Self {
            cards: Mutex::new(cards.into()),
            sources: sources.to_string(),
            commands: Mutex::new(Vec::new()),
        })
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: String) {
        self.commands.lock().unwrap().push(command);
    }
}

#[async_trait]
impl AudioControl for MockPactl {
    async fn card_listing(&self) -> Result<String> {
        let mut cards = self.cards.lock().unwrap();
        if cards.len() > 1 {
            Ok(cards.pop_front().unwrap_or_default())
        } else {
            Ok(cards.front().cloned().unwrap_or_default())
        }
    }

    async fn source_listing(&self) -> Result<String> {
        Ok(self.sources.clone())
    }

    async fn sink_listing(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn set_card_profile(&self, card: &str, profile: &str) -> Result<()> {
        self.record(format!("set-card-profile {card} {profile}"));
        Ok(())
    }

    async fn set_default_source(&self, source: &str) -> Result<()> {
        self.record(format!("set-default-source {source}"));
        Ok(())
    }

    async fn set_source_volume(&self, source: &str, percent: u32) -> Result<()> {
        self.record(format!("set-source-volume {source} {percent}"));
        Ok(())
    }

    async fn set_source_mute(&self, source: &str, mute: bool) -> Result<()> {
        self.record(format!("set-source-mute {source} {mute}"));
        Ok(())
    }

    async fn sink_volume(&self) -> Result<u32> {
        Ok(100)
    }

    async fn set_sink_volume(&self, percent: u32) -> Result<()> {
        self.record(format!("set-sink-volume {percent}"));
        Ok(())
    }

    async fn set_sink_mute(&self, mute: bool) -> Result<()> {
        self.record(format!("set-sink-mute {mute}"));
        Ok(())
    }
}

/// Negotiator config with the settle waits zeroed out
fn fast_config() -> NegotiatorConfig {
    NegotiatorConfig {
        profile_settle: Duration::ZERO,
        codec_settle: Duration::ZERO,
        ..NegotiatorConfig::default()
    }
}

#[tokio::test]
async fn test_voice_capable_card_needs_no_switch() {
    let control = MockPactl::new(
        vec![bluez_card("headset-head-unit", "mSBC")],
        SOURCES_WITH_INPUT,
    );
    let negotiator = EndpointNegotiator::new(control.clone(), fast_config());

    let source = negotiator.ensure_input_ready().await.unwrap();

    assert_eq!(source, INPUT_SOURCE);
    assert_eq!(
        control.commands(),
        vec![
            format!("set-source-mute {INPUT_SOURCE} false"),
            format!("set-source-volume {INPUT_SOURCE} 100"),
            format!("set-default-source {INPUT_SOURCE}"),
        ]
    );
}

#[tokio::test]
async fn test_playback_only_card_is_switched_to_voice() {
    let control = MockPactl::new(
        vec![
            bluez_card("a2dp-sink", "sbc_xq"),
            bluez_card("headset-head-unit", "mSBC"),
        ],
        SOURCES_WITH_INPUT,
    );
    let negotiator = EndpointNegotiator::new(control.clone(), fast_config());

    let source = negotiator.ensure_input_ready().await.unwrap();

    assert_eq!(source, INPUT_SOURCE);
    assert_eq!(
        control.commands(),
        vec![
            format!("set-card-profile {CARD} headset-head-unit"),
            format!("set-source-mute {INPUT_SOURCE} false"),
            format!("set-source-volume {INPUT_SOURCE} 100"),
            format!("set-default-source {INPUT_SOURCE}"),
        ]
    );
}

#[tokio::test]
async fn test_refused_profile_switch_is_an_error() {
    // Card reports a2dp both before and after the switch attempt
    let control = MockPactl::new(
        vec![
            bluez_card("a2dp-sink", "sbc_xq"),
            bluez_card("a2dp-sink", "sbc_xq"),
        ],
        SOURCES_WITH_INPUT,
    );
    let negotiator = EndpointNegotiator::new(control, fast_config());

    let err = negotiator.ensure_input_ready().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Bluetooth(NegotiationError::ProfileSwitchFailed(profile)) if profile == "a2dp-sink"
    ));
}

#[tokio::test]
async fn test_missing_card_is_an_error() {
    let listing =
        "Card #0\n\tName: alsa_card.pci-0000_00_1f.3\n\tActive Profile: analog-stereo\n";
    let control = MockPactl::new(vec![listing.to_string()], SOURCES_WITH_INPUT);
    let negotiator = EndpointNegotiator::new(control, fast_config());

    let err = negotiator.ensure_input_ready().await.unwrap_err();
    assert!(matches!(err, Error::Bluetooth(NegotiationError::NoCard)));
}

#[tokio::test]
async fn test_monitor_sources_never_satisfy_capture() {
    let control = MockPactl::new(
        vec![bluez_card("headset-head-unit", "mSBC")],
        SOURCES_MONITOR_ONLY,
    );
    let negotiator = EndpointNegotiator::new(control, fast_config());

    let err = negotiator.ensure_input_ready().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Bluetooth(NegotiationError::NoInputSource(address)) if address == ADDRESS
    ));
}

#[tokio::test]
async fn test_unstable_codec_cycles_profiles() {
    let control = MockPactl::new(
        vec![
            bluez_card("headset-head-unit", "CVSD"),
            bluez_card("headset-head-unit", "mSBC"),
        ],
        SOURCES_WITH_INPUT,
    );
    let negotiator = EndpointNegotiator::new(control.clone(), fast_config());

    let source = negotiator.ensure_input_ready().await.unwrap();

    assert_eq!(source, INPUT_SOURCE);
    assert_eq!(
        control.commands(),
        vec![
            format!("set-card-profile {CARD} a2dp-sink"),
            format!("set-card-profile {CARD} headset-head-unit"),
            format!("set-source-mute {INPUT_SOURCE} false"),
            format!("set-source-volume {INPUT_SOURCE} 100"),
            format!("set-default-source {INPUT_SOURCE}"),
        ]
    );
}

#[tokio::test]
async fn test_stubborn_codec_is_advisory_only() {
    // Codec survives the cycle; negotiation must still succeed
    let control = MockPactl::new(
        vec![bluez_card("headset-head-unit", "cvsd")],
        SOURCES_WITH_INPUT,
    );
    let negotiator = EndpointNegotiator::new(control.clone(), fast_config());

    let source = negotiator.ensure_input_ready().await.unwrap();
    assert_eq!(source, INPUT_SOURCE);

    let commands = control.commands();
    assert_eq!(commands[0], format!("set-card-profile {CARD} a2dp-sink"));
    assert_eq!(
        commands[1],
        format!("set-card-profile {CARD} headset-head-unit")
    );
    assert_eq!(commands.len(), 5);
}

#[tokio::test]
async fn test_bluetooth_card_found_among_other_cards() {
    let listing = format!(
        "Card #0\n\tName: alsa_card.pci-0000_00_1f.3\n\tActive Profile: analog-stereo\n{}",
        bluez_card("headset-head-unit", "mSBC")
    );
    let control = MockPactl::new(vec![listing], SOURCES_WITH_INPUT);
    let negotiator = EndpointNegotiator::new(control, fast_config());

    let source = negotiator.ensure_input_ready().await.unwrap();
    assert_eq!(source, INPUT_SOURCE);
}
