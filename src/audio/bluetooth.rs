//! Bluetooth endpoint negotiation
//!
//! Wearables pair in a playback-only A2DP profile by default, which exposes no
//! capture source. Before the pipeline starts we switch the card to a
//! voice-capable profile, cycle profiles once more if the link settled on a
//! codec known to produce unusable capture, and route the default source to
//! the headset microphone at full gain.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::{Child, Command};

use crate::error::NegotiationError;
use crate::{AudioControl, Result};

static CARD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Name:\s+(bluez_card\.\S+)").expect("valid regex"));
static ACTIVE_PROFILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Active Profile:\s+(.+)$").expect("valid regex"));
static CODEC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"api\.bluez5\.codec = "([^"]+)""#).expect("valid regex"));

/// Profile markers that indicate a microphone-capable Bluetooth profile
const VOICE_PROFILE_MARKERS: &[&str] = &["headset", "handsfree", "hands-free", "hfp", "hsp"];

/// State of a Bluetooth card parsed from the card listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// Card name, e.g. `bluez_card.78_2B_64_2A_1D_3E`
    pub name: String,

    /// Currently active profile name
    pub active_profile: String,

    /// Negotiated codec, when the sound server reports one
    pub codec: Option<String>,
}

impl CardInfo {
    /// Device address portion of the card name
    #[must_use]
    pub fn address(&self) -> &str {
        self.name.strip_prefix("bluez_card.").unwrap_or(&self.name)
    }
}

/// Check whether a profile name or description is voice-capable
#[must_use]
pub fn is_voice_profile(profile: &str) -> bool {
    let lower = profile.to_lowercase();
    VOICE_PROFILE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Extract the first Bluetooth card from a full card listing
#[must_use]
pub fn parse_bluetooth_card(listing: &str) -> Option<CardInfo> {
    for block in listing.split("Card #") {
        let Some(name) = CARD_NAME_RE.captures(block).map(|c| c[1].to_string()) else {
            continue;
        };
        let Some(active_profile) = ACTIVE_PROFILE_RE
            .captures(block)
            .map(|c| c[1].trim().to_string())
        else {
            continue;
        };
        let codec = CODEC_RE.captures(block).map(|c| c[1].to_string());

        return Some(CardInfo {
            name,
            active_profile,
            codec,
        });
    }

    None
}

/// Negotiation parameters
#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    /// Voice-capable profile to switch the card to
    pub voice_profile: String,

    /// Profile used for the codec renegotiation cycle
    pub fallback_profile: String,

    /// Codecs treated as unusable for capture, matched case-insensitively
    pub unstable_codecs: Vec<String>,

    /// Wait after a profile switch before trusting the card listing
    pub profile_settle: Duration,

    /// Wait in the fallback profile before switching back
    pub codec_settle: Duration,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            voice_profile: "headset-head-unit".to_string(),
            fallback_profile: "a2dp-sink".to_string(),
            unstable_codecs: vec!["cvsd".to_string()],
            profile_settle: Duration::from_millis(2500),
            codec_settle: Duration::from_secs(2),
        }
    }
}

/// Drives a paired Bluetooth card into a usable capture state
pub struct EndpointNegotiator {
    control: Arc<dyn AudioControl>,
    config: NegotiatorConfig,
    shadow: Option<Child>,
}

impl EndpointNegotiator {
    /// Create a negotiator over the given control surface
    #[must_use]
    pub fn new(control: Arc<dyn AudioControl>, config: NegotiatorConfig) -> Self {
        Self {
            control,
            config,
            shadow: None,
        }
    }

    /// Negotiate the card into a voice-capable profile and route capture
    ///
    /// Returns the name of the source that capture was routed to.
    ///
    /// # Errors
    ///
    /// Returns error if no Bluetooth card is paired, the card refuses the
    /// voice profile, or no capture source appears after the switch
    pub async fn ensure_input_ready(&self) -> Result<String> {
        let card = self.bluetooth_card().await?;
        tracing::info!(
            card = %card.name,
            profile = %card.active_profile,
            codec = card.codec.as_deref().unwrap_or("unknown"),
            "found bluetooth card"
        );

        let card = if is_voice_profile(&card.active_profile) {
            card
        } else {
            self.switch_to_voice_profile(&card).await?
        };

        if let Some(codec) = card.codec.as_deref() {
            if self.is_unstable_codec(codec) {
                self.cycle_for_codec(&card, codec).await;
            }
        }

        let source = self.resolve_source(&card).await?;

        self.control.set_source_mute(&source, false).await?;
        self.control.set_source_volume(&source, 100).await?;
        self.control.set_default_source(&source).await?;
        tracing::info!(source = %source, "voice capture routed");

        Ok(source)
    }

    /// Open a decoy playback monitor stream
    ///
    /// Some headsets drop the voice link into a power-saving state when no
    /// audio flows, which garbles the first second of every capture. A raw
    /// `parec` reader on the sink monitor keeps the link hot. Failure to
    /// start it degrades capture quality but is never fatal.
    pub async fn start_shadow_monitor(&mut self) {
        if self.shadow.is_some() {
            return;
        }

        let device = match self.resolve_monitor_device().await {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!(error = %e, "shadow monitor unavailable");
                return;
            }
        };

        let spawned = Command::new("parec")
            .args(["--device", &device, "--raw"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => {
                tracing::info!(device = %device, "shadow monitor started");
                self.shadow = Some(child);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start shadow monitor");
            }
        }
    }

    /// Stop the decoy monitor stream, if one is running
    pub async fn stop_shadow_monitor(&mut self) {
        if let Some(mut child) = self.shadow.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to stop shadow monitor");
            } else {
                tracing::info!("shadow monitor stopped");
            }
        }
    }

    async fn bluetooth_card(&self) -> Result<CardInfo> {
        let listing = self.control.card_listing().await?;
        parse_bluetooth_card(&listing).ok_or_else(|| NegotiationError::NoCard.into())
    }

    async fn switch_to_voice_profile(&self, card: &CardInfo) -> Result<CardInfo> {
        tracing::info!(
            card = %card.name,
            from = %card.active_profile,
            to = %self.config.voice_profile,
            "switching to voice profile"
        );
        self.control
            .set_card_profile(&card.name, &self.config.voice_profile)
            .await?;
        tokio::time::sleep(self.config.profile_settle).await;

        let card = self.bluetooth_card().await?;
        if is_voice_profile(&card.active_profile) {
            Ok(card)
        } else {
            Err(NegotiationError::ProfileSwitchFailed(card.active_profile).into())
        }
    }

    /// Cycle fallback and back to voice to force codec renegotiation
    ///
    /// Advisory only. Some links refuse a better codec and still produce
    /// workable capture, so a stubborn codec is logged rather than fatal.
    async fn cycle_for_codec(&self, card: &CardInfo, codec: &str) {
        tracing::warn!(codec = %codec, "unstable codec negotiated, cycling profiles");

        if let Err(e) = self
            .control
            .set_card_profile(&card.name, &self.config.fallback_profile)
            .await
        {
            tracing::warn!(error = %e, "codec cycle aborted");
            return;
        }
        tokio::time::sleep(self.config.codec_settle).await;

        if let Err(e) = self
            .control
            .set_card_profile(&card.name, &self.config.voice_profile)
            .await
        {
            tracing::warn!(error = %e, "codec cycle aborted");
            return;
        }
        tokio::time::sleep(self.config.profile_settle).await;

        match self.bluetooth_card().await {
            Ok(card) => {
                let codec = card.codec.as_deref().unwrap_or("unknown");
                if self.is_unstable_codec(codec) {
                    tracing::warn!(codec = %codec, "codec unchanged after cycle");
                } else {
                    tracing::info!(codec = %codec, "codec renegotiated");
                }
            }
            Err(e) => tracing::warn!(error = %e, "card vanished during codec cycle"),
        }
    }

    async fn resolve_source(&self, card: &CardInfo) -> Result<String> {
        let address = card.address();
        let listing = self.control.source_listing().await?;

        listing
            .lines()
            .filter(|line| line.contains(address) && !line.contains(".monitor"))
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(String::from)
            .next()
            .ok_or_else(|| NegotiationError::NoInputSource(address.to_string()).into())
    }

    async fn resolve_monitor_device(&self) -> Result<String> {
        let card = self.bluetooth_card().await?;
        let address = card.address().to_string();
        let listing = self.control.sink_listing().await?;

        listing
            .lines()
            .filter(|line| line.contains(&address))
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(|sink| format!("{sink}.monitor"))
            .next()
            .ok_or_else(|| NegotiationError::NoInputSource(address).into())
    }

    fn is_unstable_codec(&self, codec: &str) -> bool {
        self.config
            .unstable_codecs
            .iter()
            .any(|unstable| unstable.eq_ignore_ascii_case(codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD_LISTING: &str = r#"Card #3
	Name: bluez_card.78_2B_64_2A_1D_3E
	Driver: module-bluez5-device.c
	Owner Module: n/a
	Properties:
		api.bluez5.address = "78:2B:64:2A:1D:3E"
		api.bluez5.codec = "sbc_xq"
		device.description = "OpenRun Pro"
	Profiles:
		a2dp-sink: High Fidelity Playback (A2DP Sink) (sinks: 1, sources: 0, priority: 40, available: yes)
		headset-head-unit: Headset Head Unit (HSP/HFP) (sinks: 1, sources: 1, priority: 30, available: yes)
		off: Off (sinks: 0, sources: 0, priority: 0, available: yes)
	Active Profile: a2dp-sink
"#;

    #[test]
    fn parses_card_from_listing() {
        let card = parse_bluetooth_card(CARD_LISTING).unwrap();
        assert_eq!(card.name, "bluez_card.78_2B_64_2A_1D_3E");
        assert_eq!(card.active_profile, "a2dp-sink");
        assert_eq!(card.codec.as_deref(), Some("sbc_xq"));
        assert_eq!(card.address(), "78_2B_64_2A_1D_3E");
    }

    #[test]
    fn skips_non_bluetooth_cards() {
        let listing = "Card #0\n\tName: alsa_card.pci-0000_00_1f.3\n\tActive Profile: analog-stereo\n";
        assert!(parse_bluetooth_card(listing).is_none());
    }

    #[test]
    fn voice_profile_markers() {
        assert!(is_voice_profile("headset-head-unit"));
        assert!(is_voice_profile("Headset Head Unit (HFP)"));
        assert!(is_voice_profile("handsfree_head_unit"));
        assert!(!is_voice_profile("A2DP Sink"));
        assert!(!is_voice_profile("a2dp-sink-sbc_xq"));
    }
}
