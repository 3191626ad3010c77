//! Sound server control via the `pactl` command line

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::{Error, Result};

static VOLUME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)%").expect("valid regex"));

/// Mixer and routing operations the controller needs from the sound server
///
/// The live implementation shells out to `pactl`; tests substitute a scripted
/// fake so negotiation and volume flows run without a sound server.
#[async_trait]
pub trait AudioControl: Send + Sync {
    /// Full card listing, one block per card
    async fn card_listing(&self) -> Result<String>;

    /// Short source listing, one line per source
    async fn source_listing(&self) -> Result<String>;

    /// Short sink listing, one line per sink
    async fn sink_listing(&self) -> Result<String>;

    /// Switch a card to the given profile
    async fn set_card_profile(&self, card: &str, profile: &str) -> Result<()>;

    /// Route capture from the given source
    async fn set_default_source(&self, source: &str) -> Result<()>;

    /// Set capture gain on the given source
    async fn set_source_volume(&self, source: &str, percent: u32) -> Result<()>;

    /// Mute or unmute the given source
    async fn set_source_mute(&self, source: &str, mute: bool) -> Result<()>;

    /// Current playback volume of the default sink
    async fn sink_volume(&self) -> Result<u32>;

    /// Set playback volume on the default sink
    async fn set_sink_volume(&self, percent: u32) -> Result<()>;

    /// Mute or unmute the default sink
    async fn set_sink_mute(&self, mute: bool) -> Result<()>;
}

/// `pactl`-backed control surface
#[derive(Debug, Clone, Copy, Default)]
pub struct Pactl;

impl Pactl {
    /// Create a new pactl control surface
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn run(args: &[&str]) -> Result<String> {
        let output = Command::new("pactl")
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Audio(format!("failed to run pactl: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Audio(format!(
                "pactl {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl AudioControl for Pactl {
    async fn card_listing(&self) -> Result<String> {
        Self::run(&["list", "cards"]).await
    }

    async fn source_listing(&self) -> Result<String> {
        Self::run(&["list", "short", "sources"]).await
    }

    async fn sink_listing(&self) -> Result<String> {
        Self::run(&["list", "short", "sinks"]).await
    }

    async fn set_card_profile(&self, card: &str, profile: &str) -> Result<()> {
        Self::run(&["set-card-profile", card, profile]).await?;
        Ok(())
    }

    async fn set_default_source(&self, source: &str) -> Result<()> {
        Self::run(&["set-default-source", source]).await?;
        Ok(())
    }

    async fn set_source_volume(&self, source: &str, percent: u32) -> Result<()> {
        let volume = format!("{percent}%");
        Self::run(&["set-source-volume", source, &volume]).await?;
        Ok(())
    }

    async fn set_source_mute(&self, source: &str, mute: bool) -> Result<()> {
        let flag = if mute { "1" } else { "0" };
        Self::run(&["set-source-mute", source, flag]).await?;
        Ok(())
    }

    async fn sink_volume(&self) -> Result<u32> {
        let output = Self::run(&["get-sink-volume", "@DEFAULT_SINK@"]).await?;
        parse_volume(&output)
            .ok_or_else(|| Error::Audio(format!("no volume percentage in: {}", output.trim())))
    }

    async fn set_sink_volume(&self, percent: u32) -> Result<()> {
        let volume = format!("{percent}%");
        Self::run(&["set-sink-volume", "@DEFAULT_SINK@", &volume]).await?;
        Ok(())
    }

    async fn set_sink_mute(&self, mute: bool) -> Result<()> {
        let flag = if mute { "1" } else { "0" };
        Self::run(&["set-sink-mute", "@DEFAULT_SINK@", flag]).await?;
        Ok(())
    }
}

/// Extract the first volume percentage from pactl output
fn parse_volume(output: &str) -> Option<u32> {
    VOLUME_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_volume_from_get_sink_volume_output() {
        let output = "Volume: front-left: 39322 /  60% / -13.31 dB,   front-right: 39322 /  60% / -13.31 dB";
        assert_eq!(parse_volume(output), Some(60));
    }

    #[test]
    fn no_percentage_yields_none() {
        assert_eq!(parse_volume("Volume: (unknown)"), None);
    }
}
