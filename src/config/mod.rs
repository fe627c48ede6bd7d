//! Configuration management for the live session bridge
//!
//! Precedence is env > toml > default. Every threshold and debounce window the
//! monitors use lives here so it can be tuned without touching business logic.

pub mod file;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::{Error, Result};

/// Default streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default live model
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Puck";

/// Default system instructions
const DEFAULT_INSTRUCTIONS: &str = "You are the voice of a business analytics dashboard. \
Answer briefly. Prefix every reply with a sentiment tag such as [SENTIMENT: POSITIVE], \
[SENTIMENT: NEUTRAL] or [SENTIMENT: NEGATIVE]. Use create_widget to put figures on the \
dashboard and update_mode when the user asks for a different display mode.";

/// Default coaching prompt sent after sustained silence
const DEFAULT_NUDGE_TEXT: &str =
    "The user has been quiet for a while. Offer one short, friendly suggestion for what to look at next.";

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Streaming endpoint configuration
    pub session: SessionConfig,

    /// Persona (instructions and voice)
    pub persona: PersonaConfig,

    /// Capture/playback configuration
    pub audio: AudioConfig,

    /// Background monitor configuration
    pub monitors: MonitorConfig,
}

/// Streaming endpoint configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint URL (without credentials)
    pub endpoint: String,

    /// Model identifier sent in the setup message
    pub model: String,

    /// API key, appended as the `key` query parameter
    pub api_key: Option<SecretString>,

    /// Deadline for transport open, setup handshake and device acquisition
    pub connect_timeout: Duration,

    /// Deadline for a single tool handler
    pub tool_timeout: Duration,

    /// What to do when the microphone is unavailable
    pub capture: CapturePolicy,
}

impl SessionConfig {
    /// Build the endpoint URL including credentials
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not a valid `ws://` or `wss://` URL
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", self.endpoint)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "endpoint must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key.expose_secret());
        }

        Ok(url)
    }
}

/// Microphone policy for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePolicy {
    /// Connect fails if the microphone is unavailable
    #[default]
    Required,
    /// Session continues audio-out only if the microphone is unavailable
    Optional,
    /// Never open the microphone
    Disabled,
}

impl CapturePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "required" => Some(Self::Required),
            "optional" => Some(Self::Optional),
            "disabled" | "off" | "none" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Persona configuration
#[derive(Debug, Clone)]
pub struct PersonaConfig {
    /// System instructions
    pub instructions: String,

    /// Prebuilt voice name
    pub voice: String,
}

/// Capture/playback configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Rate of outbound audio frames (Hz)
    pub capture_sample_rate: u32,

    /// Fallback rate of inbound audio when the payload names none (Hz)
    pub playback_sample_rate: u32,

    /// Samples per outbound frame
    pub frame_samples: usize,

    /// RMS below this counts as silence (tunable)
    pub silence_threshold: f32,

    /// RMS above this counts as loud (tunable)
    pub loud_threshold: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            frame_samples: 1600,
            silence_threshold: 0.01,
            loud_threshold: 0.3,
        }
    }
}

/// Background monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Silence must hold this long before a nudge
    pub silence_debounce: Duration,

    /// Coaching prompt sent on a nudge
    pub nudge_text: String,

    /// Loudness must hold this long before a privacy prompt
    pub noise_debounce: Duration,

    /// Ambient scan period
    pub scan_period: Duration,

    /// Analysis service URL; ambient scans are off without it
    pub scan_url: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            silence_debounce: Duration::from_secs(10),
            nudge_text: DEFAULT_NUDGE_TEXT.to_string(),
            noise_debounce: Duration::from_secs(2),
            scan_period: Duration::from_secs(60),
            scan_url: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                endpoint: DEFAULT_ENDPOINT.to_string(),
                model: DEFAULT_MODEL.to_string(),
                api_key: None,
                connect_timeout: Duration::from_secs(10),
                tool_timeout: Duration::from_secs(15),
                capture: CapturePolicy::default(),
            },
            persona: PersonaConfig {
                instructions: DEFAULT_INSTRUCTIONS.to_string(),
                voice: DEFAULT_VOICE.to_string(),
            },
            audio: AudioConfig::default(),
            monitors: MonitorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn from_sources(
        fc: file::BridgeConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();
        let parsed = |key: &str| env(key).and_then(|v| v.parse::<u64>().ok());

        let capture = match env("LIVE_BRIDGE_CAPTURE").or(fc.session.capture) {
            Some(value) => CapturePolicy::parse(&value)
                .ok_or_else(|| Error::Config(format!("unknown capture policy: {value}")))?,
            None => defaults.session.capture,
        };

        let session = SessionConfig {
            endpoint: env("LIVE_BRIDGE_ENDPOINT")
                .or(fc.session.endpoint)
                .unwrap_or(defaults.session.endpoint),
            model: env("LIVE_BRIDGE_MODEL")
                .or(fc.session.model)
                .unwrap_or(defaults.session.model),
            api_key: env("GEMINI_API_KEY")
                .or_else(|| env("LIVE_BRIDGE_API_KEY"))
                .or(fc.session.api_key)
                .map(SecretString::from),
            connect_timeout: parsed("LIVE_BRIDGE_CONNECT_TIMEOUT_SECS")
                .or(fc.session.connect_timeout_secs)
                .map_or(defaults.session.connect_timeout, Duration::from_secs),
            tool_timeout: parsed("LIVE_BRIDGE_TOOL_TIMEOUT_SECS")
                .or(fc.session.tool_timeout_secs)
                .map_or(defaults.session.tool_timeout, Duration::from_secs),
            capture,
        };

        let persona = PersonaConfig {
            instructions: env("LIVE_BRIDGE_INSTRUCTIONS")
                .or(fc.persona.instructions)
                .unwrap_or(defaults.persona.instructions),
            voice: env("LIVE_BRIDGE_VOICE")
                .or(fc.persona.voice)
                .unwrap_or(defaults.persona.voice),
        };

        let audio = AudioConfig {
            capture_sample_rate: fc
                .audio
                .capture_sample_rate
                .unwrap_or(defaults.audio.capture_sample_rate),
            playback_sample_rate: fc
                .audio
                .playback_sample_rate
                .unwrap_or(defaults.audio.playback_sample_rate),
            frame_samples: fc.audio.frame_samples.unwrap_or(defaults.audio.frame_samples),
            silence_threshold: env("LIVE_BRIDGE_SILENCE_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .or(fc.audio.silence_threshold)
                .unwrap_or(defaults.audio.silence_threshold),
            loud_threshold: env("LIVE_BRIDGE_LOUD_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .or(fc.audio.loud_threshold)
                .unwrap_or(defaults.audio.loud_threshold),
        };

        let monitors = MonitorConfig {
            silence_debounce: fc
                .monitors
                .silence_debounce_secs
                .map_or(defaults.monitors.silence_debounce, Duration::from_secs),
            nudge_text: fc.monitors.nudge_text.unwrap_or(defaults.monitors.nudge_text),
            noise_debounce: fc
                .monitors
                .noise_debounce_ms
                .map_or(defaults.monitors.noise_debounce, Duration::from_millis),
            scan_period: parsed("LIVE_BRIDGE_SCAN_PERIOD_SECS")
                .or(fc.monitors.scan_period_secs)
                .map_or(defaults.monitors.scan_period, Duration::from_secs),
            scan_url: env("LIVE_BRIDGE_SCAN_URL").or(fc.monitors.scan_url),
        };

        let config = Self {
            session,
            persona,
            audio,
            monitors,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.capture_sample_rate == 0 || audio.playback_sample_rate == 0 {
            return Err(Error::Config("sample rates must be greater than 0".to_string()));
        }
        if audio.frame_samples == 0 {
            return Err(Error::Config("frame_samples must be greater than 0".to_string()));
        }
        if !(0.0..=1.0).contains(&audio.silence_threshold)
            || !(0.0..=1.0).contains(&audio.loud_threshold)
        {
            return Err(Error::Config("volume thresholds must be within [0, 1]".to_string()));
        }
        if audio.silence_threshold >= audio.loud_threshold {
            return Err(Error::Config(
                "silence_threshold must be below loud_threshold".to_string(),
            ));
        }
        if self.monitors.scan_period.is_zero() {
            return Err(Error::Config("scan period must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = Config::from_sources(file::BridgeConfigFile::default(), env_from(&[])).unwrap();
        assert!((config.audio.silence_threshold - 0.01).abs() < f32::EPSILON);
        assert!((config.audio.loud_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.session.capture, CapturePolicy::Required);
        assert!(config.monitors.scan_url.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = file::BridgeConfigFile::default();
        fc.persona.voice = Some("Kore".to_string());
        fc.session.connect_timeout_secs = Some(3);

        let config = Config::from_sources(
            fc,
            env_from(&[
                ("LIVE_BRIDGE_VOICE", "Charon"),
                ("LIVE_BRIDGE_CAPTURE", "optional"),
            ]),
        )
        .unwrap();

        assert_eq!(config.persona.voice, "Charon");
        assert_eq!(config.session.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.session.capture, CapturePolicy::Optional);
    }

    #[test]
    fn endpoint_url_carries_key() {
        let config = Config::from_sources(
            file::BridgeConfigFile::default(),
            env_from(&[("GEMINI_API_KEY", "abc123")]),
        )
        .unwrap();

        let url = config.session.endpoint_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert!(url.query_pairs().any(|(k, v)| k == "key" && v == "abc123"));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let result = Config::from_sources(
            file::BridgeConfigFile::default(),
            env_from(&[("LIVE_BRIDGE_SILENCE_THRESHOLD", "0.5")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_http_endpoint() {
        let config = Config::from_sources(
            file::BridgeConfigFile::default(),
            env_from(&[("LIVE_BRIDGE_ENDPOINT", "https://example.com")]),
        )
        .unwrap();
        assert!(config.session.endpoint_url().is_err());
    }
}
