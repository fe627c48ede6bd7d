//! TOML configuration file loading
//!
//! Supports `~/.config/live-bridge/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfigFile {
    /// Streaming endpoint configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Persona (instructions and voice)
    #[serde(default)]
    pub persona: PersonaFileConfig,

    /// Capture/playback configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Background monitor configuration
    #[serde(default)]
    pub monitors: MonitorsFileConfig,
}

/// Streaming endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// WebSocket endpoint URL
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "models/gemini-2.0-flash-live-001")
    pub model: Option<String>,

    /// API key (prefer the environment for secrets)
    pub api_key: Option<String>,

    /// Connect + setup handshake deadline
    pub connect_timeout_secs: Option<u64>,

    /// Per tool call deadline
    pub tool_timeout_secs: Option<u64>,

    /// Capture policy: "required", "optional" or "disabled"
    pub capture: Option<String>,
}

/// Persona configuration
#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    /// System instructions
    pub instructions: Option<String>,

    /// Prebuilt voice name (e.g. "Puck")
    pub voice: Option<String>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub capture_sample_rate: Option<u32>,
    pub playback_sample_rate: Option<u32>,
    pub frame_samples: Option<usize>,
    pub silence_threshold: Option<f32>,
    pub loud_threshold: Option<f32>,
}

/// Monitor configuration
#[derive(Debug, Default, Deserialize)]
pub struct MonitorsFileConfig {
    pub silence_debounce_secs: Option<u64>,
    pub nudge_text: Option<String>,
    pub noise_debounce_ms: Option<u64>,
    pub scan_period_secs: Option<u64>,
    pub scan_url: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `BridgeConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> BridgeConfigFile {
    let Some(path) = config_file_path() else {
        return BridgeConfigFile::default();
    };

    if !path.exists() {
        return BridgeConfigFile::default();
    }

    load_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Parse and read failures are logged and fall back to defaults.
pub fn load_from(path: &Path) -> BridgeConfigFile {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                BridgeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            BridgeConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/live-bridge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("live-bridge").join("config.toml"))
}
