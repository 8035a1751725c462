//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use livescribe_core::config::DEFAULT_SAMPLE_RATE;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_FILTER: &str = "livescribe=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Microphone,
    Wav,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct HostSettings {
    pub capture_source: CaptureSource,
    pub preferred_input_device: Option<String>,
    pub wav_path: Option<PathBuf>,
    /// Pace WAV replay at the file's sample rate.
    pub wav_realtime: bool,
    /// Used when an `init` request carries no `modelPath`.
    pub default_model_path: String,
    pub default_sample_rate: u32,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            capture_source: CaptureSource::Microphone,
            preferred_input_device: None,
            wav_path: None,
            wav_realtime: true,
            default_model_path: String::new(),
            default_sample_rate: DEFAULT_SAMPLE_RATE,
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl HostSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.wav_path = self
            .wav_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        if self.capture_source == CaptureSource::Wav && self.wav_path.is_none() {
            self.capture_source = CaptureSource::Microphone;
        }
        self.default_model_path = self.default_model_path.trim().to_string();
        self.default_sample_rate = self.default_sample_rate.clamp(8_000, 48_000);
        let filter = self.log_filter.trim();
        self.log_filter = if filter.is_empty() {
            DEFAULT_LOG_FILTER.into()
        } else {
            filter.to_string()
        };
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Livescribe")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("livescribe")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> HostSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<HostSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &HostSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
