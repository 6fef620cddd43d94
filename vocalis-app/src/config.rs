//! Service configuration (JSON file in the app data directory).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vocalis_core::router::{SourceConfig, DEFAULT_SOURCE};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    /// Source name → routing config. `default` is the fallback bucket;
    /// [`AppConfig::normalize`] guarantees it exists.
    pub sources: HashMap<String, SourceConfig>,
    pub hotkeys: Vec<HotkeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ServiceConfig {
    /// Loopback HTTP port.
    pub port: u16,
    /// Voices directory; unset resolves under the app data directory.
    pub voices_dir: Option<PathBuf>,
    /// Catalog-wide fallback voice id.
    pub default_voice: String,
    /// Cap on queued + playing utterances.
    pub max_queue_depth: usize,
    /// Whether a more urgent arrival cancels the current playback.
    pub interrupt_on_higher_priority: bool,
    /// Output device name; unset plays through the system default.
    pub output_device: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8129,
            voices_dir: None,
            default_voice: String::new(),
            max_queue_depth: 10,
            interrupt_on_higher_priority: true,
            output_device: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct HotkeyConfig {
    /// Chord like `"ctrl+shift+q"`.
    pub keys: String,
    /// Source to route the captured selection under; unset uses
    /// `speak-selection`.
    pub source: Option<String>,
    /// Voice override for this chord.
    pub voice: Option<String>,
}

impl AppConfig {
    pub fn normalize(&mut self) {
        self.service.max_queue_depth = self.service.max_queue_depth.clamp(1, 256);
        self.service.default_voice = self.service.default_voice.trim().to_string();
        self.service.output_device = self
            .service
            .output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        // The router requires a fallback bucket.
        self.sources.entry(DEFAULT_SOURCE.to_string()).or_default();

        self.hotkeys.retain(|h| !h.keys.trim().is_empty());
        for hotkey in &mut self.hotkeys {
            hotkey.keys = hotkey.keys.trim().to_ascii_lowercase();
        }
    }

    pub fn voices_dir(&self) -> PathBuf {
        self.service
            .voices_dir
            .clone()
            .unwrap_or_else(|| data_root().join("voices"))
    }
}

pub fn default_config_path() -> PathBuf {
    data_root().join("config.json")
}

fn data_root() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Vocalis")
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
            .join("vocalis")
    }
}

pub fn load_config(path: &Path) -> AppConfig {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<AppConfig>(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unparseable — using defaults");
                AppConfig::default()
            }
        },
        Err(_) => {
            info!(path = %path.display(), "no config file — using defaults");
            AppConfig::default()
        }
    };
    config.normalize();
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let mut config = AppConfig::default();
        config.normalize();

        assert_eq!(config.service.port, 8129);
        assert_eq!(config.service.max_queue_depth, 10);
        assert!(config.service.interrupt_on_higher_priority);
        assert!(config.sources.contains_key(DEFAULT_SOURCE));
    }

    #[test]
    fn normalize_clamps_depth_and_injects_default_source() {
        let mut config = AppConfig::default();
        config.service.max_queue_depth = 0;
        config.sources.clear();
        config.normalize();

        assert_eq!(config.service.max_queue_depth, 1);
        assert!(config.sources.contains_key(DEFAULT_SOURCE));
    }

    #[test]
    fn parses_camel_case_config_file() {
        let raw = r#"{
            "service": {
                "port": 9000,
                "defaultVoice": "en_US-amy-medium",
                "maxQueueDepth": 5,
                "interruptOnHigherPriority": false
            },
            "sources": {
                "t-tracker": { "voice": "en_US-amy-medium", "filters": ["arrived"], "priority": 1 }
            },
            "hotkeys": [
                { "keys": "Ctrl+Shift+Q " }
            ]
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, raw).unwrap();

        let config = load_config(&path);
        assert_eq!(config.service.port, 9000);
        assert_eq!(config.service.default_voice, "en_US-amy-medium");
        assert_eq!(config.service.max_queue_depth, 5);
        assert!(!config.service.interrupt_on_higher_priority);
        let tracker = &config.sources["t-tracker"];
        assert_eq!(tracker.priority, 1);
        assert_eq!(tracker.filters.as_deref(), Some(&["arrived".to_string()][..]));
        assert_eq!(config.hotkeys[0].keys, "ctrl+shift+q");
        assert!(config.sources.contains_key(DEFAULT_SOURCE));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.json"));
        assert_eq!(config.service.port, 8129);
    }

    #[test]
    fn empty_hotkey_rows_are_dropped() {
        let mut config = AppConfig {
            hotkeys: vec![
                HotkeyConfig {
                    keys: "  ".into(),
                    ..HotkeyConfig::default()
                },
                HotkeyConfig {
                    keys: "ctrl+q".into(),
                    ..HotkeyConfig::default()
                },
            ],
            ..AppConfig::default()
        };
        config.normalize();
        assert_eq!(config.hotkeys.len(), 1);
    }
}
