//! TOML-based configuration system.
//!
//! Loads settings from a `config.toml` file, falling back to defaults. Every
//! struct implements `Default` so a missing or partial config file still
//! produces a working app. The home address is deliberately absent: the app
//! only ever shows the dictionary.
//!
//! ## Config file search order
//!
//! 1. `LIMOT_CONFIG` environment variable (explicit override)
//! 2. Next to the executable (`<exe_dir>/config.toml`)
//! 3. Platform config directory (`%APPDATA%\LimoT\config.toml` on Windows,
//!    `$XDG_CONFIG_HOME/limot/config.toml` elsewhere)
//! 4. Current working directory (`./config.toml`)
//! 5. No file found → `Config::default()`

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::appearance::DarkMode;
use crate::shell::ShellMetrics;

// ─────────────────────────────────────────────────────────────────────────────
// Config structs
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub window: WindowConfig,
    pub toolbar: ToolbarConfig,
    pub appearance: AppearanceConfig,
    pub adblock: AdblockConfig,
    pub servo: ServoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub window_title: String,
}

/// Window dimensions (logical pixels).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

/// Progress bar, error banner and button bar appearance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolbarConfig {
    pub height: f32,
    pub progress_height: f32,
    pub banner_height: f32,
    pub banner_margin: f32,
    pub font_size: f32,
    pub icon_size: f32,
    pub colors: ToolbarColors,
}

/// RGBA colors for the chrome UI (values 0.0–1.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolbarColors {
    pub background: [f32; 4],
    pub separator: [f32; 4],
    pub accent: [f32; 4],
    pub disabled: [f32; 4],
    pub progress_track: [f32; 4],
    pub banner_background: [f32; 4],
    pub banner_text: [f32; 4],
    pub warning: [f32; 4],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppearanceConfig {
    pub dark_mode: DarkMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdblockConfig {
    pub enabled: bool,
}

/// Servo engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    /// Maximum layout threads. 0 = auto-detect from CPU count.
    pub layout_threads: i64,
    /// HTTP cache size in bytes.
    pub cache_size: i64,
    /// User-agent string. Empty = default UA.
    pub user_agent: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Default impls
// ─────────────────────────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            window_title: "LimoT".to_string(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 480,
            height: 860,
        }
    }
}

impl Default for ToolbarConfig {
    fn default() -> Self {
        Self {
            height: 56.0,
            progress_height: 3.0,
            banner_height: 40.0,
            banner_margin: 8.0,
            font_size: 13.0,
            icon_size: 22.0,
            colors: ToolbarColors::default(),
        }
    }
}

impl Default for ToolbarColors {
    fn default() -> Self {
        Self {
            background: [0.11, 0.11, 0.12, 1.0],
            separator: [0.28, 0.28, 0.29, 1.0],
            accent: [0.04, 0.52, 1.0, 1.0],
            disabled: [0.45, 0.45, 0.47, 1.0],
            progress_track: [0.11, 0.11, 0.12, 1.0],
            banner_background: [0.17, 0.17, 0.18, 0.96],
            banner_text: [0.93, 0.93, 0.93, 1.0],
            warning: [1.0, 0.84, 0.04, 1.0],
        }
    }
}

impl Default for AdblockConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            layout_threads: 0,
            cache_size: 50_000,
            user_agent: String::new(),
        }
    }
}

impl ToolbarConfig {
    pub fn metrics(&self) -> ShellMetrics {
        ShellMetrics {
            progress_height: self.progress_height,
            banner_height: self.banner_height,
            banner_margin: self.banner_margin,
            toolbar_height: self.height,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Loads configuration from a TOML file. Never panics: returns defaults
    /// if no file is found or if parsing fails.
    pub fn load() -> Self {
        match find_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                info!("No config file found, using defaults");
                Config::default()
            }
        }
    }

    fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Config>(&content) {
                Ok(config) => {
                    info!(path = %path.display(), "Configuration loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read config, using defaults");
                Config::default()
            }
        }
    }
}

/// Searches for a config file in the standard locations.
fn find_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("LIMOT_CONFIG") {
        let p = PathBuf::from(path);
        if p.is_file() {
            return Some(p);
        }
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let p = dir.join("config.toml");
        if p.is_file() {
            return Some(p);
        }
    }

    if let Some(dir) = platform_config_dir() {
        let p = dir.join("config.toml");
        if p.is_file() {
            return Some(p);
        }
    }

    let p = PathBuf::from("config.toml");
    p.is_file().then_some(p)
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|appdata| PathBuf::from(appdata).join("LimoT"))
    }
    #[cfg(not(windows))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .or_else(|| std::env::var("HOME").ok().map(|h| format!("{h}/.config")))
            .map(|dir| PathBuf::from(dir).join("limot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.general.window_title, "LimoT");
        assert_eq!(c.window.width, 480);
        assert_eq!(c.toolbar.height, 56.0);
        assert_eq!(c.toolbar.progress_height, 3.0);
        assert_eq!(c.appearance.dark_mode, DarkMode::Auto);
        assert!(c.adblock.enabled);
        assert!(c.servo.user_agent.is_empty());
    }

    #[test]
    fn test_empty_toml_returns_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.window.height, 860);
        assert!(config.adblock.enabled);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
[appearance]
dark_mode = "never"

[adblock]
enabled = false

[toolbar.colors]
accent = [1.0, 0.0, 0.0, 1.0]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.appearance.dark_mode, DarkMode::Never);
        assert!(!config.adblock.enabled);
        assert_eq!(config.toolbar.colors.accent, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.toolbar.colors.warning, [1.0, 0.84, 0.04, 1.0]);
        assert_eq!(config.toolbar.height, 56.0);
    }

    #[test]
    fn test_unknown_dark_mode_is_rejected() {
        let result = toml::from_str::<Config>("[appearance]\ndark_mode = \"sepia\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("limot-config-{}.toml", std::process::id()));
        fs::write(&path, "[window\nwidth = ").unwrap();
        let config = Config::load_from(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(config.window.width, 480);
    }

    #[test]
    fn test_metrics_from_toolbar() {
        let metrics = ToolbarConfig::default().metrics();
        assert_eq!(metrics.toolbar_height, 56.0);
        assert_eq!(metrics.banner_height, 40.0);
    }
}
