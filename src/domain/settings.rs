use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "wiimote_rw".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Local sockets exported by the Bluetooth bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "default_control_socket")]
    pub control_socket: String,
    #[serde(default = "default_interrupt_socket")]
    pub interrupt_socket: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            control_socket: default_control_socket(),
            interrupt_socket: default_interrupt_socket(),
        }
    }
}

fn default_control_socket() -> String {
    "/run/wiimote/ctl.sock".to_string()
}
fn default_interrupt_socket() -> String {
    "/run/wiimote/int.sock".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Id reported to the error sink for the connected device
    #[serde(default)]
    pub device_id: i32,

    /// Upper bound on one register transaction. None waits forever.
    #[serde(default)]
    pub rw_timeout_ms: Option<u64>,

    #[serde(default = "default_beep_reports")]
    pub beep_reports: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            bridge: BridgeSettings::default(),
            device_id: 0,
            rw_timeout_ms: None,
            beep_reports: default_beep_reports(),
        }
    }
}

fn default_beep_reports() -> usize {
    100
}

impl Settings {
    pub fn rw_timeout(&self) -> Option<Duration> {
        self.rw_timeout_ms.map(Duration::from_millis)
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(path = %settings_path.display(), "Using default settings: {e}");
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("WiimoteRw");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
