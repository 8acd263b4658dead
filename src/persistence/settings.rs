use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    // If None, use OS default autosave directory
    pub autosave_override: Option<PathBuf>,
    // Seconds of mutation quiescence before the canvas autosaves
    #[serde(default = "AppSettings::default_autosave_secs")]
    pub autosave_secs: u64,
    // Canvas preferences persisted between runs
    pub grid_enabled: bool,
    pub snap_to_grid: bool,
    pub grid_step: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            autosave_override: None,
            autosave_secs: Self::default_autosave_secs(),
            grid_enabled: true,
            snap_to_grid: false,
            grid_step: 20.0,
        }
    }
}

impl AppSettings {
    fn config_dir() -> PathBuf {
        // Cross-platform user config dir
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Application Support/Flow-Canvas
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("Flow-Canvas");
        }
        #[cfg(target_os = "windows")]
        {
            // %APPDATA%\Flow-Canvas
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("Flow-Canvas");
            }
            return PathBuf::from("Flow-Canvas");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_CONFIG_HOME/flow-canvas or ~/.config/flow-canvas
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("flow-canvas");
            }
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("flow-canvas");
        }
    }

    fn autosave_default_dir() -> PathBuf {
        // Cross-platform user-writable autosave dir
        #[cfg(target_os = "macos")]
        {
            let tmp = std::env::var_os("TMPDIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp"));
            return tmp.join("Flow-Canvas");
        }
        #[cfg(target_os = "windows")]
        {
            // %LOCALAPPDATA%\Flow-Canvas\Autosave else TEMP
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                return PathBuf::from(local).join("Flow-Canvas").join("Autosave");
            }
            if let Ok(temp) = std::env::var("TEMP") {
                return PathBuf::from(temp).join("Flow-Canvas");
            }
            return PathBuf::from("Flow-Canvas");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_STATE_HOME/flow-canvas or ~/.local/state/flow-canvas, else /tmp
            if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
                return PathBuf::from(xdg).join("flow-canvas");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".local").join("state").join("flow-canvas");
            }
            return PathBuf::from("/tmp").join("Flow-Canvas");
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_dir().join("settings.ron");
        if path.exists() {
            let mut f = std::fs::File::open(path)?;
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            let v: Self = ron::from_str(&s)?;
            return Ok(v);
        }
        Ok(Self::default())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join("settings.ron");
        let s = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::new())?;
        let mut f = std::fs::File::create(path)?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn autosave_dir(&self) -> PathBuf {
        if let Some(p) = &self.autosave_override { return p.clone(); }
        Self::autosave_default_dir()
    }

    fn default_autosave_secs() -> u64 { 5 }
}
