//! Persisted user settings.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// The three persisted flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reboot the device after a successful flash.
    pub auto_reboot: bool,
    /// Refuse images larger than the target partition.
    pub verify_on_flash: bool,
    /// Refuse unverified partition mappings and repartitioning.
    pub safe_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_reboot: false,
            verify_on_flash: true,
            safe_mode: true,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save settings to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn get(&self, setting: Setting) -> bool {
        match setting {
            Setting::AutoReboot => self.auto_reboot,
            Setting::VerifyOnFlash => self.verify_on_flash,
            Setting::SafeMode => self.safe_mode,
        }
    }

    pub fn set(&mut self, setting: Setting, value: bool) {
        let flag = match setting {
            Setting::AutoReboot => &mut self.auto_reboot,
            Setting::VerifyOnFlash => &mut self.verify_on_flash,
            Setting::SafeMode => &mut self.safe_mode,
        };
        *flag = value;
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for setting in Setting::ALL {
            writeln!(f, "{:<16} {}", setting.to_string(), self.get(setting))?;
        }
        Ok(())
    }
}

/// Names one flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    AutoReboot,
    VerifyOnFlash,
    SafeMode,
}

impl Setting {
    pub const ALL: [Setting; 3] = [Setting::AutoReboot, Setting::VerifyOnFlash, Setting::SafeMode];
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::AutoReboot => write!(f, "auto_reboot"),
            Setting::VerifyOnFlash => write!(f, "verify_on_flash"),
            Setting::SafeMode => write!(f, "safe_mode"),
        }
    }
}

impl FromStr for Setting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "auto_reboot" => Ok(Setting::AutoReboot),
            "verify_on_flash" => Ok(Setting::VerifyOnFlash),
            "safe_mode" => Ok(Setting::SafeMode),
            _ => Err(format!("unknown setting '{s}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(!s.auto_reboot);
        assert!(s.verify_on_flash);
        assert!(s.safe_mode);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let s: Settings = toml::from_str("auto_reboot = true").unwrap();
        assert!(s.auto_reboot);
        assert!(s.safe_mode);
    }

    #[test]
    fn test_get_set_by_name() {
        let mut s = Settings::default();
        let key: Setting = "Safe-Mode".parse().unwrap();
        s.set(key, false);
        assert!(!s.get(Setting::SafeMode));
        assert!("turbo".parse::<Setting>().is_err());
        assert!(s.to_string().contains("safe_mode        false"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let s = Settings {
            auto_reboot: true,
            verify_on_flash: false,
            safe_mode: true,
        };
        s.save_to_file(&path).unwrap();
        assert_eq!(Settings::load_from_file(&path).unwrap(), s);
    }
}
