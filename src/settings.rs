use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::error::MonitorError;

pub const MIN_DURATION_MINUTES: u64 = 1;
pub const MAX_DURATION_MINUTES: u64 = 60;
pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    /// Readings kept per session; older ones are evicted.
    pub buffer_capacity: usize,
    pub default_duration_minutes: u64,
    pub default_interval_secs: u64,
    pub classify_timeout_secs: u64,
    pub tick_interval_ms: u64,
    pub heartbeat_every_ticks: u32,
    /// Applied to frames before classification; 1.0 disables scaling.
    pub downscale_factor: f32,
    pub export_dir: Option<PathBuf>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            default_duration_minutes: 5,
            default_interval_secs: 2,
            classify_timeout_secs: 10,
            tick_interval_ms: 500,
            heartbeat_every_ticks: 10,
            downscale_factor: 0.5,
            export_dir: None,
        }
    }
}

impl MonitorSettings {
    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |reason: String| Err(MonitorError::InvalidConfig { reason });

        if self.buffer_capacity == 0 {
            return invalid("buffer_capacity must be at least 1".into());
        }
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.default_duration_minutes) {
            return invalid(format!(
                "default_duration_minutes must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES}"
            ));
        }
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.default_interval_secs) {
            return invalid(format!(
                "default_interval_secs must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS}"
            ));
        }
        if self.classify_timeout_secs == 0 {
            return invalid("classify_timeout_secs must be greater than zero".into());
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be greater than zero".into());
        }
        if self.heartbeat_every_ticks == 0 {
            return invalid("heartbeat_every_ticks must be greater than zero".into());
        }
        if !(self.downscale_factor > 0.0 && self.downscale_factor <= 1.0) {
            return invalid("downscale_factor must be in (0, 1]".into());
        }
        Ok(())
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<MonitorSettings>,
}

impl SettingsStore {
    /// Loads settings from `path`. A missing file yields defaults; an
    /// unreadable or invalid one is logged and replaced by defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<MonitorSettings>(&contents) {
                Ok(settings) if settings.validate().is_ok() => settings,
                Ok(_) | Err(_) => {
                    warn!("Ignoring invalid settings in {}", path.display());
                    MonitorSettings::default()
                }
            }
        } else {
            MonitorSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn get(&self) -> MonitorSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: MonitorSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &MonitorSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitorSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.get(), MonitorSettings::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.get();
        settings.default_interval_secs = 5;
        settings.buffer_capacity = 250;
        store.update(settings.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.get(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"default_duration_minutes": 10}"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().get();
        assert_eq!(settings.default_duration_minutes, 10);
        assert_eq!(settings.buffer_capacity, 100);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let mut settings = MonitorSettings::default();
        settings.default_interval_secs = 31;
        assert!(store.update(settings).is_err());

        let mut settings = MonitorSettings::default();
        settings.downscale_factor = 0.0;
        assert!(settings.validate().is_err());

        assert_eq!(store.get(), MonitorSettings::default());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(SettingsStore::new(path).unwrap().get(), MonitorSettings::default());
    }
}
