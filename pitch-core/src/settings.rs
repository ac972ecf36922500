//! # Settings Persistence
//!
//! A small key-value store for the values that survive restarts (currently
//! only the calibration offset). The core talks to the [`SettingsStore`]
//! trait; [`JsonSettingsStore`] keeps the values in a pretty-printed JSON file
//! and [`MemorySettingsStore`] keeps them in memory.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Key under which the calibration offset is stored.
pub const CALIBRATION_OFFSET_KEY: &str = "calibration_offset";

/// Key-value boundary used by the calibrator.
pub trait SettingsStore: Send + Sync {
    fn get_f32(&self, key: &str) -> Option<f32>;

    fn set_f32(&self, key: &str, value: f32) -> Result<(), SettingsError>;
}

/// The on-disk document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // BTreeMap keeps the file ordering stable between writes.
    pub values: BTreeMap<String, f32>,
}

/// Settings backed by a JSON file, rewritten on every change.
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    settings: Mutex<Settings>,
}

impl JsonSettingsStore {
    /// Opens the store at `path`. A missing file starts out empty; a malformed
    /// one is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let settings = if path.exists() {
            load_settings(&path)?
        } else {
            Settings::default()
        };
        tracing::debug!(
            "[SETTINGS] Loaded {} value(s) from {}",
            settings.values.len(),
            path.display()
        );
        Ok(Self {
            path,
            settings: Mutex::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get_f32(&self, key: &str) -> Option<f32> {
        self.lock().values.get(key).copied()
    }

    fn set_f32(&self, key: &str, value: f32) -> Result<(), SettingsError> {
        check_finite(key, value)?;
        let mut settings = self.lock();
        settings.values.insert(key.to_string(), value);
        save_settings(&settings, &self.path)
    }
}

/// Settings that live only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<String, f32>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with a calibration offset.
    pub fn with_offset(offset: f32) -> Self {
        let store = Self::new();
        store
            .lock()
            .insert(CALIBRATION_OFFSET_KEY.to_string(), offset);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, f32>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_f32(&self, key: &str) -> Option<f32> {
        self.lock().get(key).copied()
    }

    fn set_f32(&self, key: &str, value: f32) -> Result<(), SettingsError> {
        check_finite(key, value)?;
        self.lock().insert(key.to_string(), value);
        Ok(())
    }
}

fn check_finite(key: &str, value: f32) -> Result<(), SettingsError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SettingsError::NonFinite {
            key: key.to_string(),
            value,
        })
    }
}

/// Serializes `settings` to `path` as pretty JSON.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    let json_string = serde_json::to_string_pretty(settings)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(json_string.as_bytes())?;
    Ok(())
}

/// Reads settings previously written by [`save_settings`].
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn json_store_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonSettingsStore::open(&path).unwrap();
        assert_eq!(store.get_f32(CALIBRATION_OFFSET_KEY), None);
        store.set_f32(CALIBRATION_OFFSET_KEY, 0.25).unwrap();

        let reopened = JsonSettingsStore::open(&path).unwrap();
        assert_eq!(reopened.get_f32(CALIBRATION_OFFSET_KEY), Some(0.25));
        assert_eq!(reopened.snapshot().values.len(), 1);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonSettingsStore::open(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = JsonSettingsStore::open(&path).unwrap();
        store.set_f32("x", 1.5).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn non_finite_values_are_rejected_and_file_stays_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let store = JsonSettingsStore::open(&path).unwrap();
        store.set_f32(CALIBRATION_OFFSET_KEY, 0.125).unwrap();

        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(matches!(
                store.set_f32(CALIBRATION_OFFSET_KEY, value),
                Err(SettingsError::NonFinite { .. })
            ));
        }
        assert_eq!(store.get_f32(CALIBRATION_OFFSET_KEY), Some(0.125));

        let reopened = JsonSettingsStore::open(store.path()).unwrap();
        assert_eq!(reopened.get_f32(CALIBRATION_OFFSET_KEY), Some(0.125));

        let memory = MemorySettingsStore::with_offset(0.5);
        assert!(memory.set_f32(CALIBRATION_OFFSET_KEY, f32::NAN).is_err());
        assert_eq!(memory.get_f32(CALIBRATION_OFFSET_KEY), Some(0.5));
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemorySettingsStore::with_offset(0.5);
        assert_eq!(store.get_f32(CALIBRATION_OFFSET_KEY), Some(0.5));
        store.set_f32(CALIBRATION_OFFSET_KEY, -0.1).unwrap();
        assert_eq!(store.get_f32(CALIBRATION_OFFSET_KEY), Some(-0.1));
    }
}
