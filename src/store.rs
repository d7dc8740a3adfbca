//! Persistent storage of named color presets.
//! A flat JSON array on disk; records are keyed by name, saving an existing
//! name replaces it, and listing preserves insertion order.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::error;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::Hsv;
use crate::utils::ensure_directory_exists;

const STORE_FILE_NAME: &str = "saved_colors.json";

/// One saved color setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LampPreset {
    pub name: String,
    pub hue: u8,
    pub saturation: u8,
    pub value: u8,
}

impl LampPreset {
    pub fn new(name: impl Into<String>, color: Hsv) -> Self {
        Self {
            name: name.into(),
            hue: color.hue,
            saturation: color.saturation,
            value: color.value,
        }
    }

    pub fn color(&self) -> Hsv {
        Hsv::new(self.hue, self.saturation, self.value)
    }
}

/// File-backed preset store.
pub struct PresetStore {
    file_path: PathBuf,
}

impl PresetStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    /// Store in the platform data directory.
    pub fn open_default() -> Self {
        let path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blelamp-bridge")
            .join(STORE_FILE_NAME);
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Saves a preset, replacing any existing record with the same name.
    pub async fn save(&self, preset: LampPreset) -> Result<()> {
        let mut presets = self.list().await;
        presets.retain(|p| p.name != preset.name);
        presets.push(preset);
        self.write_all(&presets).await
    }

    /// All saved presets in insertion order. An absent or unreadable file
    /// is an empty store, not an error.
    pub async fn list(&self) -> Vec<LampPreset> {
        match fs::read_to_string(&self.file_path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                error!("Preset store at {:?} is corrupt: {}", self.file_path, e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    /// Looks a preset up by name.
    pub async fn get(&self, name: &str) -> Option<LampPreset> {
        self.list().await.into_iter().find(|p| p.name == name)
    }

    /// Deletes a preset by name. Deleting a missing name is a no-op.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut presets = self.list().await;
        presets.retain(|p| p.name != name);
        self.write_all(&presets).await
    }

    async fn write_all(&self, presets: &[LampPreset]) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            ensure_directory_exists(parent).await?;
        }
        let contents = serde_json::to_string_pretty(presets)?;
        fs::write(&self.file_path, contents).await?;
        Ok(())
    }
}
