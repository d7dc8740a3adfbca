//! Bridge configuration, persisted as JSON next to the preset store.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::LAMP_NAME;
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "lamp_config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LampConfig {
    /// Advertised name the auto-connect scan matches exactly.
    pub device_name: String,
}

impl Default for LampConfig {
    fn default() -> Self {
        Self {
            device_name: LAMP_NAME.to_string(),
        }
    }
}

impl LampConfig {
    /// Default on-disk location, inside the platform config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blelamp-bridge")
            .join(CONFIG_FILE_NAME)
    }

    /// Loads the config, falling back to defaults when the file is absent
    /// or unreadable.
    pub async fn load(path: &Path) -> Self {
        match fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Config file at {:?} is invalid ({}), using default.", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("Config file not found at {:?}, using default.", path);
                Self::default()
            }
        }
    }

    /// Saves the config, creating the parent directory if needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            ensure_directory_exists(parent).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).await?;
        info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_default() {
        let config = LampConfig::load(Path::new("/nonexistent/lamp_config.json")).await;
        assert_eq!(config.device_name, LAMP_NAME);
    }

    #[tokio::test]
    async fn save_and_reload() {
        let dir = std::env::temp_dir().join(format!("blelamp-config-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE_NAME);

        let config = LampConfig {
            device_name: "BLE LAMP 2".to_string(),
        };
        config.save(&path).await.unwrap();
        let loaded = LampConfig::load(&path).await;
        assert_eq!(loaded.device_name, "BLE LAMP 2");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
