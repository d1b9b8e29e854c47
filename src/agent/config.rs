//! Agent Configuration Module
//! Handles loading and validating ota-agent.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub device: DeviceIdentity,
    /// Version string of the firmware currently running on the device
    pub firmware_version: String,
    pub endpoints: Endpoints,
    #[serde(default)]
    pub update: UpdateConfig,
}

/// Immutable per-device credentials, provisioned on the fleet platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Public device identifier issued by the platform
    pub device_key: String,
    /// Shared secret keying the login signature
    pub customer_key: String,
    /// Hardware identifier reported to the backend (MAC address or equivalent)
    pub mac: String,
}

/// Backend endpoint URLs. The platform splits its services across hosts,
/// so each operation carries a full URL rather than one base path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    /// POST {device_key, device_signature, timestamp} -> {token}
    pub login: String,
    /// POST {mac, firmware_version}
    pub register: String,
    /// POST {mac, firmware_version} -> {firmware_id, rollout_id|null}
    pub next_rollout: String,
    /// POST {id} -> {cid}
    pub firmware_info: String,
    /// POST {cid} -> firmware binary
    pub download: String,
    /// POST {mac, firmware_version, rollout_id}
    pub rollout_success: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Seconds between rollout checks when running as a daemon
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Directory firmware images are staged into before installation
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Command invoked with the staged image path to flash the firmware
    #[serde(default)]
    pub install_command: Option<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            staging_dir: default_staging_dir(),
            install_command: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    300
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

impl AgentConfig {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let content = std::fs::read_to_string(config_path)?;
        let config: AgentConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Default config for a freshly provisioned device, pointed at a
    /// platform base domain (e.g. "fleet.example.io").
    pub fn default_for_device(device_key: &str, customer_key: &str, mac: &str, domain: &str) -> Self {
        Self {
            device: DeviceIdentity {
                device_key: device_key.to_string(),
                customer_key: customer_key.to_string(),
                mac: mac.to_string(),
            },
            firmware_version: "1.0.0".to_string(),
            endpoints: Endpoints {
                login: format!("https://auth.{}/auth/login", domain),
                register: format!("https://app.{}/api/device/register", domain),
                next_rollout: format!("https://app.{}/api/device/next/rollout", domain),
                firmware_info: format!("https://ledger.{}/firmware/get", domain),
                download: format!("https://storage.{}/firmware/download", domain),
                rollout_success: format!("https://app.{}/api/device/success/rollout", domain),
            },
            update: UpdateConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = AgentConfig::load(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ota-agent.config.json");

        let config = AgentConfig::default_for_device("dev-1", "secret", "AA:BB:CC:DD:EE:FF", "fleet.example.io");
        config.save(&path).unwrap();

        let loaded = AgentConfig::load(&path).unwrap();
        assert_eq!(loaded.device.device_key, "dev-1");
        assert_eq!(loaded.device.mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(loaded.update.poll_interval_secs, 300);
        assert!(loaded.update.install_command.is_none());
    }

    #[test]
    fn test_update_section_defaults_when_absent() {
        let json = r#"{
            "device": {"device_key": "d", "customer_key": "c", "mac": "m"},
            "firmware_version": "1.0.0",
            "endpoints": {
                "login": "https://a/auth/login",
                "register": "https://a/device/register",
                "next_rollout": "https://a/device/next/rollout",
                "firmware_info": "https://a/firmware/get",
                "download": "https://a/firmware/download",
                "rollout_success": "https://a/device/success/rollout"
            }
        }"#;
        let config: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.update.poll_interval_secs, 300);
        assert_eq!(config.update.staging_dir, PathBuf::from("./staging"));
    }
}
