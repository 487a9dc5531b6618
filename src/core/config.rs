// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Driver configuration
//!
//! Timeouts and retry budgets used by the driver and the file system layer.
//! All timeouts are expressed in CPU cycles (33.8688 MHz) and are consumed
//! through [`CdBus::wait_cycles`](crate::core::cdrom::CdBus::wait_cycles),
//! so the simulated drive and real hardware share the same budgets.
//!
//! Configuration is stored as TOML (`cdfs.toml` by default) and may be
//! overridden per field through `CDFS_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::core::error::{CdRomError, Result};

/// Default configuration file name
pub const DEFAULT_CONFIG_PATH: &str = "cdfs.toml";

/// Driver tuning parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Read attempts made by the file system layer before giving up
    pub read_attempts: u32,

    /// Cycles to wait for a command acknowledge
    pub ack_timeout: u64,

    /// Cycles to wait for a blocking command to complete
    pub sync_timeout: u64,

    /// Cycles a read may go without delivering a sector
    pub read_timeout: u64,

    /// Cycles to wait for a background sector transfer
    pub data_timeout: u64,

    /// Cycles to wait for the drive to stop reading, seeking or playing
    pub idle_timeout: u64,

    /// Cycles between two polls of the drive status while waiting for idle
    pub idle_poll_interval: u32,

    /// Cycles consumed by one iteration of a busy-wait loop
    pub poll_step: u32,

    /// Sectors scanned for a volume descriptor when locating a session
    pub session_scan_limit: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            read_attempts: 3,
            ack_timeout: 1_000_000,
            sync_timeout: 100_000_000,
            read_timeout: 20_000_000,
            data_timeout: 1_000_000,
            idle_timeout: 100_000_000,
            // Two vertical blanks at 60 Hz
            idle_poll_interval: 1_128_960,
            poll_step: 500,
            session_scan_limit: 512,
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// - `Ok(DriverConfig)` if the file was read and parsed
    /// - `Err(CdRomError::Io)` if the file could not be read
    /// - `Err(CdRomError::Config)` if the file is not valid TOML
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| CdRomError::Config(format!("Failed to parse config '{}': {}", path, e)))
    }

    /// Load configuration from `path`, or defaults if the file does not exist
    pub fn load_or_default(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            log::debug!("Config file '{}' not found, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| CdRomError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `CDFS_*` environment variable overrides
    ///
    /// Recognized variables are `CDFS_READ_ATTEMPTS`, `CDFS_ACK_TIMEOUT`,
    /// `CDFS_SYNC_TIMEOUT`, `CDFS_READ_TIMEOUT`, `CDFS_DATA_TIMEOUT`,
    /// `CDFS_IDLE_TIMEOUT` and `CDFS_SESSION_SCAN_LIMIT`. Values that fail to
    /// parse are reported as [`CdRomError::Config`].
    pub fn apply_env(&mut self) -> Result<()> {
        override_from_env("CDFS_READ_ATTEMPTS", &mut self.read_attempts)?;
        override_from_env("CDFS_ACK_TIMEOUT", &mut self.ack_timeout)?;
        override_from_env("CDFS_SYNC_TIMEOUT", &mut self.sync_timeout)?;
        override_from_env("CDFS_READ_TIMEOUT", &mut self.read_timeout)?;
        override_from_env("CDFS_DATA_TIMEOUT", &mut self.data_timeout)?;
        override_from_env("CDFS_IDLE_TIMEOUT", &mut self.idle_timeout)?;
        override_from_env("CDFS_SESSION_SCAN_LIMIT", &mut self.session_scan_limit)?;
        Ok(())
    }
}

fn override_from_env<T: std::str::FromStr>(name: &str, field: &mut T) -> Result<()> {
    if let Ok(value) = std::env::var(name) {
        *field = value
            .trim()
            .parse()
            .map_err(|_| CdRomError::Config(format!("Invalid value for {}: '{}'", name, value)))?;
        log::debug!("Config override from {}", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.read_attempts, 3);
        assert_eq!(config.session_scan_limit, 512);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cdfs.toml");
        let path = path.to_str().unwrap();

        let config = DriverConfig {
            read_attempts: 5,
            session_scan_limit: 64,
            ..DriverConfig::default()
        };
        config.save(path).unwrap();

        let loaded = DriverConfig::load(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DriverConfig = toml::from_str("read_attempts = 7").unwrap();
        assert_eq!(config.read_attempts, 7);
        assert_eq!(config.ack_timeout, DriverConfig::default().ack_timeout);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "read_attempts = \"many\"").unwrap();

        let result = DriverConfig::load(path.to_str().unwrap());
        assert!(matches!(result, Err(CdRomError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let config = DriverConfig::load_or_default(path.to_str().unwrap()).unwrap();
        assert_eq!(config, DriverConfig::default());
    }
}
