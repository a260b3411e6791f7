//! HWMP configuration

use crate::error::{MeshError, MeshResult};
use crate::time::tu;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root behaviour of a mesh point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootMode {
    /// Not a root
    #[default]
    None,
    /// Periodic proactive PREQ; `prep` asks every station to answer
    ProactivePreq { prep: bool },
    /// Periodic root announcement
    Rann,
}

/// HWMP protocol parameters (dot11MeshHWMP* attributes). Times in TU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwmpConfig {
    /// Packets waiting for path discovery
    pub max_queue_size: usize,
    pub max_preq_retries: u8,
    pub net_diameter_traversal_time: u32,
    pub active_path_timeout: u32,
    pub path_to_root_interval: u32,
    pub rann_interval: u32,
    /// Upper bound of the random delay before a new root's first announcement
    pub random_start: u32,
    pub max_ttl: u8,
    /// Peer count at or above which PERR is broadcast instead of unicast
    pub unicast_perr_threshold: usize,
    /// Peer count at or above which PREQ is broadcast instead of unicast
    pub unicast_preq_threshold: usize,
    /// Peer count at or above which broadcast data is sent as broadcast
    pub unicast_data_threshold: usize,
    /// Destination Only flag for originated PREQs
    pub do_flag: bool,
    /// Reply and Forward flag for originated PREQs
    pub rf_flag: bool,
    pub root_mode: RootMode,
    /// Seed for root announcement jitter
    pub seed: u64,
}

impl Default for HwmpConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 255,
            max_preq_retries: 3,
            net_diameter_traversal_time: 100, // ~102 ms
            active_path_timeout: 5000,        // ~5.12 s
            path_to_root_interval: 2000,      // ~2.05 s
            rann_interval: 5000,
            random_start: 100, // ~102 ms
            max_ttl: 32,
            unicast_perr_threshold: 32,
            unicast_preq_threshold: 1,
            unicast_data_threshold: 1,
            do_flag: false,
            rf_flag: true,
            root_mode: RootMode::None,
            seed: 0,
        }
    }
}

impl HwmpConfig {
    pub fn with_root_mode(mut self, mode: RootMode) -> Self {
        self.root_mode = mode;
        self
    }

    pub fn with_active_path_timeout(mut self, tus: u32) -> Self {
        self.active_path_timeout = tus;
        self
    }

    pub fn with_max_preq_retries(mut self, retries: u8) -> Self {
        self.max_preq_retries = retries;
        self
    }

    pub fn with_random_start(mut self, tus: u32) -> Self {
        self.random_start = tus;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_flags(mut self, do_flag: bool, rf_flag: bool) -> Self {
        self.do_flag = do_flag;
        self.rf_flag = rf_flag;
        self
    }

    pub fn active_path_lifetime(&self) -> Duration {
        tu(self.active_path_timeout)
    }

    pub fn traversal_time(&self) -> Duration {
        tu(self.net_diameter_traversal_time)
    }

    /// Wait before discovery retry number `retry` (0 for the first PREQ)
    pub fn retry_delay(&self, retry: u8) -> Duration {
        self.traversal_time() * 2 * (u32::from(retry) + 1)
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.max_ttl == 0 {
            return Err(MeshError::Config("max_ttl must be greater than 0".into()));
        }
        if self.max_queue_size == 0 {
            return Err(MeshError::Config("max_queue_size must be greater than 0".into()));
        }
        if self.net_diameter_traversal_time == 0 {
            return Err(MeshError::Config(
                "net_diameter_traversal_time must be greater than 0".into(),
            ));
        }
        if self.active_path_timeout == 0 {
            return Err(MeshError::Config("active_path_timeout must be greater than 0".into()));
        }
        match self.root_mode {
            RootMode::ProactivePreq { .. } if self.path_to_root_interval == 0 => Err(
                MeshError::Config("path_to_root_interval must be greater than 0".into()),
            ),
            RootMode::Rann if self.rann_interval == 0 => {
                Err(MeshError::Config("rann_interval must be greater than 0".into()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_valid() {
        assert!(HwmpConfig::default().validate().is_ok());
    }

    #[test]
    fn test_retry_backoff() {
        let config = HwmpConfig::default();
        assert_eq!(config.retry_delay(0), tu(200));
        assert_eq!(config.retry_delay(2), tu(600));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = HwmpConfig::default();
        config.max_ttl = 0;
        assert!(config.validate().is_err());

        let config = HwmpConfig {
            rann_interval: 0,
            root_mode: RootMode::Rann,
            ..HwmpConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HwmpConfig =
            serde_json::from_str(r#"{"max_ttl": 8, "root_mode": {"proactive_preq": {"prep": true}}}"#)
                .unwrap();
        assert_eq!(config.max_ttl, 8);
        assert_eq!(config.root_mode, RootMode::ProactivePreq { prep: true });
        assert_eq!(config.max_preq_retries, 3);
    }
}
