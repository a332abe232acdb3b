//! Configuration management for ChainSync

use crate::chain::ChainParams;
use crate::error::{ChainError, Result};
use crate::network::{ReconnectPolicy, DEFAULT_PORT_RANGE, LOOPBACK};
use crate::wire::DEFAULT_MAX_FRAME_BYTES;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::net::IpAddr;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub sync: SyncConfig,
    pub chain: ChainParams,
    pub miner: MinerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: IpAddr,
    pub port_range_start: u16,
    pub port_range_end: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pause between exchange cycles.
    #[serde(deserialize_with = "human_duration")]
    pub interval: Duration,
    /// Per-frame read/write deadline; absent means wait forever.
    #[serde(deserialize_with = "optional_human_duration")]
    pub io_timeout: Option<Duration>,
    pub max_frame_bytes: u32,
    pub reconnect_attempts: u32,
    #[serde(deserialize_with = "human_duration")]
    pub reconnect_backoff: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_range_start: DEFAULT_PORT_RANGE.start,
            port_range_end: DEFAULT_PORT_RANGE.end,
        }
    }
}

impl NetworkConfig {
    pub fn port_range(&self) -> Range<u16> {
        self.port_range_start..self.port_range_end
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let reconnect = ReconnectPolicy::default();
        Self {
            interval: Duration::from_secs(5),
            io_timeout: Some(Duration::from_secs(30)),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            reconnect_attempts: reconnect.max_attempts,
            reconnect_backoff: reconnect.backoff,
        }
    }
}

impl SyncConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            backoff: self.reconnect_backoff,
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(LOOPBACK)
}

fn human_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn optional_human_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.trim().is_empty() || raw.trim() == "none" {
        return Ok(None);
    }
    humantime::parse_duration(&raw)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// Load `config.toml` from the working directory, falling back to defaults
/// when the file is absent.
pub fn load_config() -> Result<Config> {
    load_config_from(CONFIG_FILE)
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config = if path.exists() {
        let config_str = fs::read_to_string(path)?;
        parse_config(&config_str)?
    } else {
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

pub fn parse_config(config_str: &str) -> Result<Config> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.network.port_range().is_empty() {
            return Err(ChainError::ConfigError(format!(
                "network port range {}..{} is empty",
                self.network.port_range_start, self.network.port_range_end
            )));
        }
        if self.sync.interval.is_zero() {
            return Err(ChainError::ConfigError(
                "sync.interval must be greater than zero".to_string(),
            ));
        }
        if self.sync.max_frame_bytes == 0 {
            return Err(ChainError::ConfigError(
                "sync.max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        if self.chain.difficulty_adjustment_interval == 0 {
            return Err(ChainError::ConfigError(
                "chain.difficulty_adjustment_interval must be greater than zero".to_string(),
            ));
        }
        if self.chain.target_block_time == 0 {
            return Err(ChainError::ConfigError(
                "chain.target_block_time must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
