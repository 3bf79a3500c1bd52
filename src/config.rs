//! Configuration for the watcher
//!
//! Sizes of the read buffer and the consumer-facing streams, with defaults,
//! TOML loading and environment overrides.

use std::path::Path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::decode::{DEFAULT_MAX_NAME_LEN, HEADER_SIZE};

/// Largest file name the kernel can report, plus its NUL terminator.
const NAME_MAX_WITH_NUL: usize = 256;

/// Smallest read buffer the kernel accepts for a single record.
pub const MIN_READ_BUFFER_SIZE: usize = HEADER_SIZE + NAME_MAX_WITH_NUL;

/// Watcher tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Bytes requested from the event source per read
    pub read_buffer_size: usize,
    /// Events buffered before the decode loop blocks on the consumer
    pub event_capacity: usize,
    /// Errors buffered before the decode loop blocks on the consumer
    pub error_capacity: usize,
    /// Longest name field accepted from the event source
    pub max_name_len: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: HEADER_SIZE * 4096,
            event_capacity: 64,
            error_capacity: 16,
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

impl WatcherConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Defaults with environment variable overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(size) = env_usize("INWATCH_READ_BUFFER_SIZE") {
            self.read_buffer_size = size;
        }
        if let Some(cap) = env_usize("INWATCH_EVENT_CAPACITY") {
            self.event_capacity = cap;
        }
        if let Some(cap) = env_usize("INWATCH_ERROR_CAPACITY") {
            self.error_capacity = cap;
        }
        if let Some(len) = env_usize("INWATCH_MAX_NAME_LEN") {
            self.max_name_len = len;
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.read_buffer_size < MIN_READ_BUFFER_SIZE {
            return Err(format!(
                "read_buffer_size must be at least {} bytes",
                MIN_READ_BUFFER_SIZE
            ));
        }

        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than 0".to_string());
        }

        if self.error_capacity == 0 {
            return Err("error_capacity must be greater than 0".to_string());
        }

        if self.max_name_len < NAME_MAX_WITH_NUL {
            return Err(format!("max_name_len must be at least {}", NAME_MAX_WITH_NUL));
        }

        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}
