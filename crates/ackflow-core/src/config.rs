/*
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Configuration module
//!
//! Provide configuration management for the flow control components.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Error;

pub const DEFAULT_ACK_GROUP_MAX_SIZE: usize = 1000;
pub const DEFAULT_ACK_GROUP_MAX_TIME: Duration = Duration::from_millis(100);

/// Configuration file format
#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    YAML,
    JSON,
    TOML,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    JSON,
    #[default]
    PLAIN,
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
    /// Log file path
    pub file_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file_path: None,
        }
    }
}

/// Memory budget for received payloads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryLimitConfig {
    /// Limit in bytes, zero or negative means unlimited
    pub limit_bytes: i64,
}

/// Acknowledgment grouping options
///
/// `max_size <= 1` disables grouping; a zero `max_time` disables time based
/// flushing and makes cumulative acks go out immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckGroupingOptions {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_max_time", with = "humantime_duration")]
    pub max_time: Duration,
}

fn default_max_size() -> usize {
    DEFAULT_ACK_GROUP_MAX_SIZE
}

fn default_max_time() -> Duration {
    DEFAULT_ACK_GROUP_MAX_TIME
}

impl Default for AckGroupingOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_ACK_GROUP_MAX_SIZE,
            max_time: DEFAULT_ACK_GROUP_MAX_TIME,
        }
    }
}

impl AckGroupingOptions {
    pub fn is_grouping_enabled(&self) -> bool {
        self.max_size > 1
    }

    pub fn is_time_flush_enabled(&self) -> bool {
        !self.max_time.is_zero()
    }
}

/// Synthetic workload run by the command line tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Total number of delivered messages
    pub messages: u64,
    /// Number of concurrent consumer tasks
    pub consumers: usize,
    /// Bytes reserved per message
    pub message_size: i64,
    /// Messages packed into one broker entry
    pub batch_size: i32,
    /// Every N-th entry is also acknowledged cumulatively, zero disables
    #[serde(default)]
    pub cumulative_every: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            messages: 10_000,
            consumers: 4,
            message_size: 1024,
            batch_size: 4,
            cumulative_every: 0,
        }
    }
}

/// Flow control configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowControlConfig {
    #[serde(default)]
    pub memory_limit: MemoryLimitConfig,
    #[serde(default)]
    pub ack_grouping: AckGroupingOptions,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub simulation: Option<SimulationConfig>,
}

impl FlowControlConfig {
    /// Load configuration from file
    pub fn from_file(path: &str) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Unable to read configuration file: {}", e)))?;

        // Determine the format based on the file extension.
        let config: Self = match get_format_from_path(path) {
            Some(ConfigFormat::YAML) => serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("YAML parsing error: {}", e)))?,
            Some(ConfigFormat::JSON) => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("JSON parsing error: {}", e)))?,
            Some(ConfigFormat::TOML) => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("TOML parsing error: {}", e)))?,
            None => return Err(Error::Config("The configuration file format cannot be determined. Please use YAML, JSON, or TOML format.".to_string())),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::Config(format!("Unknown log level: {}", other)));
            }
        }

        if let Some(simulation) = &self.simulation {
            if simulation.consumers == 0 {
                return Err(Error::Config(
                    "simulation.consumers must be greater than 0".to_string(),
                ));
            }
            if simulation.batch_size <= 0 {
                return Err(Error::Config(
                    "simulation.batch_size must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Get configuration format from file path.
fn get_format_from_path(path: &str) -> Option<ConfigFormat> {
    let path = path.to_lowercase();
    if path.ends_with(".yaml") || path.ends_with(".yml") {
        Some(ConfigFormat::YAML)
    } else if path.ends_with(".json") {
        Some(ConfigFormat::JSON)
    } else if path.ends_with(".toml") {
        Some(ConfigFormat::TOML)
    } else {
        None
    }
}

/// Serde adapter writing durations as humantime strings such as `"100ms"`.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
