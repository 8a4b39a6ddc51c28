// src/config.rs
//! YAML configuration. Every section has serde defaults so a partial file
//! (or no file at all) yields a runnable engine; `validate` catches the
//! values that must be fatal at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub input_topic: String,
    pub poll_timeout_ms: u64,
    pub num_partitions: u32,
    pub flush_interval_ms: u64,
    pub stats_interval_s: u64,
    /// Optional bind address for the stats HTTP endpoint; off when unset.
    pub http_bind: Option<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            input_topic: "market_depth_input".to_string(),
            poll_timeout_ms: 100,
            num_partitions: 8,
            flush_interval_ms: 1000,
            stats_interval_s: 30,
            http_bind: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    pub levels: Vec<u32>,
    pub max_price_levels: usize,
    pub enable_cdc: bool,
    pub enable_snapshots: bool,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            levels: vec![5, 10, 25, 50],
            max_price_levels: 100,
            enable_cdc: true,
            enable_snapshots: true,
        }
    }
}

impl DepthConfig {
    /// Depths in ascending order without duplicates; renders walk this.
    pub fn sorted_levels(&self) -> Vec<u32> {
        let mut levels = self.levels.clone();
        levels.sort_unstable();
        levels.dedup();
        levels
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonConfig {
    pub price_decimals: u32,
    pub quantity_decimals: u32,
    pub include_timestamp: bool,
    pub include_sequence: bool,
    pub compact_format: bool,
    pub exchange_name: String,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            price_decimals: 4,
            quantity_decimals: 2,
            include_timestamp: true,
            include_sequence: true,
            compact_format: false,
            exchange_name: "CXA".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub snapshot_topic_prefix: String,
    pub cdc_topic: String,
    /// false = per-symbol topics `<prefix><SYMBOL>` (default);
    /// true = per-depth topics `<prefix><N>`.
    pub use_depth_in_topic: bool,
    pub use_symbol_partitioning: bool,
    pub num_partitions: u32,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            snapshot_topic_prefix: "market_depth.".to_string(),
            cdc_topic: "market_depth_cdc".to_string(),
            use_depth_in_topic: false,
            use_symbol_partitioning: true,
            num_partitions: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub log_level: String,
    pub log_path: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub processor: ProcessorConfig,
    pub depth_config: DepthConfig,
    pub json_config: JsonConfig,
    pub topic_config: TopicConfig,
    pub global: GlobalConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor.input_topic.is_empty() {
            return Err(ConfigError::Invalid("processor.input_topic is empty".into()));
        }
        if self.processor.num_partitions == 0 {
            return Err(ConfigError::Invalid("processor.num_partitions must be > 0".into()));
        }
        if self.depth_config.levels.is_empty() {
            return Err(ConfigError::Invalid("depth_config.levels is empty".into()));
        }
        for &d in &self.depth_config.levels {
            if d == 0 || d > 1000 {
                return Err(ConfigError::Invalid(format!(
                    "depth_config.levels entry {d} outside 1..=1000"
                )));
            }
        }
        if self.depth_config.max_price_levels == 0 {
            return Err(ConfigError::Invalid(
                "depth_config.max_price_levels must be > 0".into(),
            ));
        }
        if self.json_config.price_decimals > 18 || self.json_config.quantity_decimals > 18 {
            return Err(ConfigError::Invalid("decimal precision outside 0..=18".into()));
        }
        if self.topic_config.cdc_topic.is_empty() {
            return Err(ConfigError::Invalid("topic_config.cdc_topic is empty".into()));
        }
        if self.topic_config.num_partitions == 0 {
            return Err(ConfigError::Invalid("topic_config.num_partitions must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "processor:\n  input_topic: md_in\ndepth_config:\n  levels: [2, 5]\n",
        )
        .unwrap();
        assert_eq!(cfg.processor.input_topic, "md_in");
        assert_eq!(cfg.processor.poll_timeout_ms, 100);
        assert_eq!(cfg.depth_config.levels, vec![2, 5]);
        assert!(cfg.depth_config.enable_cdc);
        assert_eq!(cfg.json_config.price_decimals, 4);
        cfg.validate().unwrap();
    }

    #[test]
    fn out_of_range_depth_is_fatal() {
        let mut cfg = Config::default();
        cfg.depth_config.levels = vec![5, 2000];
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sorted_levels_dedupes_and_orders() {
        let mut cfg = DepthConfig::default();
        cfg.levels = vec![50, 5, 10, 5, 25];
        assert_eq!(cfg.sorted_levels(), vec![5, 10, 25, 50]);
    }
}
