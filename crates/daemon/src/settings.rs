//! Daemon settings
//!
//! Layered with the `config` crate, later layers win:
//! 1. built-in defaults
//! 2. optional TOML file named by `RELAY_CONFIG`
//! 3. environment, `RELAY_` prefix with `__` between nested keys
//!    (`RELAY_QUEUE__CAPACITY=8`, `RELAY_PRODUCERS=4`)

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use relay_core::application::worker::constants::{
    DEFAULT_CONSUMER_DELAY, DEFAULT_PRODUCE_INTERVAL, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_STATS_INTERVAL,
};
use relay_core::domain::QueueConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Names the optional config file
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";
const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub queue: QueueConfig,
    pub producers: usize,
    pub consumers: usize,
    pub produce_interval_ms: u64,
    pub consumer_delay_ms: u64,
    pub stats_interval_secs: u64,
    /// Also write JSON logs to a daily-rolling file in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    /// Load from defaults, `RELAY_CONFIG` and the process environment
    pub fn load() -> Result<Self> {
        let mut builder = defaults()?;
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&path));
        }
        Self::from_builder(builder.add_source(environment()))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: DaemonConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.queue
            .validate()
            .with_context(|| format!("Invalid queue '{}'", self.queue.name))?;
        if self.producers == 0 {
            bail!("producers must be at least 1");
        }
        if self.consumers == 0 {
            bail!("consumers must be at least 1");
        }
        if self.stats_interval_secs == 0 {
            bail!("stats_interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn produce_interval(&self) -> Duration {
        Duration::from_millis(self.produce_interval_ms)
    }

    pub fn consumer_delay(&self) -> Duration {
        Duration::from_millis(self.consumer_delay_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("queue.name", "relay")?
        .set_default("queue.capacity", DEFAULT_QUEUE_CAPACITY)?
        .set_default("queue.fairness", "unordered")?
        .set_default("queue.wake_policy", "broadcast")?
        .set_default("producers", 2i64)?
        .set_default("consumers", 2i64)?
        .set_default("produce_interval_ms", millis(DEFAULT_PRODUCE_INTERVAL))?
        .set_default("consumer_delay_ms", millis(DEFAULT_CONSUMER_DELAY))?
        .set_default("stats_interval_secs", DEFAULT_STATS_INTERVAL.as_secs())?)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use relay_core::domain::{Fairness, WakePolicy};
    use std::collections::HashMap;

    // Injected variables; the real process environment is never read
    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::from_builder(defaults().unwrap().add_source(env(&[]))).unwrap();

        assert_eq!(config.queue.name, "relay");
        assert_eq!(config.queue.capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.queue.fairness, Fairness::Unordered);
        assert_eq!(config.queue.wake_policy, WakePolicy::Broadcast);
        assert_eq!(config.producers, 2);
        assert_eq!(config.produce_interval(), DEFAULT_PRODUCE_INTERVAL);
        assert_eq!(config.consumer_delay(), DEFAULT_CONSUMER_DELAY);
        assert_eq!(config.stats_interval(), DEFAULT_STATS_INTERVAL);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_file_then_environment_override() {
        let toml = r#"
            producers = 5

            [queue]
            name = "ingest"
            capacity = 4
            fairness = "fifo"
        "#;
        let builder = defaults()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(env(&[
                ("RELAY_QUEUE__CAPACITY", "32"),
                ("RELAY_QUEUE__WAKE_POLICY", "single"),
                ("RELAY_CONSUMERS", "7"),
            ]));

        let config = DaemonConfig::from_builder(builder).unwrap();
        assert_eq!(config.queue.name, "ingest");
        assert_eq!(config.queue.capacity, 32);
        assert_eq!(config.queue.fairness, Fairness::Fifo);
        assert_eq!(config.queue.wake_policy, WakePolicy::Single);
        assert_eq!(config.producers, 5);
        assert_eq!(config.consumers, 7);
    }

    #[test]
    fn test_negative_capacity_rejected() {
        let builder = defaults()
            .unwrap()
            .add_source(env(&[("RELAY_QUEUE__CAPACITY", "-3")]));

        let err = DaemonConfig::from_builder(builder).unwrap_err();
        assert!(format!("{:#}", err).contains("-3"), "{:#}", err);
    }

    #[test]
    fn test_zero_consumers_rejected() {
        let builder = defaults()
            .unwrap()
            .add_source(env(&[("RELAY_CONSUMERS", "0")]));
        assert!(DaemonConfig::from_builder(builder).is_err());
    }
}
