use std::{path::Path, time::Duration};

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub queue_poll_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub runtime_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "worker-1".to_string(),
            address: "0.0.0.0".to_string(),
            port: 5556,
            queue_poll_interval_secs: 10,
            stats_interval_secs: 15,
            runtime_timeout_secs: 300,
        }
    }
}

impl Config {
    #[tracing::instrument(name = "worker::Config::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref()).await?;

        let config: Config = serde_yaml::from_str(&file_contents)?;

        for (field, value) in [
            ("queue_poll_interval_secs", config.queue_poll_interval_secs),
            ("stats_interval_secs", config.stats_interval_secs),
            ("runtime_timeout_secs", config.runtime_timeout_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{field} must be greater than zero");
            }
        }

        Ok(config)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue_poll_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_timeout_secs)
    }
}
