use std::{path::Path, time::Duration};

use anyhow::Result;
use serde::Deserialize;

use crate::lib::scheduler::types::SchedulerKind;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub address: String,
    pub port: u16,
    /// `host:port` of every worker ingress.
    pub workers: Vec<String>,
    pub scheduler: SchedulerKind,
    pub dispatch_interval_secs: u64,
    pub update_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_event_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: "0.0.0.0".to_string(),
            port: 5555,
            workers: vec!["localhost:5556".to_string()],
            scheduler: SchedulerKind::default(),
            dispatch_interval_secs: 10,
            update_interval_secs: 15,
            request_timeout_secs: 10,
            max_event_history: 1000,
        }
    }
}

impl Config {
    #[tracing::instrument(name = "manager::Config::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref()).await?;

        let config: Config = serde_yaml::from_str(&file_contents)?;

        if config.workers.is_empty() {
            anyhow::bail!("at least one worker must be configured");
        }
        if config.max_event_history == 0 {
            anyhow::bail!("max_event_history must be greater than zero");
        }
        for (field, value) in [
            ("dispatch_interval_secs", config.dispatch_interval_secs),
            ("update_interval_secs", config.update_interval_secs),
            ("request_timeout_secs", config.request_timeout_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{field} must be greater than zero");
            }
        }

        Ok(config)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
