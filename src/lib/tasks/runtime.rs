use std::time::Duration;

use async_trait::async_trait;

use super::types::ContainerConfig;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("docker client error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),
    #[error("task has no container id")]
    MissingContainer,
    #[error("{0}")]
    Other(String),
}

/// The container runtime a worker drives. Both calls return the id of the
/// container they acted on.
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn run(&self, config: &ContainerConfig) -> Result<String, RuntimeError>;

    async fn stop(&self, container_id: &str) -> Result<String, RuntimeError>;
}
