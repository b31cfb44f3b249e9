use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
        StopContainerOptions,
    },
    image::CreateImageOptions,
    models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum},
};
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

use super::{
    runtime::{Runtime, RuntimeError},
    types::ContainerConfig,
};

/// Seconds docker waits for a container to exit before killing it.
const STOP_GRACE_PERIOD_SECS: i64 = 10;

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    pub client: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()?;

        Ok(DockerRuntime { client })
    }

    #[tracing::instrument(name = "DockerRuntime::pull_image", skip_all, fields(image = %image))]
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!("pulling image");

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(status) = info.status {
                debug!(%status, "image pull progress");
            }
        }

        info!("image pulled");
        Ok(())
    }
}

fn host_config(config: &ContainerConfig) -> HostConfig {
    let restart_policy = RestartPolicy {
        name: Some(
            config
                .restart_policy
                .parse()
                .unwrap_or(RestartPolicyNameEnum::NO),
        ),
        maximum_retry_count: None,
    };

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = config
        .port_bindings
        .iter()
        .map(|(container_port, host_port)| {
            (
                container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.clone()),
                }]),
            )
        })
        .collect();

    HostConfig {
        restart_policy: Some(restart_policy),
        nano_cpus: (config.cpu > 0.0).then(|| (config.cpu * 1_000_000_000.0) as i64),
        memory: (config.memory > 0).then_some(config.memory),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        publish_all_ports: Some(true),
        ..Default::default()
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    #[tracing::instrument(name = "DockerRuntime::run", skip_all, fields(
        name = %config.name,
        image = %config.image
    ))]
    async fn run(&self, config: &ContainerConfig) -> Result<String, RuntimeError> {
        if config.image.trim().is_empty() {
            return Err(RuntimeError::Other(format!("task {} has no image", config.name)));
        }

        self.pull_image(&config.image).await?;

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: (!config.cmd.is_empty()).then(|| config.cmd.clone()),
            env: Some(config.env.clone()),
            exposed_ports: Some(
                config
                    .exposed_ports
                    .iter()
                    .map(|port| (format!("{port}/tcp"), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config(config)),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            ..Default::default()
        });

        let created = self
            .client
            .create_container(options, container_config)
            .await?;
        info!(container_id = %created.id, "container created");

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        info!(container_id = %created.id, "container started");

        Ok(created.id)
    }

    #[tracing::instrument(name = "DockerRuntime::stop", skip_all, fields(container_id = %container_id))]
    async fn stop(&self, container_id: &str) -> Result<String, RuntimeError> {
        info!("stopping container");
        self.client
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: STOP_GRACE_PERIOD_SECS,
                }),
            )
            .await?;

        if let Err(error) = self
            .client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(?error, "unable to remove stopped container");
            return Err(error.into());
        }

        info!("container stopped and removed");
        Ok(container_id.to_string())
    }
}
