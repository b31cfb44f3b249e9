use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::lib::{
    manager::{
        self,
        api::ManagerServer,
        client::HttpWorkerClient,
        types::Manager,
    },
    tasks::docker::DockerRuntime,
    worker::{
        self,
        api::TaskServer,
        types::Worker,
    },
};

mod lib {
    pub mod api;
    pub mod manager;
    pub mod node;
    pub mod queue;
    pub mod scheduler;
    pub mod tasks;
    pub mod worker;

    #[cfg(test)]
    pub mod testing;
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a worker that executes tasks as containers.
    Worker {
        /// Path to the worker config file. Defaults are used when omitted.
        #[arg(short)]
        file: Option<String>,
    },
    /// Run the manager that schedules tasks onto workers.
    Manager {
        /// Path to the manager config file. Defaults are used when omitted.
        #[arg(short)]
        file: Option<String>,
    },
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(?error, "unable to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn run_worker(config: worker::config::Config) -> Result<()> {
    let runtime = DockerRuntime::connect()?;
    let worker = Arc::new(
        Worker::new(&config.name, Arc::new(runtime)).with_runtime_timeout(config.runtime_timeout()),
    );

    tokio::spawn(worker::worker::run_tasks(
        worker.clone(),
        config.queue_poll_interval(),
    ));
    tokio::spawn(worker::worker::collect_stats(
        worker.clone(),
        config.stats_interval(),
    ));

    TaskServer::new(worker, &config.address, config.port)
        .start_server(shutdown_signal())
        .await
}

async fn run_manager(config: manager::config::Config) -> Result<()> {
    let client = HttpWorkerClient::new(config.request_timeout())?;
    let manager = Arc::new(
        Manager::new(
            config.workers.clone(),
            Arc::new(client),
            config.scheduler.build(),
        )
        .with_max_event_history(config.max_event_history),
    );

    tokio::spawn(manager::manager::process_tasks(
        manager.clone(),
        config.dispatch_interval(),
    ));
    tokio::spawn(manager::manager::update_tasks(
        manager.clone(),
        config.update_interval(),
    ));

    ManagerServer::new(manager, &config.address, config.port)
        .start_server(shutdown_signal())
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Worker { file } => {
            let config = match file {
                Some(file) => worker::config::Config::from_file(file).await?,
                None => worker::config::Config::default(),
            };
            info!(?config, "starting worker");
            run_worker(config).await
        }
        Commands::Manager { file } => {
            let config = match file {
                Some(file) => manager::config::Config::from_file(file).await?,
                None => manager::config::Config::default(),
            };
            info!(?config, "starting manager");
            run_manager(config).await
        }
    }
}
