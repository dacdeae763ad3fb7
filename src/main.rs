use crate::state::{HealthState, SweepRunner};
use crate::updater::SwarmUpdater;
use std::env;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};

mod client;
mod config;
mod digest;
mod docker;
mod eligibility;
mod image_reference;
mod registry_auth;
mod service;
mod state;
mod sweep;
mod updater;
mod webserver;

#[cfg(test)]
mod fakes;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

static DEFAULT_CONFIG_PATH: &str = "/etc/swarm-updater/config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        env::var("SWARM_UPDATER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = config::load_config(&config_path)?;

    let level = if config.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
    info!("Starting swarm-updater {}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config from file {}", config_path);

    let policy = config.eligibility_policy()?;
    let docker = docker::create_client(&config)?;
    let updater = SwarmUpdater::new(docker.clone(), docker, policy, config.labels());

    let shutdown = CancellationToken::new();
    let health = HealthState::default();
    let runner = SweepRunner::new(updater, health.clone(), shutdown.clone(), config.sweep_timeout());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown requested, finishing the current service update");
            shutdown.cancel();
        }
    });

    if config.run_once {
        runner.sweep().await?;
        return Ok(());
    }

    info!("Executing job scheduler at cron schedule {}", config.schedule);
    let mut scheduler = JobScheduler::new().await?;

    let job = Job::new_async(config.schedule.clone(), {
        let runner = runner.clone();
        move |_uuid, _l| {
            let runner = runner.clone();
            Box::pin(async move {
                if let Err(e) = runner.sweep().await {
                    error!("Error running sweep: {}", e);
                }
            })
        }
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    if config.webserver.enabled {
        let app = webserver::create_app(health);
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
        info!("Starting webserver on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await?;
    } else {
        shutdown.cancelled().await;
    }

    info!("Waiting for the running sweep to finish");
    runner.wait_idle().await;
    scheduler.shutdown().await?;
    info!("swarm-updater stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
