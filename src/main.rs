//! colimabar - Headless status engine for colima instances and docker
//! containers
//!
//! Runs the reconciliation engine standalone: starts both pollers, subscribes
//! to their snapshots, and logs a summary line whenever state changes. A
//! menu-bar frontend embeds the library instead of running this binary.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use colimabar::core::{ColimaService, DockerService, ShellRunner};
use colimabar::persistence::{default_config_dir, PinStore, SettingsStore};
use colimabar::{APP_NAME, APP_VERSION};

fn main() -> Result<()> {
    init_logging();
    info!("{} v{} starting", APP_NAME, APP_VERSION);

    let config_dir = default_config_dir();
    let runner = Arc::new(ShellRunner);

    let colima = ColimaService::new(runner.clone(), SettingsStore::new(&config_dir));
    let docker = DockerService::new(runner, PinStore::new(&config_dir));
    docker.set_docker_host(colima.docker_host());

    colima.start_polling();
    docker.start_polling();

    let instance_rx = colima.subscribe();
    let container_rx = docker.subscribe();

    std::thread::spawn(move || {
        for instances in instance_rx {
            let summary: Vec<String> = instances
                .iter()
                .map(|i| format!("{}={}", i.name, i.status.label()))
                .collect();
            info!("instances: [{}]", summary.join(", "));
        }
    });

    for snapshot in container_rx {
        if let Some(reason) = snapshot.unreachable {
            warn!("docker unreachable: {}", reason.describe());
            continue;
        }
        let running = snapshot.containers.iter().filter(|c| c.is_running()).count();
        info!(
            "containers: {} total, {} running, {} pinned, {} pending",
            snapshot.containers.len(),
            running,
            snapshot.pinned.len(),
            snapshot.pending.len()
        );
    }

    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("colimabar=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
