//! MQTT bridge for NVIDIA GPU telemetry.
//!
//! Streams `nvidia-smi dmon` samples to per-GPU MQTT topics and announces
//! them to Home Assistant through MQTT discovery.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use gpusight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, shutdown_signal};

use mqtt_bridge_nvidia_smi::config::{DEFAULT_CONFIG_FILE, NvidiaBridgeConfig};
use mqtt_bridge_nvidia_smi::monitor::DmonMonitor;
use mqtt_bridge_nvidia_smi::registry::enumerate;
use mqtt_bridge_nvidia_smi::supervisor::Supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    match run(BridgeArgs::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: BridgeArgs) -> Result<()> {
    let config = NvidiaBridgeConfig::from_args(&args, DEFAULT_CONFIG_FILE)
        .context("Invalid configuration")?;
    BridgeRunner::init_logging(&config, Some(&args)).context("Failed to initialize logging")?;

    let nvidia = &config.nvidia;

    // GPUs are enumerated once, before any broker connection.
    let registry = enumerate(&nvidia.command, &nvidia.query_args())
        .await
        .context("GPU enumeration failed")?;
    let registry = Arc::new(registry);

    let mut runner = BridgeRunner::connect("nvidia-smi", &config)
        .await
        .context("Failed to connect to MQTT broker")?
        .with_shutdown_grace(nvidia.shutdown_grace());

    let publisher = runner.publisher();
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&registry),
        runner.topics().clone(),
        nvidia,
    ));

    supervisor.on_first_connect(&publisher).await;

    if let Some(events) = runner.take_events() {
        runner.spawn(Arc::clone(&supervisor).run_events(events, publisher.clone()));
    }

    let spawned = DmonMonitor::spawn(&nvidia.command, &nvidia.dmon_args(), nvidia.line_buffer);
    let mut monitor = match spawned {
        Ok(monitor) => monitor,
        Err(e) => {
            if let Err(shutdown_err) = runner.shutdown().await {
                tracing::warn!(error = %shutdown_err, "Shutdown incomplete");
            }
            return Err(e).context("Failed to start GPU sampler");
        }
    };

    tracing::info!(
        devices = registry.len(),
        groups = %nvidia.dmon_groups,
        "nvidia-smi bridge running"
    );

    let result = supervisor
        .run_stream(&mut monitor, &publisher, async {
            shutdown_signal().await;
            tracing::info!("Received shutdown signal");
        })
        .await;

    if let Err(e) = monitor.terminate(nvidia.terminate_timeout()).await {
        tracing::warn!(error = %e, "Failed to stop GPU sampler");
    }
    if let Err(e) = runner.shutdown().await {
        tracing::warn!(error = %e, "Shutdown incomplete");
    }

    result.context("GPU sample stream failed")?;
    Ok(())
}
