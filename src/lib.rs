pub mod automation; // SOC hysteresis state machine
pub mod cache; // shared snapshot and external-reading caches
pub mod channels; // inter-component broadcast channels
pub mod command; // control commands and their result topics
pub mod config; // yaml configuration
pub mod coordinator; // poll/command loop
pub mod mqtt; // MQTT client and messaging
pub mod options; // command line options parsing
pub mod prelude; // common imports
pub mod scheduler; // poll ticks
pub mod solark; // Sol-Ark HTTP source
pub mod solis; // Solis S6 modbus transport and register map

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::coordinator::Coordinator;
use crate::mqtt::Mqtt;
use crate::scheduler::Scheduler;

pub struct Components {
    channels: Channels,
    mqtt: Mqtt,
}

impl Components {
    /// Coordinator first so no new poll or command starts, then the MQTT
    /// sender so queued results still go out.
    pub fn stop(&self) {
        let _ = self
            .channels
            .to_coordinator
            .send(coordinator::ChannelData::Shutdown);
        self.mqtt.stop();
    }
}

pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, config: ConfigWrapper) -> Result<()> {
    info!("solis-bridge {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();
    let snapshots = SnapshotCache::new();
    let external = ExternalCache::new();

    let mut coordinator = Coordinator::new(
        config.clone(),
        channels.clone(),
        snapshots.clone(),
        external.clone(),
    );
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator.start().await {
            error!("coordinator: {}", e);
        }
    });

    let scheduler = Scheduler::new(config.clone(), channels.clone());
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("scheduler: {}", e);
        }
    });

    let mqtt = Mqtt::new(config.clone(), channels.clone(), external.clone());
    let mqtt_task = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_task.start().await {
            error!("mqtt: {}", e);
        }
    });

    let _ = shutdown_rx.recv().await;
    info!("shutdown signal received, stopping components");

    let components = Components {
        channels: channels.clone(),
        mqtt,
    };
    components.stop();

    if let Err(e) = coordinator_handle.await {
        error!("error waiting for coordinator task: {}", e);
    }
    // these two loop until aborted
    scheduler_handle.abort();
    mqtt_handle.abort();

    info!("shutdown complete");
    Ok(())
}

pub async fn run(options: Options) -> Result<()> {
    let config = ConfigWrapper::new(options.config_file)?;

    // The logger starts at info before the config is available; honour
    // the configured level now unless RUST_LOG already overrode it.
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.loglevel()),
    )
    .try_init();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    app(shutdown_rx, config).await
}
