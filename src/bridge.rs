//! Process wiring: tracing, adapter, MQTT surface and shutdown.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::config::{Config, Credentials};
use crate::gateway::Notifier;
use crate::mqtt::client::MqttClient;
use crate::mqtt::{Command, MqttMessage, parse_payload, parse_topic};
use crate::vendor::{MerossCloud, PushEvent};

fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

fn env_filter(verbose: bool) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level(verbose)))
}

/// Install the global subscriber. `RUST_LOG` wins; otherwise `info`, or
/// `debug` in verbose mode. Leaves an already installed subscriber alone.
pub fn init_tracing(verbose: bool) {
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .try_init()
        .is_err()
    {
        debug!("Tracing subscriber already installed");
    }
}

/// Run the bridge until SIGINT/SIGTERM.
///
/// `connect` is only called when credentials are configured. Push events
/// from the cloud, if the embedder subscribes to them, arrive on `push_events`.
pub async fn run<C, F>(config: Config, connect: F, mut push_events: mpsc::Receiver<PushEvent>)
where
    C: MerossCloud,
    F: FnOnce(&Credentials) -> Arc<C>,
{
    init_tracing(config.meross.verbose);
    info!(
        "Starting meross-to-mqtt bridge (mqtt={}:{}, prefix={})",
        config.mqtt.broker_host, config.mqtt.broker_port, config.mqtt.topic_prefix,
    );

    let cloud = config.meross.credentials.as_ref().map(connect);
    let (notifier, gateway_rx) = Notifier::channel();
    let adapter = Arc::new(Adapter::new(cloud, config.adapter_settings(), notifier));

    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<MqttMessage>(100);
    let mqtt_client = MqttClient::new(&config);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, gateway_rx).await;
    });

    spawn_pairing(&adapter);

    let topic_prefix = config.mqtt.topic_prefix.clone();

    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                handle_message(&adapter, &msg, &topic_prefix).await;
            }
            Some(event) = push_events.recv() => {
                adapter.handle_event(event).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = terminate() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    adapter.shutdown().await;
    mqtt_handle.abort();
    info!("meross-to-mqtt bridge stopped");
}

fn spawn_pairing<C: MerossCloud>(adapter: &Arc<Adapter<C>>) {
    let adapter = Arc::clone(adapter);
    tokio::spawn(async move {
        let timeout = adapter.settings().pairing_timeout;
        adapter.start_pairing(timeout).await;
    });
}

async fn handle_message<C: MerossCloud>(
    adapter: &Arc<Adapter<C>>,
    msg: &MqttMessage,
    prefix: &str,
) {
    let Some(command) = parse_topic(&msg.topic, prefix) else {
        debug!("Ignoring message on {}", msg.topic);
        return;
    };

    match command {
        Command::SetProperty {
            device_id,
            property,
        } => {
            let value = parse_payload(&msg.payload);
            if let Err(e) = adapter.set_property(device_id, property, value).await {
                warn!("Write of {} on {} failed: {}", property, device_id, e);
            }
        }
        Command::PerformAction { device_id, action } => {
            if adapter.perform_action(device_id, action).await.is_none() {
                warn!("Action {} for unknown device {}", action, device_id);
            }
        }
        // Runs detached so a cancel arriving meanwhile is still routed.
        Command::StartPairing => spawn_pairing(adapter),
        Command::CancelPairing => adapter.cancel_pairing(),
    }
}

async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
