use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::gateway::GatewayEvent;

use super::MqttMessage;

/// One outgoing publish derived from a gateway event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Map a gateway event onto its topic and payload.
pub fn publication(config: &Config, event: &GatewayEvent) -> Option<Publication> {
    let publication = match event {
        GatewayEvent::DeviceAdded(description) => Publication {
            topic: config.device_topic(&description.id, "description"),
            payload: serde_json::to_string(description).ok()?,
            retain: true,
        },
        GatewayEvent::PropertyChanged {
            device_id,
            property,
            value,
        } => Publication {
            topic: config.device_topic(device_id, &format!("state/{property}")),
            payload: value.to_string(),
            retain: true,
        },
        GatewayEvent::Connected {
            device_id,
            connected,
        } => Publication {
            topic: config.device_topic(device_id, "connected"),
            payload: connected.to_string(),
            retain: true,
        },
        GatewayEvent::ActionStatus { device_id, action } => Publication {
            topic: config.device_topic(device_id, &format!("action/{}/status", action.name)),
            payload: serde_json::to_string(action).ok()?,
            retain: false,
        },
    };
    Some(publication)
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(std::time::Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        let lwt = rumqttc::LastWill::new(
            config.bridge_status_topic(),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
        }
    }

    fn subscriptions(&self) -> [String; 3] {
        let prefix = &self.config.mqtt.topic_prefix;
        [
            format!("{prefix}/+/command/+"),
            format!("{prefix}/+/action/+"),
            format!("{prefix}/pairing/+"),
        ]
    }

    /// Run the MQTT event loop. Subscribes to command topics on connect,
    /// forwards incoming publishes through `command_tx` and publishes gateway
    /// events received from `events`.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut events: mpsc::UnboundedReceiver<GatewayEvent>,
    ) {
        let subscribe_topics = self.subscriptions();

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");

                            let topic = self.config.bridge_status_topic();
                            if let Err(e) = self
                                .client
                                .publish(&topic, QoS::AtLeastOnce, true, "online")
                                .await
                            {
                                error!("Failed to publish online status: {}", e);
                            }

                            for topic in &subscribe_topics {
                                if let Err(e) = self
                                    .client
                                    .subscribe(topic, QoS::AtLeastOnce)
                                    .await
                                {
                                    error!("Failed to subscribe to {}: {}", topic, e);
                                }
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let msg = MqttMessage {
                                topic: publish.topic.clone(),
                                payload: String::from_utf8_lossy(&publish.payload).to_string(),
                            };
                            if command_tx.send(msg).await.is_err() {
                                warn!("Command channel closed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
                Some(event) = events.recv() => {
                    let Some(publication) = publication(&self.config, &event) else {
                        warn!("Could not encode gateway event {:?}", event);
                        continue;
                    };
                    debug!("Publishing {}: {}", publication.topic, publication.payload);
                    if let Err(e) = self
                        .client
                        .publish(
                            &publication.topic,
                            QoS::AtLeastOnce,
                            publication.retain,
                            publication.payload.into_bytes(),
                        )
                        .await
                    {
                        warn!("Failed to publish {}: {}", publication.topic, e);
                    }
                }
            }
        }
    }
}
