//! Notifications travelling from the adapter towards the host gateway.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::action::Action;
use crate::property::PropertyDescription;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionDescription {}

/// What the host learns about a device when it is added.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescription {
    pub id: String,
    pub title: String,
    #[serde(rename = "@type")]
    pub types: Vec<&'static str>,
    pub description: String,
    pub properties: BTreeMap<&'static str, PropertyDescription>,
    pub actions: BTreeMap<&'static str, ActionDescription>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    DeviceAdded(DeviceDescription),
    PropertyChanged {
        device_id: String,
        property: &'static str,
        value: Value,
    },
    Connected {
        device_id: String,
        connected: bool,
    },
    ActionStatus {
        device_id: String,
        action: Action,
    },
}

/// Cloneable sending half shared by the adapter and every device.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl Notifier {
    pub fn new(tx: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, event: GatewayEvent) {
        if self.tx.send(event).is_err() {
            debug!("Gateway event channel closed, dropping event");
        }
    }
}
