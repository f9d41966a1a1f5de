//! One wrapper per physical device or channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::error::{PollError, VendorError, WriteError};
use crate::gateway::{ActionDescription, DeviceDescription, GatewayEvent, Notifier};
use crate::property::{
    Property, PropertyKind, VendorWrite, color_mode, light_values, metering_values,
};
use crate::vendor::{DeviceClass, LightState, MerossDevice, PushEventKind};

const OPENER_ACTIONS: [&str; 2] = ["open", "close"];

/// Host id for a device: `meross-<uuid>` or `meross-<uuid>-<channel>`.
pub fn device_id(uuid: &str, channel: Option<u8>) -> String {
    match channel {
        Some(channel) => format!("meross-{uuid}-{channel}"),
        None => format!("meross-{uuid}"),
    }
}

#[derive(Debug)]
struct DeviceState {
    properties: BTreeMap<PropertyKind, Property>,
    /// `None` until the first poll or push event says otherwise.
    connected: Option<bool>,
}

pub struct Device<D: MerossDevice> {
    id: String,
    title: String,
    description: String,
    types: Vec<&'static str>,
    channel: u8,
    kinds: Vec<PropertyKind>,
    vendor: Arc<D>,
    notifier: Notifier,
    state: Mutex<DeviceState>,
}

impl<D: MerossDevice> Device<D> {
    /// Build the wrapper and its property set from the vendor's capabilities.
    ///
    /// Bulbs with light control read their light state once so the colour
    /// properties start from real values; a failed read leaves them unknown.
    pub async fn new(vendor: Arc<D>, channel: Option<u8>, notifier: Notifier) -> Self {
        let id = device_id(vendor.uuid(), channel);
        let description = vendor.device_type().to_string();
        let mut title = if vendor.name().is_empty() {
            description.clone()
        } else {
            vendor.name().to_string()
        };
        if let Some(channel) = channel {
            title = format!("{title} ({channel})");
        }
        let channel = channel.unwrap_or(0);

        let mut types = Vec::new();
        let mut properties = Vec::new();

        match vendor.class() {
            DeviceClass::Plug => {
                types.extend(["OnOffSwitch", "SmartPlug"]);
                properties.push(Property::new(PropertyKind::On));
                if vendor.supports_electricity_reading() {
                    types.push("EnergyMonitor");
                    for kind in [
                        PropertyKind::Power,
                        PropertyKind::Voltage,
                        PropertyKind::Current,
                    ] {
                        properties.push(Property::new(kind));
                    }
                }
            }
            DeviceClass::Bulb => {
                types.extend(["OnOffSwitch", "Light"]);
                properties.push(Property::new(PropertyKind::On));
                if vendor.supports_light_control() {
                    types.push("ColorControl");
                    let light = match vendor.get_light_color(channel).await {
                        Ok(light) => Some(light),
                        Err(e) => {
                            warn!("Failed to read light state of {}: {}", id, e);
                            None
                        }
                    };
                    let mut kinds = Vec::new();
                    if vendor.is_rgb() {
                        kinds.push(PropertyKind::Color);
                    }
                    if vendor.is_light_temperature() {
                        kinds.push(PropertyKind::ColorTemperature);
                    }
                    if vendor.is_rgb() && vendor.is_light_temperature() {
                        kinds.push(PropertyKind::ColorMode);
                    }
                    if vendor.supports_luminance() {
                        kinds.push(PropertyKind::Brightness);
                    }
                    let initial = light.as_ref().map(light_values);
                    for kind in kinds {
                        let value = initial
                            .as_ref()
                            .and_then(|values| values.iter().find(|(k, _)| *k == kind))
                            .map(|(_, value)| value.clone());
                        properties.push(match value {
                            Some(value) => Property::with_value(kind, value),
                            None => Property::new(kind),
                        });
                    }
                }
            }
            DeviceClass::GarageOpener => {
                types.push("DoorSensor");
                properties.push(Property::new(PropertyKind::Open));
            }
        }

        let kinds = properties.iter().map(Property::kind).collect();
        let properties = properties.into_iter().map(|p| (p.kind(), p)).collect();

        Self {
            id,
            title,
            description,
            types,
            channel,
            kinds,
            vendor,
            notifier,
            state: Mutex::new(DeviceState {
                properties,
                connected: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn class(&self) -> DeviceClass {
        self.vendor.class()
    }

    pub fn property_kinds(&self) -> &[PropertyKind] {
        &self.kinds
    }

    pub fn actions(&self) -> &'static [&'static str] {
        match self.vendor.class() {
            DeviceClass::GarageOpener => &OPENER_ACTIONS,
            DeviceClass::Plug | DeviceClass::Bulb => &[],
        }
    }

    pub fn description(&self) -> DeviceDescription {
        DeviceDescription {
            id: self.id.clone(),
            title: self.title.clone(),
            types: self.types.clone(),
            description: self.description.clone(),
            properties: self
                .kinds
                .iter()
                .map(|kind| (kind.name(), kind.description()))
                .collect(),
            actions: self
                .actions()
                .iter()
                .map(|name| (*name, ActionDescription {}))
                .collect(),
        }
    }

    pub async fn value(&self, kind: PropertyKind) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .properties
            .get(&kind)
            .and_then(|p| p.value().cloned())
    }

    /// Announce every value already known, e.g. the light state read at
    /// construction. Unknown values are left for the first poll.
    pub async fn publish_known(&self) {
        let known: Vec<(PropertyKind, Value)> = {
            let state = self.state.lock().await;
            state
                .properties
                .values()
                .filter_map(|p| p.value().map(|value| (p.kind(), value.clone())))
                .collect()
        };
        for (kind, value) in known {
            self.notifier.send(GatewayEvent::PropertyChanged {
                device_id: self.id.clone(),
                property: kind.name(),
                value,
            });
        }
    }

    pub async fn connected(&self) -> Option<bool> {
        self.state.lock().await.connected
    }

    /// Commit an observed value; the host hears about it only on a change.
    /// Kinds this device does not carry are ignored.
    pub async fn update(&self, kind: PropertyKind, value: Value) {
        let changed = {
            let mut state = self.state.lock().await;
            match state.properties.get_mut(&kind) {
                Some(property) => property.update(value.clone()),
                None => false,
            }
        };
        if changed {
            debug!("{} {} = {}", self.id, kind.name(), value);
            self.notifier.send(GatewayEvent::PropertyChanged {
                device_id: self.id.clone(),
                property: kind.name(),
                value,
            });
        }
    }

    pub async fn connected_notify(&self, connected: bool) {
        let changed = {
            let mut state = self.state.lock().await;
            let changed = state.connected != Some(connected);
            state.connected = Some(connected);
            changed
        };
        if changed {
            info!(
                "Device {} is {}",
                self.id,
                if connected { "online" } else { "offline" }
            );
            self.notifier.send(GatewayEvent::Connected {
                device_id: self.id.clone(),
                connected,
            });
        }
    }

    /// Read the current state from the vendor and commit it.
    pub async fn poll_once(&self) -> Result<(), PollError> {
        if !self.vendor.is_online() {
            return Err(PollError::Offline);
        }

        match self.vendor.class() {
            DeviceClass::Plug => {
                let on = self.vendor.get_status(self.channel).await?;
                self.update(PropertyKind::On, json!(on)).await;
                if self.vendor.supports_electricity_reading() {
                    let electricity = self.vendor.get_electricity(self.channel).await?;
                    for (kind, value) in metering_values(electricity) {
                        self.update(kind, value).await;
                    }
                }
            }
            DeviceClass::Bulb => {
                let on = self.vendor.get_status(self.channel).await?;
                self.update(PropertyKind::On, json!(on)).await;
                if self.vendor.supports_light_control() {
                    let light = self.vendor.get_light_color(self.channel).await?;
                    self.apply_light_state(&light).await;
                }
            }
            DeviceClass::GarageOpener => {
                let open = self.vendor.get_status(self.channel).await?;
                self.update(PropertyKind::Open, json!(open)).await;
            }
        }
        Ok(())
    }

    /// One poll cycle: failures of any kind become an offline signal.
    pub async fn poll(&self) {
        match self.poll_once().await {
            Ok(()) => self.connected_notify(true).await,
            Err(e) => {
                debug!("Poll of {} failed ({}): {}", self.id, e.class(), e);
                self.connected_notify(false).await;
            }
        }
    }

    /// Announce known values, then poll on a fixed interval until `cancel`
    /// fires. The first poll runs immediately.
    pub fn spawn_poll(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let device = Arc::clone(self);
        tokio::spawn(async move {
            device.publish_known().await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Poll loop of {} stopped", device.id);
                        break;
                    }
                    _ = ticker.tick() => device.poll().await,
                }
            }
        })
    }

    async fn apply_light_state(&self, light: &LightState) {
        for (kind, value) in light_values(light) {
            self.update(kind, value).await;
        }
    }

    /// Host write. The cache only changes once the vendor confirms.
    pub async fn set_value(&self, name: &str, value: Value) -> Result<(), WriteError> {
        let kind = PropertyKind::from_name(name)
            .filter(|kind| self.kinds.contains(kind))
            .ok_or_else(|| WriteError::UnknownProperty(name.to_string()))?;
        let (write, cached) = kind.prepare_write(&value)?;

        let result = match write {
            VendorWrite::Switch(true) => self.vendor.turn_on(self.channel).await,
            VendorWrite::Switch(false) => self.vendor.turn_off(self.channel).await,
            VendorWrite::Light(command) => {
                self.vendor.set_light_color(self.channel, command).await
            }
        };
        if let Err(e) = result {
            warn!("Failed to set {} on {}: {}", name, self.id, e);
            return Err(e.into());
        }

        self.update(kind, cached).await;
        match kind {
            PropertyKind::Color => self.update(PropertyKind::ColorMode, color_mode(false)).await,
            PropertyKind::ColorTemperature => {
                self.update(PropertyKind::ColorMode, color_mode(true)).await
            }
            _ => {}
        }
        Ok(())
    }

    /// Run a named action through start → completed / error.
    pub async fn perform_action(&self, name: &str) -> Action {
        let mut action = Action::new(name);
        action.start();
        self.notify_action(&action);

        let result = match (self.vendor.class(), name) {
            (DeviceClass::GarageOpener, "open") => self.vendor.open_door(self.channel).await,
            (DeviceClass::GarageOpener, "close") => self.vendor.close_door(self.channel).await,
            _ => Err(VendorError::Unsupported("action")),
        };

        match result {
            Ok(()) => {
                info!("Action {} on {} completed", name, self.id);
                action.finish();
            }
            Err(e) => {
                warn!("Action {} on {} failed: {}", name, self.id, e);
                action.fail();
            }
        }
        self.notify_action(&action);
        action
    }

    fn notify_action(&self, action: &Action) {
        self.notifier.send(GatewayEvent::ActionStatus {
            device_id: self.id.clone(),
            action: action.clone(),
        });
    }

    /// Apply a push update routed to this device.
    pub async fn handle_event(&self, kind: &PushEventKind) {
        match kind {
            PushEventKind::Online(online) => self.connected_notify(*online).await,
            PushEventKind::Toggle(on) => self.update(PropertyKind::On, json!(on)).await,
            PushEventKind::LightState(light) => self.apply_light_state(light).await,
            PushEventKind::DoorState(open) => self.update(PropertyKind::Open, json!(open)).await,
            PushEventKind::Other(name) => debug!("Ignoring {} event for {}", name, self.id),
        }
    }
}
