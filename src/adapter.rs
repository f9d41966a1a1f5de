//! Owns the cloud session, discovers devices and routes host requests and
//! push events to the matching device wrapper.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::device::{Device, device_id};
use crate::error::{VendorError, WriteError};
use crate::gateway::{GatewayEvent, Notifier};
use crate::vendor::{MerossCloud, MerossDevice, PushEvent, PushEventKind};

#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub poll_interval: Duration,
    /// Wait before re-pairing after an online event from an unknown device.
    pub repair_delay: Duration,
    pub pairing_timeout: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            repair_delay: Duration::from_secs(5),
            pairing_timeout: Duration::from_secs(3),
        }
    }
}

pub struct Adapter<C: MerossCloud> {
    /// `None` when no credentials were configured; the adapter is then inert.
    cloud: Option<Arc<C>>,
    settings: AdapterSettings,
    notifier: Notifier,
    devices: RwLock<HashMap<String, Arc<Device<C::Device>>>>,
    poll_tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Id of the pairing run in progress, 0 when idle. A run keeps going
    /// only while it still owns this slot.
    pairing: AtomicU64,
    last_pairing: AtomicU64,
    repair_pending: AtomicBool,
    cancel: CancellationToken,
}

impl<C: MerossCloud> Adapter<C> {
    pub fn new(cloud: Option<Arc<C>>, settings: AdapterSettings, notifier: Notifier) -> Self {
        if cloud.is_none() {
            warn!("No Meross credentials configured, adapter disabled");
        }
        debug!("Adapter settings: {:?}", settings);
        Self {
            cloud,
            settings,
            notifier,
            devices: RwLock::new(HashMap::new()),
            poll_tasks: Mutex::new(Vec::new()),
            pairing: AtomicU64::new(0),
            last_pairing: AtomicU64::new(0),
            repair_pending: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cloud.is_some()
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn is_pairing(&self) -> bool {
        self.pairing.load(Ordering::SeqCst) != 0
    }

    fn owns_pairing(&self, run: u64) -> bool {
        self.pairing.load(Ordering::SeqCst) == run
    }

    /// Enumerate the cloud and add every device/channel not yet known.
    /// Returns how many were added. Calls made while a pairing is already
    /// running return immediately.
    pub async fn start_pairing(&self, timeout: Duration) -> usize {
        let Some(cloud) = &self.cloud else {
            return 0;
        };
        let run = self.last_pairing.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .pairing
            .compare_exchange(0, run, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Pairing already in progress");
            return 0;
        }

        info!("Pairing {} started (timeout {:?})", run, timeout);
        let mut added = 0;
        match tokio::time::timeout(timeout, self.pair(cloud, run, &mut added)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to enumerate Meross devices: {}", e),
            Err(_) => warn!("Pairing timed out after {:?}", timeout),
        }
        // A cancelled run may have been replaced; only release our own slot.
        let _ = self
            .pairing
            .compare_exchange(run, 0, Ordering::SeqCst, Ordering::SeqCst);
        info!("Pairing {} finished, {} new device(s)", run, added);
        added
    }

    /// Stop a running enumeration before its next device.
    pub fn cancel_pairing(&self) {
        let run = self.pairing.swap(0, Ordering::SeqCst);
        if run != 0 {
            info!("Pairing {} cancelled", run);
        }
    }

    async fn pair(&self, cloud: &C, run: u64, added: &mut usize) -> Result<(), VendorError> {
        let vendor_devices = cloud.list_supported_devices().await?;
        debug!("Cloud reports {} supported device(s)", vendor_devices.len());

        for vendor in vendor_devices {
            if !self.owns_pairing(run) {
                debug!("Pairing {} no longer current, stopping", run);
                break;
            }

            let channels = vendor.channels();
            if channels > 1 {
                for channel in (0..channels).filter_map(|c| u8::try_from(c).ok()) {
                    if self.add_device(Arc::clone(&vendor), Some(channel)).await {
                        *added += 1;
                    }
                }
            } else if self.add_device(vendor, None).await {
                *added += 1;
            }
        }
        Ok(())
    }

    async fn add_device(&self, vendor: Arc<C::Device>, channel: Option<u8>) -> bool {
        let id = device_id(vendor.uuid(), channel);
        if self.devices.read().await.contains_key(&id) {
            return false;
        }

        let device = Arc::new(Device::new(vendor, channel, self.notifier.clone()).await);

        {
            let mut devices = self.devices.write().await;
            if devices.contains_key(&id) {
                return false;
            }
            devices.insert(id.clone(), Arc::clone(&device));
        }

        info!("Adding device {} ({})", id, device.title());
        self.notifier.send(GatewayEvent::DeviceAdded(device.description()));
        let task = device.spawn_poll(self.settings.poll_interval, self.cancel.child_token());
        self.poll_tasks.lock().await.push(task);
        true
    }

    pub async fn device(&self, id: &str) -> Option<Arc<Device<C::Device>>> {
        self.devices.read().await.get(id).cloned()
    }

    pub async fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn set_property(
        &self,
        device_id: &str,
        property: &str,
        value: Value,
    ) -> Result<(), WriteError> {
        let device = self
            .device(device_id)
            .await
            .ok_or_else(|| WriteError::UnknownDevice(device_id.to_string()))?;
        device.set_value(property, value).await
    }

    /// `None` when the device is unknown.
    pub async fn perform_action(&self, device_id: &str, name: &str) -> Option<Action> {
        let device = self.device(device_id).await?;
        Some(device.perform_action(name).await)
    }

    /// Route a push event to its device(s). An exact channel match wins;
    /// an event without a channel reaches every channel of the device.
    pub async fn handle_event(self: &Arc<Self>, event: PushEvent) {
        let targets: Vec<Arc<Device<C::Device>>> = {
            let devices = self.devices.read().await;
            let exact = event
                .channel
                .and_then(|c| devices.get(&device_id(&event.device_uuid, Some(c))))
                .or_else(|| devices.get(&device_id(&event.device_uuid, None)));
            match (exact, event.channel) {
                (Some(device), _) => vec![Arc::clone(device)],
                (None, None) => {
                    let prefix = format!("{}-", device_id(&event.device_uuid, None));
                    devices
                        .iter()
                        .filter(|(id, _)| id.starts_with(&prefix))
                        .map(|(_, device)| Arc::clone(device))
                        .collect()
                }
                (None, Some(_)) => Vec::new(),
            }
        };

        if targets.is_empty() {
            if event.kind == PushEventKind::Online(true) {
                info!(
                    "Unknown device {} came online, re-pairing in {:?}",
                    event.device_uuid, self.settings.repair_delay
                );
                self.schedule_repair();
            } else {
                debug!(
                    "Dropping event for unknown device {}: {:?}",
                    event.device_uuid, event.kind
                );
            }
            return;
        }

        for device in targets {
            device.handle_event(&event.kind).await;
        }
    }

    fn schedule_repair(self: &Arc<Self>) {
        if self.repair_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = adapter.cancel.cancelled() => {}
                _ = tokio::time::sleep(adapter.settings.repair_delay) => {
                    adapter.repair_pending.store(false, Ordering::SeqCst);
                    adapter.start_pairing(adapter.settings.pairing_timeout).await;
                }
            }
        });
    }

    /// Stop every poll loop and any pending re-pair.
    pub async fn shutdown(&self) {
        self.cancel_pairing();
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.poll_tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Poll task ended abnormally: {}", e);
            }
        }
        info!("Adapter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyKind;
    use crate::testing::{FakeCloud, FakeDevice, drain};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn adapter(
        cloud: Option<Arc<FakeCloud>>,
    ) -> (Arc<Adapter<FakeCloud>>, UnboundedReceiver<GatewayEvent>) {
        let (notifier, rx) = Notifier::channel();
        let adapter = Adapter::new(cloud, AdapterSettings::default(), notifier);
        (Arc::new(adapter), rx)
    }

    fn added_ids(events: &[GatewayEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::DeviceAdded(description) => Some(description.id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn disabled_without_credentials() {
        let (adapter, mut rx) = adapter(None);
        assert!(!adapter.is_enabled());
        assert_eq!(adapter.start_pairing(TIMEOUT).await, 0);
        assert!(adapter.device_ids().await.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn pairing_expands_channels() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.add(FakeDevice::plug("strip").with_channels(3));
        cloud.add(FakeDevice::opener("garage"));
        let (adapter, mut rx) = adapter(Some(cloud));

        assert_eq!(adapter.start_pairing(TIMEOUT).await, 4);
        assert_eq!(
            adapter.device_ids().await,
            vec!["meross-garage", "meross-strip-0", "meross-strip-1", "meross-strip-2"]
        );
        assert_eq!(
            added_ids(&drain(&mut rx)),
            vec!["meross-strip-0", "meross-strip-1", "meross-strip-2", "meross-garage"]
        );
        assert!(!adapter.is_pairing());
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_pairing_is_idempotent() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.add(FakeDevice::plug("p1"));
        let (adapter, mut rx) = adapter(Some(Arc::clone(&cloud)));

        assert_eq!(adapter.start_pairing(TIMEOUT).await, 1);
        assert_eq!(adapter.start_pairing(TIMEOUT).await, 0);

        cloud.add(FakeDevice::bulb("b1"));
        assert_eq!(adapter.start_pairing(TIMEOUT).await, 1);

        assert_eq!(adapter.device_ids().await, vec!["meross-b1", "meross-p1"]);
        assert_eq!(added_ids(&drain(&mut rx)), vec!["meross-p1", "meross-b1"]);
        adapter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_enumeration() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.add(FakeDevice::plug("p1"));
        cloud.delay_listing(Duration::from_secs(1));
        let (adapter, _rx) = adapter(Some(cloud));

        let pairing = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.start_pairing(TIMEOUT).await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(adapter.is_pairing());
        adapter.cancel_pairing();

        assert_eq!(pairing.await.unwrap(), 0);
        assert!(adapter.device_ids().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_cancel_owns_pairing() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.add(FakeDevice::plug("p1"));
        cloud.delay_listing(Duration::from_secs(1));
        let (adapter, _rx) = adapter(Some(Arc::clone(&cloud)));

        let spawn_pairing = |adapter: &Arc<Adapter<FakeCloud>>| {
            let adapter = Arc::clone(adapter);
            tokio::spawn(async move { adapter.start_pairing(TIMEOUT).await })
        };

        let first = spawn_pairing(&adapter);
        tokio::time::sleep(Duration::from_millis(500)).await;
        adapter.cancel_pairing();
        let second = spawn_pairing(&adapter);

        assert_eq!(first.await.unwrap(), 0);
        assert!(adapter.is_pairing());
        assert_eq!(second.await.unwrap(), 1);
        assert!(!adapter.is_pairing());
        assert_eq!(adapter.device_ids().await, vec!["meross-p1"]);
        assert_eq!(cloud.list_calls(), 2);
        adapter.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn announced_devices_are_registered() {
        let cloud = Arc::new(FakeCloud::default());
        for uuid in ["a", "b", "c", "d"] {
            cloud.add(FakeDevice::plug(uuid));
        }
        let (adapter, mut rx) = adapter(Some(cloud));

        let pairing = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.start_pairing(TIMEOUT).await }
        });
        let mut announced = 0;
        while announced < 4 {
            if let Some(GatewayEvent::DeviceAdded(description)) = rx.recv().await {
                assert!(adapter.device(&description.id).await.is_some());
                announced += 1;
            }
        }
        assert_eq!(pairing.await.unwrap(), 4);
        adapter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn paired_bulb_announces_its_light_state() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.add(FakeDevice::bulb("b1").with_full_light(Default::default()));
        let (adapter, mut rx) = adapter(Some(cloud));
        adapter.start_pairing(TIMEOUT).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(GatewayEvent::DeviceAdded(_))));
        let brightness: Vec<&Value> = events
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::PropertyChanged {
                    property: "brightness",
                    value,
                    ..
                } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(brightness, vec![&json!(100)]);
        adapter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_times_out() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.add(FakeDevice::plug("p1"));
        cloud.delay_listing(Duration::from_secs(10));
        let (adapter, _rx) = adapter(Some(cloud));

        assert_eq!(adapter.start_pairing(TIMEOUT).await, 0);
        assert!(!adapter.is_pairing());
        assert!(adapter.device_ids().await.is_empty());
    }

    #[tokio::test]
    async fn host_requests_are_routed() {
        let cloud = Arc::new(FakeCloud::default());
        let plug = cloud.add(FakeDevice::plug("p1"));
        let opener = cloud.add(FakeDevice::opener("g1"));
        let (adapter, _rx) = adapter(Some(cloud));
        adapter.start_pairing(TIMEOUT).await;

        adapter.set_property("meross-p1", "on", json!(true)).await.unwrap();
        assert_eq!(plug.count_calls("turn_on"), 1);

        assert_eq!(
            adapter.set_property("meross-nope", "on", json!(true)).await,
            Err(WriteError::UnknownDevice("meross-nope".into()))
        );

        let action = adapter.perform_action("meross-g1", "close").await.unwrap();
        assert_eq!(action.status, crate::action::ActionStatus::Completed);
        assert_eq!(opener.count_calls("close_door"), 1);
        assert!(adapter.perform_action("meross-nope", "open").await.is_none());
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn push_events_reach_devices() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.add(FakeDevice::plug("strip").with_channels(2));
        cloud.add(FakeDevice::plug("p1"));
        let (adapter, mut rx) = adapter(Some(cloud));
        adapter.start_pairing(TIMEOUT).await;
        drain(&mut rx);

        adapter
            .handle_event(PushEvent {
                device_uuid: "strip".into(),
                channel: Some(1),
                kind: PushEventKind::Toggle(true),
            })
            .await;
        adapter
            .handle_event(PushEvent {
                device_uuid: "p1".into(),
                channel: None,
                kind: PushEventKind::Toggle(true),
            })
            .await;

        let strip_0 = adapter.device("meross-strip-0").await.unwrap();
        let strip_1 = adapter.device("meross-strip-1").await.unwrap();
        let p1 = adapter.device("meross-p1").await.unwrap();
        assert_ne!(strip_0.value(PropertyKind::On).await, Some(json!(true)));
        assert_eq!(strip_1.value(PropertyKind::On).await, Some(json!(true)));
        assert_eq!(p1.value(PropertyKind::On).await, Some(json!(true)));

        adapter
            .handle_event(PushEvent {
                device_uuid: "strip".into(),
                channel: None,
                kind: PushEventKind::Toggle(true),
            })
            .await;
        assert_eq!(strip_0.value(PropertyKind::On).await, Some(json!(true)));
        adapter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_online_device_triggers_repair() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.add(FakeDevice::plug("p1"));
        let (adapter, _rx) = adapter(Some(Arc::clone(&cloud)));
        adapter.start_pairing(TIMEOUT).await;

        cloud.add(FakeDevice::bulb("b1"));
        let online = PushEvent {
            device_uuid: "b1".into(),
            channel: None,
            kind: PushEventKind::Online(true),
        };
        adapter.handle_event(online.clone()).await;
        adapter.handle_event(online).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(adapter.device_ids().await, vec!["meross-p1"]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(adapter.device_ids().await, vec!["meross-b1", "meross-p1"]);
        assert_eq!(cloud.list_calls(), 2);
        adapter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn other_unknown_events_are_dropped() {
        let cloud = Arc::new(FakeCloud::default());
        let (adapter, _rx) = adapter(Some(Arc::clone(&cloud)));
        adapter.start_pairing(TIMEOUT).await;

        for kind in [PushEventKind::Online(false), PushEventKind::Toggle(true)] {
            adapter
                .handle_event(PushEvent {
                    device_uuid: "ghost".into(),
                    channel: None,
                    kind,
                })
                .await;
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cloud.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_polling() {
        let cloud = Arc::new(FakeCloud::default());
        let plug = cloud.add(FakeDevice::plug("p1"));
        let (adapter, _rx) = adapter(Some(cloud));
        adapter.start_pairing(TIMEOUT).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        adapter.shutdown().await;
        let polls = plug.count_calls("get_status");
        assert_eq!(polls, 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(plug.count_calls("get_status"), polls);
    }
}
