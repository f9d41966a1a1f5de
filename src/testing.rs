//! Scripted in-memory stand-ins for the Meross SDK.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::VendorError;
use crate::gateway::GatewayEvent;
use crate::vendor::{DeviceClass, Electricity, LightCommand, LightState, MerossCloud, MerossDevice};

#[derive(Debug, Default, Clone, Copy)]
pub struct Capabilities {
    pub electricity: bool,
    pub light_control: bool,
    pub rgb: bool,
    pub temperature: bool,
    pub luminance: bool,
}

#[derive(Debug)]
struct FakeState {
    status: bool,
    electricity: Electricity,
    light: LightState,
    read_error: Option<VendorError>,
    write_error: Option<VendorError>,
    calls: Vec<String>,
}

#[derive(Debug)]
pub struct FakeDevice {
    uuid: String,
    name: String,
    device_type: String,
    class: DeviceClass,
    channels: usize,
    capabilities: Capabilities,
    online: AtomicBool,
    state: Mutex<FakeState>,
}

impl FakeDevice {
    fn new(uuid: &str, class: DeviceClass, device_type: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            name: format!("{device_type} {uuid}"),
            device_type: device_type.to_string(),
            class,
            channels: 1,
            capabilities: Capabilities::default(),
            online: AtomicBool::new(true),
            state: Mutex::new(FakeState {
                status: false,
                electricity: Electricity::default(),
                light: LightState::default(),
                read_error: None,
                write_error: None,
                calls: Vec::new(),
            }),
        }
    }

    pub fn plug(uuid: &str) -> Self {
        Self::new(uuid, DeviceClass::Plug, "mss110")
    }

    pub fn bulb(uuid: &str) -> Self {
        Self::new(uuid, DeviceClass::Bulb, "msl120")
    }

    pub fn opener(uuid: &str) -> Self {
        Self::new(uuid, DeviceClass::GarageOpener, "msg100")
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_metering(mut self) -> Self {
        self.capabilities.electricity = true;
        self
    }

    pub fn with_full_light(mut self, light: LightState) -> Self {
        self.capabilities = Capabilities {
            light_control: true,
            rgb: true,
            temperature: true,
            luminance: true,
            ..self.capabilities
        };
        self.state.lock().unwrap().light = light;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: bool) {
        self.state.lock().unwrap().status = status;
    }

    pub fn set_electricity(&self, electricity: Electricity) {
        self.state.lock().unwrap().electricity = electricity;
    }

    pub fn set_light(&self, light: LightState) {
        self.state.lock().unwrap().light = light;
    }

    pub fn fail_reads(&self, error: Option<VendorError>) {
        self.state.lock().unwrap().read_error = error;
    }

    pub fn fail_writes(&self, error: Option<VendorError>) {
        self.state.lock().unwrap().write_error = error;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn read<T>(&self, call: String, f: impl FnOnce(&FakeState) -> T) -> Result<T, VendorError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match &state.read_error {
            Some(e) => Err(e.clone()),
            None => Ok(f(&*state)),
        }
    }

    fn write(&self, call: String, f: impl FnOnce(&mut FakeState)) -> Result<(), VendorError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(e) = &state.write_error {
            return Err(e.clone());
        }
        f(&mut *state);
        Ok(())
    }
}

impl MerossDevice for FakeDevice {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn class(&self) -> DeviceClass {
        self.class
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn supports_electricity_reading(&self) -> bool {
        self.capabilities.electricity
    }

    fn supports_light_control(&self) -> bool {
        self.capabilities.light_control
    }

    fn is_rgb(&self) -> bool {
        self.capabilities.rgb
    }

    fn is_light_temperature(&self) -> bool {
        self.capabilities.temperature
    }

    fn supports_luminance(&self) -> bool {
        self.capabilities.luminance
    }

    async fn get_status(&self, channel: u8) -> Result<bool, VendorError> {
        self.read(format!("get_status:{channel}"), |s| s.status)
    }

    async fn get_electricity(&self, channel: u8) -> Result<Electricity, VendorError> {
        self.read(format!("get_electricity:{channel}"), |s| s.electricity)
    }

    async fn get_light_color(&self, channel: u8) -> Result<LightState, VendorError> {
        self.read(format!("get_light_color:{channel}"), |s| s.light)
    }

    async fn turn_on(&self, channel: u8) -> Result<(), VendorError> {
        self.write(format!("turn_on:{channel}"), |s| s.status = true)
    }

    async fn turn_off(&self, channel: u8) -> Result<(), VendorError> {
        self.write(format!("turn_off:{channel}"), |s| s.status = false)
    }

    async fn set_light_color(&self, channel: u8, command: LightCommand) -> Result<(), VendorError> {
        self.write(format!("set_light_color:{channel}"), |s| {
            if let Some(rgb) = command.rgb {
                s.light.rgb = rgb;
                s.light.capacity = 5;
            }
            if let Some(temperature) = command.temperature {
                s.light.temperature = temperature;
                s.light.capacity = LightState::CAPACITY_TEMPERATURE;
            }
            if let Some(luminance) = command.luminance {
                s.light.luminance = luminance;
            }
        })
    }

    async fn open_door(&self, channel: u8) -> Result<(), VendorError> {
        self.write(format!("open_door:{channel}"), |s| s.status = true)
    }

    async fn close_door(&self, channel: u8) -> Result<(), VendorError> {
        self.write(format!("close_door:{channel}"), |s| s.status = false)
    }
}

#[derive(Debug, Default)]
pub struct FakeCloud {
    devices: Mutex<Vec<Arc<FakeDevice>>>,
    list_calls: AtomicUsize,
    list_delay: Mutex<Option<Duration>>,
}

impl FakeCloud {
    pub fn add(&self, device: FakeDevice) -> Arc<FakeDevice> {
        let device = Arc::new(device);
        self.devices.lock().unwrap().push(Arc::clone(&device));
        device
    }

    /// Make every enumeration take this long before answering.
    pub fn delay_listing(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl MerossCloud for FakeCloud {
    type Device = FakeDevice;

    async fn list_supported_devices(&self) -> Result<Vec<Arc<FakeDevice>>, VendorError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.devices.lock().unwrap().clone())
    }
}

/// Everything currently queued on a gateway event receiver.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
