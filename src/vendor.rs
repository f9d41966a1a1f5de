//! Seam to the Meross cloud SDK.
//!
//! The cloud protocol itself lives outside this crate. An embedder implements
//! [`MerossCloud`] and [`MerossDevice`] on top of whatever client it uses and
//! hands it to the adapter; everything here only calls through.

use std::future::Future;
use std::sync::Arc;

use crate::error::VendorError;

/// Device family, decides which wrapper the adapter builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Plug,
    Bulb,
    GarageOpener,
}

/// Raw electricity reading as the plug reports it: milliwatts, decivolts, milliamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Electricity {
    pub power: i64,
    pub voltage: i64,
    pub current: i64,
}

/// Light state as the bulb reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    /// 0xRRGGBB
    pub rgb: u32,
    /// Vendor percentage, 0 (warm) to 100 (cold).
    pub temperature: u8,
    pub luminance: u8,
    /// Which light mode is active; 6 means white temperature.
    pub capacity: u8,
}

impl LightState {
    pub const CAPACITY_TEMPERATURE: u8 = 6;

    pub fn is_temperature_mode(&self) -> bool {
        self.capacity == Self::CAPACITY_TEMPERATURE
    }
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            rgb: 0xffffff,
            temperature: 0,
            luminance: 100,
            capacity: Self::CAPACITY_TEMPERATURE,
        }
    }
}

/// A partial light update; unset fields are left alone by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightCommand {
    pub rgb: Option<u32>,
    pub temperature: Option<u8>,
    pub luminance: Option<u8>,
}

/// One physical device as exposed by the SDK.
///
/// Every method that talks to the cloud takes the channel index; single
/// channel devices always get 0.
pub trait MerossDevice: Send + Sync + 'static {
    fn uuid(&self) -> &str;
    fn name(&self) -> &str;
    fn device_type(&self) -> &str;
    fn class(&self) -> DeviceClass;
    fn channels(&self) -> usize;
    fn is_online(&self) -> bool;

    fn supports_electricity_reading(&self) -> bool {
        false
    }
    fn supports_light_control(&self) -> bool {
        false
    }
    fn is_rgb(&self) -> bool {
        false
    }
    fn is_light_temperature(&self) -> bool {
        false
    }
    fn supports_luminance(&self) -> bool {
        false
    }

    /// On/off state for switches and bulbs, open state for garage openers.
    fn get_status(&self, channel: u8) -> impl Future<Output = Result<bool, VendorError>> + Send;

    fn get_electricity(
        &self,
        channel: u8,
    ) -> impl Future<Output = Result<Electricity, VendorError>> + Send;

    fn get_light_color(
        &self,
        channel: u8,
    ) -> impl Future<Output = Result<LightState, VendorError>> + Send;

    fn turn_on(&self, channel: u8) -> impl Future<Output = Result<(), VendorError>> + Send;

    fn turn_off(&self, channel: u8) -> impl Future<Output = Result<(), VendorError>> + Send;

    fn set_light_color(
        &self,
        channel: u8,
        command: LightCommand,
    ) -> impl Future<Output = Result<(), VendorError>> + Send;

    fn open_door(&self, channel: u8) -> impl Future<Output = Result<(), VendorError>> + Send;

    fn close_door(&self, channel: u8) -> impl Future<Output = Result<(), VendorError>> + Send;
}

/// An authenticated cloud session.
pub trait MerossCloud: Send + Sync + 'static {
    type Device: MerossDevice;

    fn list_supported_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<Arc<Self::Device>>, VendorError>> + Send;
}

/// Push notification from the cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub device_uuid: String,
    pub channel: Option<u8>,
    pub kind: PushEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEventKind {
    Online(bool),
    Toggle(bool),
    LightState(LightState),
    DoorState(bool),
    Other(String),
}
