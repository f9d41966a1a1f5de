//! Bridges Meross cloud plugs, bulbs and garage-door openers onto MQTT.
//!
//! Each discovered device (or channel of a multi-outlet strip) becomes a
//! [`Device`] with a typed property set. A background task polls it through
//! the vendor SDK every few seconds; host writes and actions go the other
//! way and only touch the cache once the vendor confirms.
//!
//! The SDK itself stays outside this crate: implement
//! [`vendor::MerossCloud`] for it and hand it to [`bridge::run`].

pub mod action;
pub mod adapter;
pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod mqtt;
pub mod property;
pub mod vendor;

#[cfg(test)]
mod testing;

pub use action::{Action, ActionStatus};
pub use adapter::{Adapter, AdapterSettings};
pub use config::{Config, Credentials};
pub use device::Device;
pub use error::{ConfigError, PollError, VendorError, WriteError};
pub use gateway::{GatewayEvent, Notifier};
pub use property::{Property, PropertyKind};
pub use vendor::{MerossCloud, MerossDevice, PushEvent, PushEventKind};
