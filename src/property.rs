//! Property kinds, their host-facing descriptors and the cached value.

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::WriteError;
use crate::vendor::{Electricity, LightCommand, LightState};

pub const MIN_KELVIN: i64 = 2700;
pub const MAX_KELVIN: i64 = 6500;

/// Vendor percentage (0..=100) to Kelvin.
pub fn percent_to_kelvin(percent: u8) -> i64 {
    i64::from(percent.min(100)) * (MAX_KELVIN - MIN_KELVIN) / 100 + MIN_KELVIN
}

/// Kelvin to vendor percentage, rounded to the nearest step and clamped.
pub fn kelvin_to_percent(kelvin: i64) -> u8 {
    let kelvin = kelvin.clamp(MIN_KELVIN, MAX_KELVIN);
    let percent = (kelvin - MIN_KELVIN) as f64 * 100.0 / (MAX_KELVIN - MIN_KELVIN) as f64;
    percent.round() as u8
}

/// 0x00ff00 → "#00ff00"
pub fn rgb_to_hex(rgb: u32) -> String {
    format!("#{:06x}", rgb & 0xffffff)
}

/// "#00ff00" → 0x00ff00. Case-insensitive, the leading '#' is required.
pub fn hex_to_rgb(hex: &str) -> Option<u32> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Plug readings in host units.
///
/// The SDK reports milliwatts, decivolts and milliamps; the divisors below
/// turn them into watts, volts and amperes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metering {
    pub watts: f64,
    pub volts: f64,
    pub amperes: f64,
}

impl From<Electricity> for Metering {
    fn from(e: Electricity) -> Self {
        Self {
            watts: e.power as f64 / 1000.0,
            volts: e.voltage as f64 / 10.0,
            amperes: e.current as f64 / 1000.0,
        }
    }
}

/// `{'@type', title, type, unit?, minimum?, maximum?, enum?, readOnly?}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDescription {
    #[serde(rename = "@type")]
    pub at_type: &'static str,
    pub title: &'static str,
    #[serde(rename = "type")]
    pub value_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<&'static str>>,
    #[serde(rename = "readOnly", skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

impl PropertyDescription {
    fn new(at_type: &'static str, title: &'static str, value_type: &'static str) -> Self {
        Self {
            at_type,
            title,
            value_type,
            unit: None,
            minimum: None,
            maximum: None,
            enum_values: None,
            read_only: None,
        }
    }

    fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    fn range(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    fn read_only(mut self) -> Self {
        self.read_only = Some(true);
        self
    }
}

/// Every property a Meross wrapper can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKind {
    On,
    Power,
    Voltage,
    Current,
    Color,
    ColorTemperature,
    ColorMode,
    Brightness,
    Open,
}

/// What a write to a property turns into on the vendor side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorWrite {
    Switch(bool),
    Light(LightCommand),
}

/// Value of the derived `colorMode` property.
pub fn color_mode(temperature: bool) -> Value {
    if temperature {
        json!("temperature")
    } else {
        json!("color")
    }
}

impl PropertyKind {
    pub const ALL: [PropertyKind; 9] = [
        PropertyKind::On,
        PropertyKind::Power,
        PropertyKind::Voltage,
        PropertyKind::Current,
        PropertyKind::Color,
        PropertyKind::ColorTemperature,
        PropertyKind::ColorMode,
        PropertyKind::Brightness,
        PropertyKind::Open,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PropertyKind::On => "on",
            PropertyKind::Power => "power",
            PropertyKind::Voltage => "voltage",
            PropertyKind::Current => "current",
            PropertyKind::Color => "color",
            PropertyKind::ColorTemperature => "colorTemperature",
            PropertyKind::ColorMode => "colorMode",
            PropertyKind::Brightness => "brightness",
            PropertyKind::Open => "open",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(self) -> PropertyDescription {
        match self {
            PropertyKind::On => PropertyDescription::new("OnOffProperty", "On/Off", "boolean"),
            PropertyKind::Power => {
                PropertyDescription::new("InstantaneousPowerProperty", "Power", "number")
                    .unit("watt")
                    .read_only()
            }
            PropertyKind::Voltage => {
                PropertyDescription::new("VoltageProperty", "Voltage", "number")
                    .unit("volt")
                    .read_only()
            }
            PropertyKind::Current => {
                PropertyDescription::new("CurrentProperty", "Current", "number")
                    .unit("ampere")
                    .read_only()
            }
            PropertyKind::Color => PropertyDescription::new("ColorProperty", "Color", "string"),
            PropertyKind::ColorTemperature => PropertyDescription::new(
                "ColorTemperatureProperty",
                "Color Temperature",
                "integer",
            )
            .unit("kelvin")
            .range(MIN_KELVIN, MAX_KELVIN),
            PropertyKind::ColorMode => {
                let mut description =
                    PropertyDescription::new("ColorModeProperty", "Color Mode", "string")
                        .read_only();
                description.enum_values = Some(vec!["color", "temperature"]);
                description
            }
            PropertyKind::Brightness => {
                PropertyDescription::new("BrightnessProperty", "Brightness", "integer")
                    .unit("percent")
                    .range(0, 100)
            }
            PropertyKind::Open => {
                PropertyDescription::new("OpenProperty", "Open", "boolean").read_only()
            }
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            PropertyKind::Power
                | PropertyKind::Voltage
                | PropertyKind::Current
                | PropertyKind::ColorMode
                | PropertyKind::Open
        )
    }

    /// Validate a host write and translate it into a vendor command plus the
    /// value to cache once the vendor confirms.
    pub fn prepare_write(self, value: &Value) -> Result<(VendorWrite, Value), WriteError> {
        let invalid = || WriteError::InvalidValue {
            property: self.name(),
            value: value.clone(),
        };

        match self {
            PropertyKind::On => {
                let on = value.as_bool().ok_or_else(invalid)?;
                Ok((VendorWrite::Switch(on), json!(on)))
            }
            PropertyKind::Color => {
                let rgb = value.as_str().and_then(hex_to_rgb).ok_or_else(invalid)?;
                let command = LightCommand {
                    rgb: Some(rgb),
                    ..Default::default()
                };
                Ok((VendorWrite::Light(command), json!(rgb_to_hex(rgb))))
            }
            PropertyKind::ColorTemperature => {
                let kelvin = as_integer(value)
                    .filter(|k| (MIN_KELVIN..=MAX_KELVIN).contains(k))
                    .ok_or_else(invalid)?;
                let percent = kelvin_to_percent(kelvin);
                let command = LightCommand {
                    temperature: Some(percent),
                    ..Default::default()
                };
                Ok((VendorWrite::Light(command), json!(percent_to_kelvin(percent))))
            }
            PropertyKind::Brightness => {
                let luminance = as_integer(value)
                    .filter(|l| (0..=100).contains(l))
                    .ok_or_else(invalid)?;
                let command = LightCommand {
                    luminance: Some(luminance as u8),
                    ..Default::default()
                };
                Ok((VendorWrite::Light(command), json!(luminance)))
            }
            PropertyKind::Power
            | PropertyKind::Voltage
            | PropertyKind::Current
            | PropertyKind::ColorMode
            | PropertyKind::Open => Err(WriteError::ReadOnly(self.name())),
        }
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Cached values a light state maps onto.
pub fn light_values(state: &LightState) -> [(PropertyKind, Value); 4] {
    [
        (PropertyKind::Color, json!(rgb_to_hex(state.rgb))),
        (
            PropertyKind::ColorTemperature,
            json!(percent_to_kelvin(state.temperature)),
        ),
        (PropertyKind::ColorMode, color_mode(state.is_temperature_mode())),
        (PropertyKind::Brightness, json!(i64::from(state.luminance))),
    ]
}

/// Cached values an electricity reading maps onto.
pub fn metering_values(electricity: Electricity) -> [(PropertyKind, Value); 3] {
    let metering = Metering::from(electricity);
    [
        (PropertyKind::Power, json!(metering.watts)),
        (PropertyKind::Voltage, json!(metering.volts)),
        (PropertyKind::Current, json!(metering.amperes)),
    ]
}

/// A property with its last known value. `None` until the first confirmed
/// read or write.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    kind: PropertyKind,
    value: Option<Value>,
}

impl Property {
    pub fn new(kind: PropertyKind) -> Self {
        Self { kind, value: None }
    }

    pub fn with_value(kind: PropertyKind, value: Value) -> Self {
        Self {
            kind,
            value: Some(value),
        }
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Cache a freshly observed value. Returns true when it differs from the
    /// previous one (an unknown value always differs), i.e. when the host
    /// must be told.
    pub fn update(&mut self, value: Value) -> bool {
        if self.value.as_ref() == Some(&value) {
            return false;
        }
        self.value = Some(value);
        true
    }
}
